//! Folder pattern matching and precedence.
//!
//! Folder patterns serve two purposes: each pattern becomes one extraction
//! job, and the order of the patterns ranks folders when duplicate copies of
//! a message must be collapsed (earlier pattern wins).
//!
//! Matching is case-insensitive and treats `\` as `/`. A pattern matches a
//! folder name when it is equal to it, when it matches as a `*`/`?` wildcard,
//! or, for patterns containing `*` or `/`, when it matches anywhere inside
//! the folder path.

use regex::Regex;

use crate::config::ConfigError;

/// A compiled folder pattern.
#[derive(Debug, Clone)]
pub struct FolderPattern {
    source: String,
    normalized: String,
    wildcard: Regex,
    partial: Option<Regex>,
}

fn normalize_folder(name: &str) -> String {
    name.trim().to_lowercase().replace('\\', "/")
}

fn glob_to_regex(glob: &str, anchored: bool) -> Result<Regex, regex::Error> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    if anchored {
        pattern.push('^');
    }
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    if anchored {
        pattern.push('$');
    }
    Regex::new(&pattern)
}

impl FolderPattern {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let invalid = |e: regex::Error| ConfigError::InvalidFolderPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        };

        let normalized = normalize_folder(pattern);
        let wildcard = glob_to_regex(&normalized, true).map_err(invalid)?;
        let partial = if normalized.contains('*') || normalized.contains('/') {
            Some(glob_to_regex(&normalized, false).map_err(invalid)?)
        } else {
            None
        };

        Ok(Self {
            source: pattern.trim().to_string(),
            normalized,
            wildcard,
            partial,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, folder_name: &str) -> bool {
        if self.normalized.is_empty() {
            return false;
        }
        let folder = normalize_folder(folder_name);

        if folder == self.normalized || self.wildcard.is_match(&folder) {
            return true;
        }
        self.partial
            .as_ref()
            .map(|partial| partial.is_match(&folder))
            .unwrap_or(false)
    }
}

/// Ordered folder patterns; lower rank means higher precedence.
#[derive(Debug, Clone)]
pub struct FolderPrecedence {
    patterns: Vec<FolderPattern>,
}

impl FolderPrecedence {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let patterns = patterns
            .iter()
            .map(|p| FolderPattern::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Rank of the first pattern matching `folder`; unmatched folders rank last.
    pub fn rank(&self, folder: &str) -> usize {
        self.patterns
            .iter()
            .position(|pattern| pattern.matches(folder))
            .unwrap_or(self.patterns.len())
    }
}

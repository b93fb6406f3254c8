//! Run configuration.
//!
//! A `PipelineConfig` is built once per run, either from the environment or
//! through the builder-style setters, and validated before any job is created.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::folders::FolderPrecedence;

pub const DEFAULT_FOLDER_PATTERNS: &[&str] = &["Inbox", "Sent Items"];
pub const DEFAULT_RETRY_BUDGET: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 250;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_THREAD_TIMEOUT_DAYS: i64 = 30;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_workers must be at least 1")]
    NoWorkers,
    #[error("folder_patterns must contain at least one non-empty pattern")]
    NoFolderPatterns,
    #[error("queue_capacity must be at least 1")]
    NoQueueCapacity,
    #[error("subject window must be positive")]
    InvalidSubjectWindow,
    #[error("invalid folder pattern `{pattern}`: {reason}")]
    InvalidFolderPattern { pattern: String, reason: String },
    #[error("unknown thread method `{0}` (expected subject, references or hybrid)")]
    UnknownThreadMethod(String),
    #[error("invalid date range `{0}` (expected MM/YYYY,MM/YYYY)")]
    InvalidDateRange(String),
    #[error("days_back must be at least 1")]
    InvalidDaysBack,
}

/// Threading strategy, chosen once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadMethod {
    Subject,
    References,
    #[default]
    Hybrid,
}

impl FromStr for ThreadMethod {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "subject" | "content" => Ok(ThreadMethod::Subject),
            "references" | "headers" => Ok(ThreadMethod::References),
            "hybrid" => Ok(ThreadMethod::Hybrid),
            other => Err(ConfigError::UnknownThreadMethod(other.to_string())),
        }
    }
}

impl fmt::Display for ThreadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadMethod::Subject => "subject",
            ThreadMethod::References => "references",
            ThreadMethod::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// Which messages a run extracts, by sent time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
    /// Inclusive on both ends.
    Between {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// The last `n` days before the run's scan time.
    DaysBack(u32),
}

impl DateFilter {
    /// Parse `MM/YYYY,MM/YYYY`: the first day of the start month through the
    /// last instant of the end month.
    pub fn parse_month_range(value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidDateRange(value.trim().to_string());

        let months: Vec<&str> = value.split(',').map(str::trim).filter(|m| !m.is_empty()).collect();
        let [start, end] = months.as_slice() else {
            return Err(invalid());
        };
        let start = month_start(start).ok_or_else(invalid)?;
        let end_month = month_start(end).ok_or_else(invalid)?;
        let next_month = if end_month.month() == 12 {
            NaiveDate::from_ymd_opt(end_month.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(end_month.year(), end_month.month() + 1, 1)
        }
        .ok_or_else(invalid)?;

        let filter = DateFilter::Between {
            start: start.and_hms_opt(0, 0, 0).ok_or_else(invalid)?.and_utc(),
            end: next_month.and_hms_opt(0, 0, 0).ok_or_else(invalid)?.and_utc()
                - chrono::Duration::microseconds(1),
        };
        filter.validate().map_err(|_| invalid())?;
        Ok(filter)
    }

    /// Fix the window for a run started at `scan_time`.
    pub fn window(&self, scan_time: DateTime<Utc>) -> DateWindow {
        match *self {
            DateFilter::Between { start, end } => DateWindow { start, end },
            DateFilter::DaysBack(days) => DateWindow {
                start: scan_time - chrono::Duration::days(i64::from(days)),
                end: scan_time,
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            DateFilter::Between { start, end } if start > end => Err(ConfigError::InvalidDateRange(format!(
                "{} > {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            ))),
            DateFilter::DaysBack(0) => Err(ConfigError::InvalidDaysBack),
            _ => Ok(()),
        }
    }
}

fn month_start(value: &str) -> Option<NaiveDate> {
    let (month, year) = value.split_once('/')?;
    NaiveDate::from_ymd_opt(year.trim().parse().ok()?, month.trim().parse().ok()?, 1)
}

/// A resolved date window, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(value) => split_patterns(&value),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

/// Split a comma separated pattern list, dropping empty entries.
pub fn split_patterns(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub thread_method: ThreadMethod,
    pub max_workers: usize,
    /// Defines both the extraction jobs and the dedup precedence order.
    pub folder_patterns: Vec<String>,
    /// Extra attempts after the first failed fetch of a folder.
    pub retry_budget: u32,
    pub retry_delay: Duration,
    /// Passed through to the mailbox collaborator.
    pub fetch_timeout: Duration,
    pub subject_window: chrono::Duration,
    pub queue_capacity: usize,
    /// Messages outside the window are skipped. Messages whose timestamp had
    /// to be inferred are always kept.
    pub date_filter: Option<DateFilter>,
    /// Upper bound on messages kept per folder job.
    pub max_emails: Option<usize>,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let thread_method = match env::var("MAILTHREAD_THREAD_METHOD") {
            Ok(value) => value.parse()?,
            Err(_) => ThreadMethod::default(),
        };
        let max_workers = env_usize("MAILTHREAD_MAX_WORKERS", num_cpus::get());
        let queue_capacity = env_usize("MAILTHREAD_QUEUE_CAPACITY", max_workers * 2);
        // An explicit month range wins over a days-back window
        let date_filter = match env::var("MAILTHREAD_DATE_RANGE") {
            Ok(value) if !value.trim().is_empty() => Some(DateFilter::parse_month_range(&value)?),
            _ => match env_u32("MAILTHREAD_DAYS_BACK", 0) {
                0 => None,
                days => Some(DateFilter::DaysBack(days)),
            },
        };
        let max_emails = Some(env_usize("MAILTHREAD_MAX_EMAILS", 0)).filter(|&cap| cap > 0);

        let config = Self {
            thread_method,
            max_workers,
            folder_patterns: env_list("MAILTHREAD_FOLDER_PATTERNS", DEFAULT_FOLDER_PATTERNS),
            retry_budget: env_u32("MAILTHREAD_RETRY_BUDGET", DEFAULT_RETRY_BUDGET),
            retry_delay: env_duration_millis("MAILTHREAD_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS),
            fetch_timeout: env_duration_millis(
                "MAILTHREAD_FETCH_TIMEOUT_MS",
                DEFAULT_FETCH_TIMEOUT_MS,
            ),
            subject_window: chrono::Duration::days(env_i64(
                "MAILTHREAD_THREAD_TIMEOUT_DAYS",
                DEFAULT_THREAD_TIMEOUT_DAYS,
            )),
            queue_capacity,
            date_filter,
            max_emails,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_thread_method(mut self, method: ThreadMethod) -> Self {
        self.thread_method = method;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self.queue_capacity = max_workers.saturating_mul(2);
        self
    }

    pub fn with_folder_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.folder_patterns = patterns
            .into_iter()
            .map(Into::into)
            .map(|p: String| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    pub fn with_retry(mut self, budget: u32, delay: Duration) -> Self {
        self.retry_budget = budget;
        self.retry_delay = delay;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_subject_window(mut self, window: chrono::Duration) -> Self {
        self.subject_window = window;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_date_filter(mut self, filter: DateFilter) -> Self {
        self.date_filter = Some(filter);
        self
    }

    /// `0` removes the cap.
    pub fn with_max_emails(mut self, max_emails: usize) -> Self {
        self.max_emails = Some(max_emails).filter(|&cap| cap > 0);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.folder_patterns.iter().all(|p| p.trim().is_empty()) {
            return Err(ConfigError::NoFolderPatterns);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::NoQueueCapacity);
        }
        if self.subject_window <= chrono::Duration::zero() {
            return Err(ConfigError::InvalidSubjectWindow);
        }
        if let Some(filter) = &self.date_filter {
            filter.validate()?;
        }
        FolderPrecedence::new(&self.folder_patterns)?;
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let max_workers = num_cpus::get().max(1);
        Self {
            thread_method: ThreadMethod::default(),
            max_workers,
            folder_patterns: DEFAULT_FOLDER_PATTERNS.iter().map(|s| s.to_string()).collect(),
            retry_budget: DEFAULT_RETRY_BUDGET,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            subject_window: chrono::Duration::days(DEFAULT_THREAD_TIMEOUT_DAYS),
            queue_capacity: max_workers * 2,
            date_filter: None,
            max_emails: None,
        }
    }
}

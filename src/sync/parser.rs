//! Message normalization.
//!
//! Turns a [`RawMessage`] from the mailbox collaborator into the canonical
//! [`NormalizedEmail`] used by deduplication and threading.
//!
//! # Key Responsibilities
//!
//! - **Identifiers**: clean the source Message-ID, or synthesize a stable
//!   content hash when the source has none
//! - **Subjects**: strip reply/forward prefixes for threading comparison
//! - **Timestamps**: parse the source's textual date into UTC, falling back
//!   to the folder scan time
//! - **Addresses**: lowercase sender and recipients into a participant set
//! - **References**: split In-Reply-To / References into message ids
//!
//! # Error Handling
//!
//! Normalization only fails when a message has neither a usable identifier
//! nor the fields needed to synthesize one. Such records are dropped and
//! counted by the worker; they never abort a folder.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{NormalizedEmail, RawMessage};

/// Prefix added to content-derived identifiers.
pub const SYNTHETIC_ID_PREFIX: &str = "synthetic-";

static REPLY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:re|fwd|fw|aw)\s*:\s*").expect("reply prefix pattern is valid")
});

/// Naive datetime layouts emitted by Outlook-style sources. Interpreted as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
];

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// A four-digit year or a bare epoch. Without one, `dateparser` fills the
/// missing date parts from the wall clock.
static ABSOLUTE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^\d{9,13}$)|(?:\b(?:19|20|21)\d{2}\b)").expect("absolute date pattern is valid")
});

/// A message that cannot be turned into a [`NormalizedEmail`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("message in folder `{folder}` has no identifier and no sender")]
    MissingSender { folder: String },
    #[error("message in folder `{folder}` has no identifier and no subject")]
    MissingSubject { folder: String },
}

/// Remove NUL bytes and surrounding whitespace.
fn sanitize_text(text: &str) -> String {
    text.replace('\0', "").trim().to_string()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean a message id: strip angle brackets and whitespace.
///
/// Ids that are empty or contain internal whitespace are not usable.
pub fn normalize_message_id(msg_id: Option<&str>) -> Option<String> {
    msg_id.and_then(|id| {
        let cleaned = sanitize_text(id.trim().trim_matches(&['<', '>'][..]));
        if cleaned.is_empty() || cleaned.chars().any(char::is_whitespace) {
            None
        } else {
            Some(cleaned)
        }
    })
}

/// Extract message ids from a References header, oldest first.
pub fn extract_references(header_value: &str) -> Vec<String> {
    header_value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter_map(|id| normalize_message_id(Some(id)))
        .collect()
}

/// Strip repeated `Re:`/`Fwd:`/`FW:` prefixes and collapse whitespace.
///
/// Case is preserved; comparisons go through
/// [`NormalizedEmail::subject_key`].
///
/// ```rust,ignore
/// assert_eq!(normalize_subject("Re: RE: Fwd: Budget Q3"), "Budget Q3");
/// ```
pub fn normalize_subject(subject: &str) -> String {
    let mut normalized = sanitize_text(subject);

    loop {
        let stripped = REPLY_PREFIX.replace(&normalized, "");
        if stripped.len() == normalized.len() {
            break;
        }
        normalized = stripped.into_owned();
    }

    collapse_whitespace(&normalized)
}

/// Parse a single address, returning the lowercased addr-spec.
fn parse_single_address(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(addrs) = mailparse::addrparse(value) {
        for addr in addrs.iter() {
            match addr {
                mailparse::MailAddr::Single(info) if info.addr.contains('@') => {
                    return Some(info.addr.trim().to_lowercase());
                }
                mailparse::MailAddr::Group(group) => {
                    if let Some(first) = group.addrs.iter().find(|a| a.addr.contains('@')) {
                        return Some(first.addr.trim().to_lowercase());
                    }
                }
                _ => {}
            }
        }
    }

    // Fall back to the bare token for values mailparse rejects
    let bare = value
        .rsplit('<')
        .next()
        .unwrap_or(value)
        .trim_matches(|c: char| c == '<' || c == '>' || c.is_whitespace());
    bare.contains('@').then(|| bare.to_lowercase())
}

/// Parse a recipient list separated by commas or semicolons.
pub fn parse_addresses(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|value| value.split([',', ';']))
        .filter_map(parse_single_address)
        .collect()
}

/// Normalize a sender. Non-address senders (e.g. Exchange DNs) are kept
/// lowercased so they still identify the author.
fn normalize_sender(sender: Option<&str>) -> Option<String> {
    let raw = sanitize_text(sender?);
    if raw.is_empty() {
        return None;
    }
    Some(parse_single_address(&raw).unwrap_or_else(|| raw.to_lowercase()))
}

/// Parse a source timestamp into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    for format in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }

    if !ABSOLUTE_DATE.is_match(raw) {
        return None;
    }
    dateparser::parse_with_timezone(raw, &Utc).ok()
}

/// Deterministic identifier for messages without a usable Message-ID.
pub fn synthesize_id(folder: &str, sender: &str, timestamp: &str, normalized_subject: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [folder, sender, timestamp, normalized_subject] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{}{:x}", SYNTHETIC_ID_PREFIX, hasher.finalize())
}

/// Normalize a raw message.
///
/// `scan_time` is used as the timestamp when the source's date cannot be
/// parsed; the email is then flagged `timestamp_inferred`.
pub fn normalize(raw: RawMessage, scan_time: DateTime<Utc>) -> Result<NormalizedEmail, NormalizeError> {
    let folder = sanitize_text(&raw.folder);
    let message_id = normalize_message_id(raw.message_id.as_deref());

    let subject = raw
        .subject
        .as_deref()
        .map(|s| collapse_whitespace(&sanitize_text(s)))
        .filter(|s| !s.is_empty());
    let sender = normalize_sender(raw.sender.as_deref());

    let raw_timestamp = raw.sent_at.as_deref().map(str::trim).unwrap_or_default();
    let parsed_timestamp = parse_timestamp(raw_timestamp);

    let normalized_subject = subject.as_deref().map(normalize_subject).unwrap_or_default();

    let (id, id_synthesized) = match message_id {
        Some(id) => (id, false),
        None => {
            let Some(sender) = sender.as_deref() else {
                return Err(NormalizeError::MissingSender { folder });
            };
            if subject.is_none() {
                return Err(NormalizeError::MissingSubject { folder });
            }
            // Hash the source text, never a parsed or inferred value
            let id = synthesize_id(&folder, sender, raw_timestamp, &normalized_subject);
            (id, true)
        }
    };

    let (sent_at, timestamp_inferred) = match parsed_timestamp {
        Some(ts) => (ts, false),
        None => {
            log::debug!(
                "message {} in {}: unparseable timestamp `{}`, using scan time",
                id,
                folder,
                raw_timestamp
            );
            (scan_time, true)
        }
    };

    let sender = sender.unwrap_or_default();
    let mut participants: BTreeSet<String> = parse_addresses(&raw.recipients)
        .into_iter()
        .chain(parse_addresses(&raw.cc_recipients))
        .collect();
    if !sender.is_empty() {
        participants.insert(sender.clone());
    }

    let in_reply_to = normalize_message_id(raw.in_reply_to.as_deref()).filter(|parent| parent != &id);
    let references = raw
        .references
        .as_deref()
        .map(extract_references)
        .unwrap_or_default()
        .into_iter()
        .filter(|reference| reference != &id)
        .collect();

    log::trace!("normalized: {} - {}", id, normalized_subject);

    Ok(NormalizedEmail {
        id,
        id_synthesized,
        subject: subject.unwrap_or_default(),
        normalized_subject,
        sender,
        participants,
        sent_at,
        timestamp_inferred,
        in_reply_to,
        references,
        folder,
        body_length: raw.body_length,
    })
}

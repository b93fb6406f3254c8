use serde::{Deserialize, Serialize};

use crate::models::NormalizedEmail;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// One folder-fetch task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionJob {
    pub id: usize,
    pub folder_pattern: String,
}

impl ExtractionJob {
    /// One job per configured folder pattern, in configuration order.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Vec<ExtractionJob> {
        patterns
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .enumerate()
            .map(|(id, pattern)| ExtractionJob {
                id,
                folder_pattern: pattern.to_string(),
            })
            .collect()
    }
}

/// Normalized output of one successful job.
#[derive(Debug, Clone)]
pub struct FolderBatch {
    pub job_id: usize,
    pub folder_pattern: String,
    pub emails: Vec<NormalizedEmail>,
    /// Messages fetched on the successful attempt.
    pub fetched: usize,
    /// Messages dropped as malformed on the successful attempt.
    pub dropped: usize,
    /// Messages skipped by the date window on the successful attempt.
    pub filtered: usize,
}

/// Terminal report for one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: usize,
    pub folder_pattern: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_follow_pattern_order() {
        let jobs = ExtractionJob::from_patterns(&["Inbox", " ", "Sent Items"]);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].folder_pattern, "Inbox");
        assert_eq!(jobs[1].folder_pattern, "Sent Items");
        assert_eq!(jobs[1].id, 1);
    }
}

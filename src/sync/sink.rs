use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::models::Conversation;
use crate::sync::source::ConversationSink;

/// Writes each batch as a JSON array, replacing the file atomically.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConversationSink for JsonFileSink {
    fn persist(&self, conversations: &[Conversation]) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec_pretty(conversations)?;

        let mut staging = self.path.clone().into_os_string();
        staging.push(".partial");
        let staging = PathBuf::from(staging);

        // A failed write or rename leaves no staging file behind
        if let Err(err) = fs::write(&staging, encoded).and_then(|()| fs::rename(&staging, &self.path)) {
            let _ = fs::remove_file(&staging);
            return Err(err.into());
        }
        log::debug!("wrote {} conversations to {}", conversations.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThreadMethod;
    use crate::test_support::email;
    use crate::threading::ThreadResolver;

    #[test]
    fn test_json_file_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("conversations.json"));
        let conversations = ThreadResolver::default().resolve(
            vec![email("a", "Hi", "x@x.com", 0), email("b", "Hi", "x@x.com", 1)],
            ThreadMethod::Subject,
        );

        sink.persist(&conversations).unwrap();

        let stored: Vec<Conversation> =
            serde_json::from_slice(&fs::read(sink.path()).unwrap()).unwrap();
        assert_eq!(stored, conversations);
        assert!(!dir.path().join("conversations.json.partial").exists());
    }

    #[test]
    fn test_failed_replace_removes_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("conversations.json");
        // A non-empty directory cannot be replaced by a file
        fs::create_dir(&target).unwrap();
        fs::write(target.join("keep"), b"x").unwrap();

        let sink = JsonFileSink::new(&target);
        assert!(matches!(sink.persist(&[]), Err(StorageError::Io(_))));
        assert!(!dir.path().join("conversations.json.partial").exists());
        assert!(target.join("keep").exists());
    }

    #[test]
    fn test_missing_directory_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::new(dir.path().join("missing").join("out.json"));
        assert!(matches!(sink.persist(&[]), Err(StorageError::Io(_))));
    }
}

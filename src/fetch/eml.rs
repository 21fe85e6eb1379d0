//! Saved `.eml` files as a mail source.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{MailError, Result};
use crate::model::message::DecodedMessage;
use crate::parser::mime::decode_message;

use super::MailSource;

/// Replays `.eml` files (or directories of them) as one batch.
#[derive(Debug, Clone)]
pub struct EmlFiles {
    paths: Vec<PathBuf>,
}

impl EmlFiles {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }

    /// Files to read: given files as-is, directories expanded to their `*.eml`.
    fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for path in &self.paths {
            if path.is_dir() {
                let mut found: Vec<PathBuf> = std::fs::read_dir(path)
                    .map_err(|e| MailError::io(path, e))?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| {
                        p.extension()
                            .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"))
                    })
                    .collect();
                found.sort();
                files.extend(found);
            } else {
                files.push(path.clone());
            }
        }
        Ok(files)
    }
}

impl MailSource for EmlFiles {
    /// Sorted newest first by `Date:`; undated messages go last.
    fn fetch(&mut self) -> Result<Vec<DecodedMessage>> {
        let mut messages = Vec::new();
        for path in self.files()? {
            match read_eml(&path) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping file"),
            }
        }
        messages.sort_by(|a, b| b.date.cmp(&a.date));
        debug!(count = messages.len(), "Loaded .eml files");
        Ok(messages)
    }

    fn describe(&self) -> String {
        format!("{} .eml path(s)", self.paths.len())
    }
}

/// Read and decode a single `.eml` file.
pub fn read_eml(path: impl AsRef<Path>) -> Result<DecodedMessage> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| MailError::io(path, e))?;
    decode_message(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, date: &str, subject: &str) {
        let raw = format!(
            "From: a@example.com\r\nSubject: {subject}\r\nDate: {date}\r\n\r\nbody\r\n"
        );
        std::fs::write(dir.join(name), raw).unwrap();
    }

    #[test]
    fn test_directory_sorted_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.eml", "Mon, 1 Sep 2025 10:00:00 +0000", "old");
        write(tmp.path(), "b.eml", "Wed, 3 Sep 2025 10:00:00 +0000", "new");
        write(tmp.path(), "c.EML", "Tue, 2 Sep 2025 10:00:00 +0000", "middle");
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let mut source = EmlFiles::new([tmp.path().to_path_buf()]);
        let subjects: Vec<String> = source
            .fetch()
            .unwrap()
            .into_iter()
            .map(|m| m.subject)
            .collect();
        assert_eq!(subjects, vec!["new", "middle", "old"]);
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "ok.eml", "Mon, 1 Sep 2025 10:00:00 +0000", "ok");
        let mut source = EmlFiles::new([tmp.path().join("missing.eml"), tmp.path().join("ok.eml")]);
        let messages = source.fetch().unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_read_eml_not_found() {
        assert!(matches!(
            read_eml("/nonexistent/file.eml"),
            Err(MailError::Io { .. })
        ));
    }
}

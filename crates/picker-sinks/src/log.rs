//! Append-only JSON-lines file shared by the durable sinks

use crate::error::{WriterError, WriterErrorKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One JSON value per line, fsynced on every append
#[derive(Debug)]
pub(crate) struct JsonLog {
    path: PathBuf,
    writer: &'static str,
    file: Mutex<tokio::fs::File>,
}

impl JsonLog {
    /// Open `path` for appending and return the entries already in it
    ///
    /// A last line without its newline is the remains of an interrupted
    /// append; it is cut off. Any other unreadable line is an error.
    pub(crate) async fn open<T: DeserializeOwned>(
        path: &Path,
        writer: &'static str,
    ) -> Result<(Self, Vec<T>), WriterError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(writer, parent, &e))?;
        }
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_error(writer, path, &e)),
        };

        let complete = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
        let mut entries = Vec::new();
        for (number, line) in bytes[..complete].split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let entry = serde_json::from_slice(line).map_err(|e| {
                WriterError::new(
                    WriterErrorKind::Internal,
                    writer,
                    format!("{} line {}: {e}", path.display(), number + 1),
                )
            })?;
            entries.push(entry);
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| io_error(writer, path, &e))?;
        if complete < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - complete,
                "truncating partial trailing entry"
            );
            file.set_len(complete as u64)
                .await
                .map_err(|e| io_error(writer, path, &e))?;
        }

        Ok((
            Self {
                path: path.to_path_buf(),
                writer,
                file: Mutex::new(file),
            },
            entries,
        ))
    }

    /// Serialize `entries` as newline-terminated lines
    pub(crate) fn encode<T: Serialize>(&self, entries: &[T]) -> Result<Vec<u8>, WriterError> {
        let mut bytes = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut bytes, entry).map_err(|e| {
                WriterError::new(WriterErrorKind::Internal, self.writer, e.to_string())
            })?;
            bytes.push(b'\n');
        }
        Ok(bytes)
    }

    /// Append `bytes` durably, then run `then` before releasing the file
    ///
    /// Appends and their in-memory effects therefore happen in the same
    /// order.
    pub(crate) async fn append<R>(
        &self,
        bytes: &[u8],
        then: impl FnOnce() -> R,
    ) -> Result<R, WriterError> {
        let mut file = self.file.lock().await;
        file.write_all(bytes)
            .await
            .map_err(|e| io_error(self.writer, &self.path, &e))?;
        file.flush()
            .await
            .map_err(|e| io_error(self.writer, &self.path, &e))?;
        file.sync_data()
            .await
            .map_err(|e| io_error(self.writer, &self.path, &e))?;
        Ok(then())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

fn io_error(writer: &'static str, path: &Path, err: &std::io::Error) -> WriterError {
    WriterError::unavailable(writer, format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn appended_lines_are_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("log.jsonl");
        let (log, entries) = JsonLog::open::<Value>(&path, "graph").await.unwrap();
        assert!(entries.is_empty());

        let bytes = log.encode(&[json!({"a": 1}), json!({"a": 2})]).unwrap();
        let applied = log.append(&bytes, || 2).await.unwrap();
        assert_eq!(applied, 2);
        drop(log);

        let (_, entries) = JsonLog::open::<Value>(&path, "graph").await.unwrap();
        assert_eq!(entries, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[tokio::test]
    async fn torn_tail_is_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, "{\"a\":1}\n{\"a\":").unwrap();

        let (log, entries) = JsonLog::open::<Value>(&path, "graph").await.unwrap();
        assert_eq!(entries, vec![json!({"a": 1})]);
        let bytes = log.encode(&[json!({"a": 3})]).unwrap();
        log.append(&bytes, || ()).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\":1}\n{\"a\":3}\n");
    }

    #[tokio::test]
    async fn corrupt_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        std::fs::write(&path, "{\"a\":1}\nnot json\n{\"a\":2}\n").unwrap();

        let err = JsonLog::open::<Value>(&path, "vector").await.unwrap_err();
        assert_eq!(err.kind, WriterErrorKind::Internal);
        assert!(err.message.contains("line 2"), "{}", err.message);
    }
}

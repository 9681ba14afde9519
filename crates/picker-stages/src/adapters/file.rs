//! Local fixture adapter
//!
//! Reads `<dir>/<SYMBOL>/<document>.json`. Used for offline runs and for
//! replaying captured source documents.

use crate::error::{ErrorKind, FetchError};
use crate::processor::{FetchParams, SourceAdapter};
use async_trait::async_trait;
use picker_artifact::RawDocument;
use picker_symbol::SymbolProfile;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct FileAdapter {
    dir: PathBuf,
    document: String,
}

impl FileAdapter {
    /// Adapter reading `document` (`forum`, `fundamentals`) for each symbol
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, document: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            document: document.into(),
        }
    }

    #[must_use]
    pub fn path_for(&self, profile: &SymbolProfile) -> PathBuf {
        self.dir
            .join(profile.symbol.as_str())
            .join(format!("{}.json", self.document))
    }
}

#[async_trait]
impl SourceAdapter for FileAdapter {
    fn name(&self) -> &str {
        "file"
    }

    fn fingerprint(&self) -> String {
        format!("file:{}:{}", self.dir.display(), self.document)
    }

    async fn fetch(
        &self,
        profile: &SymbolProfile,
        _params: &FetchParams,
    ) -> Result<RawDocument, FetchError> {
        let path = self.path_for(profile);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::new(
                    ErrorKind::Rejected,
                    format!("{} not found", path.display()),
                ));
            }
            Err(e) => return Err(FetchError::network(format!("{}: {e}", path.display()))),
        };
        let body = serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::malformed(format!("{}: {e}", path.display())))?;
        Ok(RawDocument {
            source: "file".into(),
            uri: path.display().to_string(),
            content_type: "application/json".into(),
            body,
        })
    }
}

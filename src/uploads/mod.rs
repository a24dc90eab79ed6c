// File intake: stores uploaded attachments under the content directory and
// returns the public path they are served from.

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::config;

/// An uploaded file as received from a multipart request
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub bytes: Bytes,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("failed to prepare upload directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to store {file_name}: {source}")]
    Write {
        file_name: String,
        #[source]
        source: io::Error,
    },
}

#[async_trait]
pub trait FileIntake: Send + Sync {
    /// Persist the attachment and return its relative public path. Each call yields a new path.
    async fn persist(&self, attachment: &Attachment) -> Result<String, IntakeError>;
}

/// Writes attachments to a local directory served under `public_prefix`
pub struct DiskFileIntake {
    root: PathBuf,
    public_prefix: String,
}

impl DiskFileIntake {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config() -> Self {
        let storage = &config().storage;
        Self::new(&storage.upload_dir, &storage.public_prefix)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the content directory if it does not exist yet
    pub async fn ensure_root(&self) -> Result<(), IntakeError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| IntakeError::Directory { path: self.root.clone(), source })
    }

    async fn write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await
    }
}

#[async_trait]
impl FileIntake for DiskFileIntake {
    async fn persist(&self, attachment: &Attachment) -> Result<String, IntakeError> {
        let stored_name = unique_file_name(&attachment.file_name);
        let target = self.root.join(&stored_name);

        Self::write_new(&target, &attachment.bytes)
            .await
            .map_err(|source| IntakeError::Write {
                file_name: attachment.file_name.clone(),
                source,
            })?;

        tracing::debug!(file = %attachment.file_name, stored = %stored_name, bytes = attachment.bytes.len(), "stored attachment");
        Ok(format!("{}/{}", self.public_prefix, stored_name))
    }
}

/// `<unix millis>-<uuid><.ext>`, keeping a sanitized extension of the original name
pub fn unique_file_name(original: &str) -> String {
    let extension = Path::new(original)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();

    format!("{}-{}{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple(), extension)
}

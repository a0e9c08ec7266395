//! In-process storage backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{FileStat, FileStore};
use crate::error::{WopiError, WopiResult};
use crate::security::validate_file_id;
use crate::version::Version;

#[derive(Debug, Clone)]
struct StoredBlob {
    content: Vec<u8>,
    modified: DateTime<Utc>,
}

/// Keeps documents in memory. Content and metadata are replaced under one
/// write lock, so readers never see a torn generation.
#[derive(Debug, Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly, e.g. a zero-byte placeholder
    pub async fn insert(&self, file_id: &str, content: impl Into<Vec<u8>>) -> WopiResult<Version> {
        self.write(file_id, &content.into()).await
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, file_id: &str) -> WopiResult<bool> {
        validate_file_id(file_id)?;
        Ok(self.files.read().await.contains_key(file_id))
    }

    async fn read(&self, file_id: &str) -> WopiResult<Vec<u8>> {
        validate_file_id(file_id)?;
        self.files
            .read()
            .await
            .get(file_id)
            .map(|blob| blob.content.clone())
            .ok_or_else(|| WopiError::NotFound(file_id.to_string()))
    }

    async fn write(&self, file_id: &str, content: &[u8]) -> WopiResult<Version> {
        validate_file_id(file_id)?;
        let mut files = self.files.write().await;

        // Keep modification times strictly increasing per file so that
        // rewriting identical bytes still yields a new version.
        let mut modified = Utc::now();
        if let Some(previous) = files.get(file_id) {
            if modified <= previous.modified {
                modified = previous.modified + chrono::Duration::nanoseconds(1);
            }
        }

        files.insert(
            file_id.to_string(),
            StoredBlob {
                content: content.to_vec(),
                modified,
            },
        );
        Ok(Version::derive(content, modified))
    }

    async fn stat(&self, file_id: &str) -> WopiResult<FileStat> {
        validate_file_id(file_id)?;
        self.files
            .read()
            .await
            .get(file_id)
            .map(|blob| FileStat {
                size: blob.content.len() as u64,
                modified: blob.modified,
            })
            .ok_or_else(|| WopiError::NotFound(file_id.to_string()))
    }

    async fn health_check(&self) -> WopiResult<()> {
        Ok(())
    }
}

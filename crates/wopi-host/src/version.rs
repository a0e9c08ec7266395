//! Version tokens for optimistic concurrency
//!
//! A version is derived from the content hash and the modification time of
//! the stored generation. It is deterministic: the same stored state always
//! produces the same token, and any write produces a new one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::WopiResult;
use crate::store::{FileStat, FileStore};

/// Length of the hex token handed to editors
const VERSION_LEN: usize = 16;

/// Host-derived version token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Derive the token for `content` stored at `modified`.
    pub fn derive(content: &[u8], modified: DateTime<Utc>) -> Self {
        let content_hash = Sha256::digest(content);

        let mut hasher = Sha256::new();
        hasher.update(content_hash);
        hasher.update(modified.timestamp().to_be_bytes());
        hasher.update(modified.timestamp_subsec_nanos().to_be_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(VERSION_LEN);

        Version(digest)
    }

    /// Get the raw token value
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derives versions from what the store currently holds.
///
/// Callers that need the version to agree with a concurrent write must hold
/// the file's slot (see [`crate::lock::LockManager::enter`]) around the call.
#[derive(Clone)]
pub struct VersionTracker {
    store: Arc<dyn FileStore>,
}

impl VersionTracker {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }

    /// Current version of a stored document
    pub async fn version_of(&self, file_id: &str) -> WopiResult<Version> {
        let (_, version) = self.snapshot(file_id).await?;
        Ok(version)
    }

    /// Stat and version of the current generation
    pub async fn snapshot(&self, file_id: &str) -> WopiResult<(FileStat, Version)> {
        let stat = self.store.stat(file_id).await?;
        let content = self.store.read(file_id).await?;
        Ok((stat, Version::derive(&content, stat.modified)))
    }

    /// Whether a version held by a caller no longer matches the store
    pub async fn is_stale(&self, file_id: &str, cached: &Version) -> WopiResult<bool> {
        Ok(self.version_of(file_id).await? != *cached)
    }
}

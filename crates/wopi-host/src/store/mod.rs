//! Document byte storage
//!
//! The protocol engine only talks to storage through [`FileStore`], so the
//! backend (local disk, object store, in-memory) is a deployment choice.
//! Every backend must make `write` atomic for concurrent readers: a reader
//! sees either the previous content or the new content, never a prefix.

pub mod local;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::WopiResult;
use crate::version::Version;

pub use local::LocalFileStore;
pub use memory::MemoryFileStore;

/// Size and modification time of a stored document, always describing the
/// same content generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Persistent byte storage keyed by file id
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend_name(&self) -> &'static str;

    async fn exists(&self, file_id: &str) -> WopiResult<bool>;

    /// Read the full content. Fails with `NotFound` for unknown ids.
    async fn read(&self, file_id: &str) -> WopiResult<Vec<u8>>;

    /// Atomically replace (or create) the content and return the version
    /// of the newly stored generation.
    async fn write(&self, file_id: &str, content: &[u8]) -> WopiResult<Version>;

    async fn stat(&self, file_id: &str) -> WopiResult<FileStat>;

    /// Probe that the backend is reachable and writable.
    async fn health_check(&self) -> WopiResult<()>;
}

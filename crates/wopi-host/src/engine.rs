//! WOPI protocol engine
//!
//! Implements CheckFileInfo, GetFile, PutFile and the lock operations on top
//! of a [`FileStore`], a [`LockManager`] and a [`PermissionResolver`]. Every
//! operation on a file runs inside that file's slot, so lock checks and the
//! writes they authorize cannot interleave with another request's transition.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{WopiError, WopiResult};
use crate::lock::{LockInfo, LockManager};
use crate::permission::{PermissionContext, PermissionResolver};
use crate::security::{validate_file_id, validate_lock_token};
use crate::store::FileStore;
use crate::version::{Version, VersionTracker};

/// Engine settings that shape protocol responses
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Extension appended to file ids to form `BaseFileName`
    pub file_extension: String,
    /// `OwnerId` reported in CheckFileInfo
    pub owner_id: String,
    /// `PostMessageOrigin` reported in CheckFileInfo
    pub post_message_origin: String,
    /// Retry a storage call once on an interrupted / timed-out I/O error
    pub retry_transient_io: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            file_extension: "docx".to_string(),
            owner_id: "wopi-server".to_string(),
            post_message_origin: "*".to_string(),
            retry_transient_io: false,
        }
    }
}

/// CheckFileInfo response body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileMetadata {
    pub base_file_name: String,
    pub owner_id: String,
    pub size: u64,
    pub version: Version,
    pub user_id: String,
    pub user_friendly_name: String,
    pub user_can_write: bool,
    pub user_can_not_write_relative: bool,
    pub supports_update: bool,
    pub supports_locks: bool,
    pub supports_get_lock: bool,
    pub supports_extended_lock_length: bool,
    pub disable_print: bool,
    pub last_modified_time: String,
    pub post_message_origin: String,
}

/// GetFile result
#[derive(Debug, Clone)]
pub struct FileContents {
    pub base_file_name: String,
    pub content: Vec<u8>,
    pub version: Version,
}

/// PutFile response body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutFileOutcome {
    pub name: String,
    pub size: u64,
    pub version: Version,
}

/// The WOPI operation set. One instance per server process.
pub struct ProtocolEngine {
    store: Arc<dyn FileStore>,
    versions: VersionTracker,
    locks: LockManager,
    permissions: PermissionResolver,
    config: EngineConfig,
}

impl ProtocolEngine {
    pub fn new(store: Arc<dyn FileStore>, locks: LockManager, config: EngineConfig) -> Self {
        Self {
            versions: VersionTracker::new(store.clone()),
            store,
            locks,
            permissions: PermissionResolver,
            config,
        }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn base_file_name(&self, file_id: &str) -> String {
        format!("{}.{}", file_id, self.config.file_extension)
    }

    /// Run a storage call, retrying once on a transient I/O failure when
    /// enabled.
    async fn storage<T, F, Fut>(&self, op: F) -> WopiResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = WopiResult<T>>,
    {
        match op().await {
            Err(e) if self.config.retry_transient_io && e.is_transient() => {
                warn!("Transient storage error, retrying once: {}", e);
                op().await
            }
            result => result,
        }
    }

    async fn require_exists(&self, file_id: &str) -> WopiResult<()> {
        if self.storage(|| self.store.exists(file_id)).await? {
            Ok(())
        } else {
            Err(WopiError::NotFound(file_id.to_string()))
        }
    }

    /// Metadata about a file and the requesting user's capabilities.
    /// Read-only; the response reflects live state and must not be cached.
    pub async fn check_file_info(
        &self,
        file_id: &str,
        ctx: &PermissionContext,
    ) -> WopiResult<FileMetadata> {
        validate_file_id(file_id)?;
        let (stat, version) = {
            let _guard = self.locks.enter(file_id).await;
            self.storage(|| self.versions.snapshot(file_id)).await?
        };
        let caps = self.permissions.resolve(ctx);

        debug!(
            "CheckFileInfo for {}: size={}, version={}",
            file_id, stat.size, version
        );

        Ok(FileMetadata {
            base_file_name: self.base_file_name(file_id),
            owner_id: self.config.owner_id.clone(),
            size: stat.size,
            version,
            user_id: ctx.user_id.clone(),
            user_friendly_name: ctx.user_name.clone(),
            user_can_write: caps.can_edit,
            user_can_not_write_relative: true,
            supports_update: true,
            supports_locks: true,
            supports_get_lock: true,
            supports_extended_lock_length: true,
            disable_print: !caps.can_print,
            last_modified_time: stat.modified.to_rfc3339(),
            post_message_origin: self.config.post_message_origin.clone(),
        })
    }

    /// File contents. Locks gate writes only, so this ignores lock state.
    pub async fn get_file(&self, file_id: &str) -> WopiResult<FileContents> {
        validate_file_id(file_id)?;
        let _guard = self.locks.enter(file_id).await;
        let stat = self.storage(|| self.store.stat(file_id)).await?;
        let content = self.storage(|| self.store.read(file_id)).await?;

        debug!("Sending file contents for {} ({} bytes)", file_id, content.len());
        Ok(FileContents {
            base_file_name: self.base_file_name(file_id),
            version: Version::derive(&content, stat.modified),
            content,
        })
    }

    /// Replace a file's contents.
    ///
    /// A locked file requires the matching token. An unlocked file only
    /// accepts a write when it has no content yet (missing or zero bytes);
    /// anything else is a conflict, so an editor without a lock cannot
    /// silently clobber a document.
    pub async fn put_file(
        &self,
        file_id: &str,
        content: &[u8],
        lock_token: Option<&str>,
        ctx: &PermissionContext,
    ) -> WopiResult<PutFileOutcome> {
        validate_file_id(file_id)?;
        if let Some(token) = lock_token {
            validate_lock_token(token)?;
        }

        if !self.permissions.resolve(ctx).can_edit {
            warn!("PutFile on {} denied for {}", file_id, ctx.user_id);
            return Err(WopiError::PermissionDenied {
                action: format!("write {}", file_id),
            });
        }

        if content.is_empty() {
            return Err(WopiError::InvalidRequest("No file data received".to_string()));
        }

        let mut guard = self.locks.enter(file_id).await;
        match guard.current_token().map(str::to_string) {
            Some(current) if lock_token == Some(current.as_str()) => {}
            Some(current) => {
                warn!("PutFile on {} rejected: lock mismatch", file_id);
                return Err(WopiError::LockMismatch {
                    file_id: file_id.to_string(),
                    current: Some(current),
                });
            }
            None => {
                let existing = match self.storage(|| self.store.stat(file_id)).await {
                    Ok(stat) => stat.size,
                    Err(WopiError::NotFound(_)) => 0,
                    Err(e) => return Err(e),
                };
                if existing > 0 {
                    warn!("PutFile on {} rejected: file is not locked", file_id);
                    return Err(WopiError::Conflict {
                        reason: format!("{} is not locked and already has content", file_id),
                    });
                }
            }
        }

        let version = self
            .storage(|| self.store.write(file_id, content))
            .await
            .inspect_err(|e| tracing::error!("Error saving {}: {}", file_id, e))?;
        drop(guard);

        info!(
            "File saved: {}, size: {} bytes, version: {}",
            file_id,
            content.len(),
            version
        );
        Ok(PutFileOutcome {
            name: self.base_file_name(file_id),
            size: content.len() as u64,
            version,
        })
    }

    pub async fn lock(&self, file_id: &str, token: &str) -> WopiResult<LockInfo> {
        validate_file_id(file_id)?;
        validate_lock_token(token)?;
        let mut guard = self.locks.enter(file_id).await;
        self.require_exists(file_id).await?;
        guard.lock(token).inspect_err(|e| warn!("Lock on {} failed: {}", file_id, e))
    }

    pub async fn unlock(&self, file_id: &str, token: &str) -> WopiResult<()> {
        validate_file_id(file_id)?;
        validate_lock_token(token)?;
        let mut guard = self.locks.enter(file_id).await;
        self.require_exists(file_id).await?;
        guard.unlock(token).inspect_err(|e| warn!("Unlock on {} failed: {}", file_id, e))
    }

    pub async fn refresh_lock(&self, file_id: &str, token: &str) -> WopiResult<LockInfo> {
        validate_file_id(file_id)?;
        validate_lock_token(token)?;
        let mut guard = self.locks.enter(file_id).await;
        self.require_exists(file_id).await?;
        guard
            .refresh(token)
            .inspect_err(|e| warn!("RefreshLock on {} failed: {}", file_id, e))
    }

    pub async fn unlock_and_relock(
        &self,
        file_id: &str,
        old_token: &str,
        new_token: &str,
    ) -> WopiResult<LockInfo> {
        validate_file_id(file_id)?;
        validate_lock_token(old_token)?;
        validate_lock_token(new_token)?;
        let mut guard = self.locks.enter(file_id).await;
        self.require_exists(file_id).await?;
        guard
            .unlock_and_relock(old_token, new_token)
            .inspect_err(|e| warn!("UnlockAndRelock on {} failed: {}", file_id, e))
    }

    /// Current lock token, for diagnostics and the GET_LOCK override
    pub async fn get_lock(&self, file_id: &str) -> WopiResult<Option<String>> {
        validate_file_id(file_id)?;
        let mut guard = self.locks.enter(file_id).await;
        self.require_exists(file_id).await?;
        Ok(guard.current_token().map(str::to_string))
    }
}

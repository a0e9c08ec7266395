//! WOPI host core
//!
//! Lets a browser-based office editor discover, fetch, lock and save
//! documents held by this host.
//!
//! # Features
//! - CheckFileInfo / GetFile / PutFile
//! - Lock, Unlock, RefreshLock, UnlockAndRelock, GetLock with lazy expiry
//! - Deterministic version tokens for stale-copy detection
//! - Per-file serialization of state transitions
//! - Pluggable storage (local disk, in-memory) and access token validation

pub mod auth;
pub mod engine;
pub mod error;
pub mod lock;
pub mod permission;
pub mod routes;
pub mod security;
pub mod store;
pub mod version;

pub use auth::{AccessGrant, AccessTokenValidator, StaticTokenValidator};
pub use engine::{EngineConfig, FileMetadata, ProtocolEngine, PutFileOutcome};
pub use error::{WopiError, WopiResult};
pub use lock::{LockInfo, LockManager};
pub use permission::{Capabilities, PermissionContext, PermissionResolver};
pub use routes::WopiState;
pub use store::{FileStat, FileStore, LocalFileStore, MemoryFileStore};
pub use version::{Version, VersionTracker};

//! Local disk storage backend
//!
//! Documents live at `{root}/{file_id}.{extension}`. Writes go to a hidden
//! temp file in the same directory, are synced, then renamed over the
//! target, so readers only ever open a complete generation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{FileStat, FileStore};
use crate::error::{WopiError, WopiResult};
use crate::security::validate_file_id;
use crate::version::Version;

/// Bump applied when the filesystem clock did not advance between writes
const MTIME_BUMP: Duration = Duration::from_millis(1);

/// File store backed by a directory on local disk
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
    extension: String,
}

impl LocalFileStore {
    pub fn new(root: impl AsRef<Path>, extension: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the documents directory if it does not exist yet
    pub async fn ensure_root(&self) -> WopiResult<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    fn file_path(&self, file_id: &str) -> WopiResult<PathBuf> {
        validate_file_id(file_id)?;
        Ok(self.root.join(format!("{}.{}", file_id, self.extension)))
    }

    // Temp names start with '.', which no valid file id can, so they never
    // shadow a document.
    fn temp_path(&self, file_id: &str) -> PathBuf {
        self.root
            .join(format!(".{}.{}.tmp", file_id, Uuid::new_v4().simple()))
    }

    /// Number of documents with the configured extension
    pub async fn document_count(&self) -> WopiResult<usize> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_document = path
                .extension()
                .is_some_and(|ext| ext == self.extension.as_str());
            let is_hidden = entry.file_name().to_string_lossy().starts_with('.');
            if is_document && !is_hidden {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn previous_mtime(&self, path: &Path) -> WopiResult<Option<SystemTime>> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_temp(
        &self,
        temp: &Path,
        content: &[u8],
        previous: Option<SystemTime>,
    ) -> WopiResult<()> {
        let mut file = fs::File::create(temp).await?;
        file.write_all(content).await?;
        file.sync_all().await?;

        if let Some(previous) = previous {
            let file = file.into_std().await;
            let written = file.metadata()?.modified()?;
            if written <= previous {
                debug!("Filesystem mtime did not advance, bumping");
                file.set_modified(previous + MTIME_BUMP)?;
            }
        }
        Ok(())
    }
}

fn not_found(file_id: &str, err: std::io::Error) -> WopiError {
    if err.kind() == std::io::ErrorKind::NotFound {
        WopiError::NotFound(file_id.to_string())
    } else {
        WopiError::Io(err)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn exists(&self, file_id: &str) -> WopiResult<bool> {
        let path = self.file_path(file_id)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn read(&self, file_id: &str) -> WopiResult<Vec<u8>> {
        let path = self.file_path(file_id)?;
        fs::read(&path).await.map_err(|e| not_found(file_id, e))
    }

    async fn write(&self, file_id: &str, content: &[u8]) -> WopiResult<Version> {
        let path = self.file_path(file_id)?;
        let temp = self.temp_path(file_id);
        let previous = self.previous_mtime(&path).await?;

        if let Err(e) = self.write_temp(&temp, content, previous).await {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                warn!("Failed to remove temp file {}: {}", temp.display(), cleanup);
            }
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp, &path).await {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                warn!("Failed to remove temp file {}: {}", temp.display(), cleanup);
            }
            return Err(e.into());
        }

        let stat = self.stat(file_id).await?;
        Ok(Version::derive(content, stat.modified))
    }

    async fn stat(&self, file_id: &str) -> WopiResult<FileStat> {
        let path = self.file_path(file_id)?;
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| not_found(file_id, e))?;
        Ok(FileStat {
            size: meta.len(),
            modified: DateTime::<Utc>::from(meta.modified()?),
        })
    }

    async fn health_check(&self) -> WopiResult<()> {
        let meta = fs::metadata(&self.root).await?;
        if !meta.is_dir() {
            return Err(WopiError::Internal(format!(
                "Documents path is not a directory: {}",
                self.root.display()
            )));
        }

        let probe = self
            .root
            .join(format!(".probe-{}", Uuid::new_v4().simple()));
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }
}

//! Local file-based ledger backend.
//!
//! Each resource gets a `<key>.json` record and a `<key>.lock` lease file in
//! one directory. Lease files are created exclusively so two processes on
//! the same machine cannot both acquire the lease. An expired lease is
//! retired by renaming it aside and checking it is the one that was read.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{InstrumentError, Result, StateError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{storage_key, ResourceRecord};

/// Default ledger directory name.
pub const STATE_DIR: &str = ".sfn-instrument";

/// Local file-based ledger store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Directory holding records and leases.
    base_dir: PathBuf,
}

impl LocalStateStore {
    /// Creates a new local store under the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| InstrumentError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local store with a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn record_path(&self, resource: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", storage_key(resource)))
    }

    fn lock_path(&self, resource: &str) -> PathBuf {
        self.base_dir.join(format!("{}.lock", storage_key(resource)))
    }

    /// Ensures the ledger directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StateError::filesystem(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    /// Reads the lease file if it exists.
    async fn read_lock_file(&self, resource: &str) -> Result<Option<LockInfo>> {
        read_lock_at(&self.lock_path(resource)).await
    }

    /// Retires the expired lease `stale` so a new one can be created.
    ///
    /// The lease file is renamed aside first. If the file that moved is not
    /// `stale`, another process took over in between: its lease is put back
    /// and the takeover fails with a conflict.
    async fn take_over(&self, resource: &str, stale: &LockInfo) -> Result<()> {
        let path = self.lock_path(resource);
        let retired = path.with_extension(format!("lock.{}", Uuid::new_v4()));

        match fs::rename(&path, &retired).await {
            Ok(()) => {}
            // Already retired or released; create_new arbitrates from here.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StateError::LockFailed {
                    message: format!("Failed to retire expired lease: {e}"),
                }
                .into());
            }
        }

        let moved = read_lock_at(&retired).await;
        if let Ok(Some(moved)) = &moved
            && moved.lock_id != stale.lock_id
        {
            // hard_link never overwrites, so a lease created meanwhile wins.
            if let Err(e) = fs::hard_link(&retired, &path).await {
                error!(resource = %resource, "Failed to restore lease {}: {e}", moved.lock_id);
            }
            remove_quietly(&retired).await;
            return Err(moved.conflict().into());
        }

        remove_quietly(&retired).await;
        moved.map(|_| ())
    }

    /// Creates the lease file, failing if one already exists.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let path = self.lock_path(&lock_info.resource);
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return match self.read_lock_file(&lock_info.resource).await? {
                    Some(existing) => Err(existing.conflict().into()),
                    None => Err(StateError::LockFailed {
                        message: String::from("Lock file appeared and vanished during acquisition"),
                    }
                    .into()),
                };
            }
            Err(e) => {
                return Err(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }
                .into());
            }
        };

        file.write_all(content.as_bytes()).await.map_err(|e| StateError::LockFailed {
            message: format!("Failed to write lock file: {e}"),
        })?;

        file.sync_all().await.map_err(|e| StateError::LockFailed {
            message: format!("Failed to sync lock file: {e}"),
        })?;

        Ok(())
    }

    /// Deletes the lease file.
    async fn delete_lock_file(&self, resource: &str) -> Result<()> {
        let path = self.lock_path(resource);
        if path.exists() {
            fs::remove_file(&path).await.map_err(|e| StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            })?;
        }
        Ok(())
    }
}

/// Reads and parses a lease file, `None` if it does not exist.
async fn read_lock_at(path: &Path) -> Result<Option<LockInfo>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            }
            .into());
        }
    };

    let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
        message: format!("Failed to parse lock file: {e}"),
    })?;

    Ok(Some(lock_info))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        debug!("Failed to remove {}: {e}", path.display());
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self, resource: &str) -> Result<Option<ResourceRecord>> {
        let path = self.record_path(resource);
        if !path.exists() {
            debug!("Record does not exist: {}", path.display());
            return Ok(None);
        }

        debug!("Loading record from: {}", path.display());

        let content = fs::read_to_string(&path).await.map_err(|e| StateError::Corrupted {
            message: format!("Failed to read record: {e}"),
        })?;

        let record: ResourceRecord = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse record: {e}"),
        })?;
        record.check_version()?;

        Ok(Some(record))
    }

    async fn save(&self, record: &ResourceRecord) -> Result<()> {
        self.ensure_dir().await?;

        let path = self.record_path(&record.resource_arn);
        info!("Saving record to: {}", path.display());

        let content = serde_json::to_string_pretty(record)
            .map_err(|e| StateError::serialization(format!("Failed to serialize record: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::filesystem(format!("Failed to create temp record file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::filesystem(format!("Failed to write record file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::filesystem(format!("Failed to sync record file: {e}")))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StateError::filesystem(format!("Failed to rename record file: {e}")))?;

        debug!("Record saved successfully");
        Ok(())
    }

    async fn acquire_lock(&self, resource: &str, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file(resource).await? {
            if !existing.is_expired() {
                return Err(existing.conflict().into());
            }
            warn!(resource = %resource, holder = %existing.holder, "Expired lease found, taking over");
            self.take_over(resource, &existing).await?;
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(resource, &holder_id);
        self.create_lock_file(&lock_info).await?;

        info!(
            resource = %resource,
            "Acquired lease: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, resource: &str, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file(resource).await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file(resource).await?;
                info!(resource = %resource, "Released lease: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn force_unlock(&self, resource: &str) -> Result<()> {
        warn!(resource = %resource, "Force-removing lease");
        self.delete_lock_file(resource).await
    }

    async fn get_lock_info(&self, resource: &str) -> Result<Option<LockInfo>> {
        self.read_lock_file(resource).await
    }
}

// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Purpose
//
// Provides persistent ownership tracking across daemon restarts and crashes.
// Without it the shim would forget which directory records it created.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup, then to an empty set
//
// ## Migration
//
// Older document shapes (see `state::format`) are upgraded on load and the
// file is rewritten in the current format straight away.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;
use crate::clock::{Clock, SystemClock};
use crate::owned::OwnedSet;
use crate::state::format::{self, Decoded};
use crate::traits::state_store::StateStore;

/// File-based state store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use dns_shim_core::state::FileStateStore;
/// use dns_shim_core::traits::StateStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/state/pihole.state").await?;
///
///     let owned = store.load().await?;
///     store.persist(&owned).await?;
///
///     Ok(())
/// }
/// ```
pub struct FileStateStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FileStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStateStore")
            .field("path", &self.path)
            .finish()
    }
}

impl FileStateStore {
    /// Create a file state store
    ///
    /// Creates the parent directory if needed. Nothing is read until
    /// [`StateStore::load`] is called.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::with_clock(path, Arc::new(SystemClock)).await
    }

    /// Create a file state store with an explicit clock for migrations
    pub async fn with_clock<P: AsRef<Path>>(
        path: P,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(Self { path, clock })
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load state from file with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main state file
    /// 2. If unreadable or corrupt, try loading backup
    /// 3. If backup also fails, start with empty state
    async fn load_with_recovery(&self) -> Decoded {
        let error = match self.read_document(&self.path).await {
            Ok(Some(decoded)) => {
                tracing::debug!("Loaded state from file: {} records", decoded.owned.len());
                return decoded;
            }
            Ok(None) => {
                tracing::info!("No state file at {}, starting empty", self.path.display());
                return empty();
            }
            Err(e) => e,
        };

        tracing::warn!(
            "State file unusable: {}. Attempting recovery from backup.",
            error
        );

        let backup_path = Self::backup_path(&self.path);
        match self.read_document(&backup_path).await {
            Ok(Some(decoded)) => {
                tracing::info!("Recovered state from backup: {} records", decoded.owned.len());

                // Restore corrupted file from backup
                if let Err(restore_err) = Self::restore_from_backup(&self.path, &backup_path).await
                {
                    tracing::error!("Failed to restore state file from backup: {}", restore_err);
                }

                decoded
            }
            Ok(None) => {
                tracing::warn!("No backup file found. Starting with empty state.");
                empty()
            }
            Err(backup_err) => {
                tracing::error!(
                    "Backup also unusable: {}. Starting with empty state.",
                    backup_err
                );
                empty()
            }
        }
    }

    /// Read and decode one document; `Ok(None)` if it does not exist
    async fn read_document(&self, path: &Path) -> Result<Option<Decoded>, Error> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::state_store(format!("Failed to read state file {}: {}", path.display(), e))
        })?;

        format::decode(&content, self.clock.now())
            .map(Some)
            .map_err(|e| Error::state_store(format!("{} ({})", e, path.display())))
    }

    /// Write state to file atomically
    async fn write_state(&self, owned: &OwnedSet) -> Result<(), Error> {
        let json = format::encode(owned)?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Create backup of current file (if it exists)
        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        // Atomic rename (temp -> actual)
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("State written to file: {}", self.path.display());
        Ok(())
    }

    /// Restore state file from backup
    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<(), Error> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored state file from backup");
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        PathBuf::from(temp)
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf().into_os_string();
        backup.push(".backup");
        PathBuf::from(backup)
    }
}

fn empty() -> Decoded {
    Decoded {
        owned: OwnedSet::new(),
        shape: format::DocumentShape::V2,
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<OwnedSet, Error> {
        let decoded = self.load_with_recovery().await;

        if decoded.needs_upgrade() {
            tracing::info!(
                "Upgrading {:?} state document to version {}",
                decoded.shape,
                format::STATE_FORMAT_VERSION
            );
            if let Err(e) = self.write_state(&decoded.owned).await {
                tracing::warn!("Failed to rewrite upgraded state file: {}", e);
            }
        }

        Ok(decoded.owned)
    }

    async fn persist(&self, owned: &OwnedSet) -> Result<(), Error> {
        self.write_state(owned).await
    }
}

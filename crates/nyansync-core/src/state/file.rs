// # File Config Store
//
// File-based implementation of ConfigStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: the new snapshot is written to `<name>.tmp`, then renamed
// - Automatic backup: the previous file is copied to `<name>.backup` before each replace
// - Corruption detection: JSON validation on load
// - Recovery: falls back to the backup if the main file does not parse
//
// A mutation is applied to a copy of the in-memory snapshot; the copy only
// becomes visible after it reached the disk.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::Snapshot;
use crate::traits::config_store::{ConfigStore, Mutation};

/// File-based config store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use nyansync_core::state::FileConfigStore;
/// use nyansync_core::ConfigStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileConfigStore::open("/var/lib/nyansync/config.json").await?;
///
///     let snapshot = store.snapshot().await?;
///     println!("{} jobs configured", snapshot.jobs.len());
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    state: Mutex<Snapshot>,
}

impl FileConfigStore {
    /// Create or load a file config store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing file (a missing file is an empty snapshot)
    /// 3. If the file is corrupted, load the backup instead
    /// 4. If both are corrupted, start with an empty snapshot
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create config directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let snapshot = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Mutex::new(snapshot),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the backing file, replacing the in-memory snapshot
    ///
    /// Used when the file was edited by hand. A file that does not parse is
    /// reported and the current snapshot is kept.
    pub async fn reload_from_disk(&self) -> Result<Snapshot> {
        let mut state = self.state.lock().await;
        let snapshot = Self::load(&self.path).await?;
        tracing::info!(
            path = %self.path.display(),
            jobs = snapshot.jobs.len(),
            "Reloaded config from disk"
        );
        *state = snapshot.clone();
        Ok(snapshot)
    }

    async fn load_with_recovery(path: &Path) -> Result<Snapshot> {
        match Self::load(path).await {
            Ok(snapshot) => {
                tracing::debug!("Loaded config: {} jobs", snapshot.jobs.len());
                Ok(snapshot)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Config file appears corrupted: {}. Attempting recovery from backup.",
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty config.");
                    return Ok(Snapshot::default());
                }

                match Self::load(&backup_path).await {
                    Ok(snapshot) => {
                        tracing::info!("Recovered config from backup: {} jobs", snapshot.jobs.len());

                        if let Err(restore_err) = Self::restore_from_backup(path, &backup_path).await
                        {
                            tracing::error!(
                                "Failed to restore config file from backup: {}",
                                restore_err
                            );
                        }

                        Ok(snapshot)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty config.",
                            backup_err
                        );
                        Ok(Snapshot::default())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<Snapshot> {
        if !path.exists() {
            tracing::debug!("Config file does not exist: {}", path.display());
            return Ok(Snapshot::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::store(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        if content.trim().is_empty() {
            return Ok(Snapshot::default());
        }

        Ok(serde_json::from_str(&content)?)
    }

    /// Write a snapshot atomically (temp file, backup, rename)
    async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| Error::store(format!("Failed to serialize config: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Config written to file: {}", self.path.display());
        Ok(())
    }

    async fn restore_from_backup(path: &Path, backup_path: &Path) -> Result<()> {
        fs::copy(backup_path, path).await.map_err(|e| {
            Error::store(format!(
                "Failed to restore from backup {} to {}: {}",
                backup_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::info!("Restored config file from backup");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.state.lock().await.clone())
    }

    async fn modify(&self, mutation: Mutation) -> Result<Snapshot> {
        let mut state = self.state.lock().await;

        let mut next = state.clone();
        mutation(&mut next)?;
        self.write(&next).await?;

        *state = next.clone();
        Ok(next)
    }
}

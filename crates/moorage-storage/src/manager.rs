// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! The contract manager: authoritative registry of storage folders and the
//! public entry point for capacity management.

use std::path::PathBuf;
use std::sync::Arc;

use moorage_core::{
    Error, FolderIndex, ManagerConfig, Result, SectorGeometry, FOLDER_INDEX_SPACE,
};

use crate::faults::{FaultInjection, NoFaults};
use crate::folder::StorageFolder;
use crate::shutdown::ShutdownCoordinator;
use crate::wal::{recover, RecoveryStats, WriteAheadLog, LOG_FILE_NAME};

/// Manages the storage capacity an operator has given to the host.
///
/// The in-memory registry (folder index to [`StorageFolder`]) is
/// authoritative for runtime queries and is rebuilt at startup solely by
/// replaying the write-ahead log.
pub struct ContractManager {
    wal: Arc<WriteAheadLog>,
    geometry: SectorGeometry,
    shutdown: ShutdownCoordinator,
    recovery_stats: RecoveryStats,
}

impl ContractManager {
    /// Open the manager, running crash recovery before anything else.
    ///
    /// # Errors
    ///
    /// Returns an error if the persist directory cannot be created, the log
    /// is unrecognizable, or recovery cannot restore log/disk consistency.
    pub async fn open(config: ManagerConfig) -> Result<Self> {
        Self::open_with_faults(config, Arc::new(NoFaults)).await
    }

    /// Open the manager with a fault-injection policy (recovery testing).
    ///
    /// # Errors
    ///
    /// See [`ContractManager::open`].
    pub async fn open_with_faults(
        config: ManagerConfig,
        faults: Arc<dyn FaultInjection>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.persist_dir).await?;

        // The folder count can never exceed the index space.
        let max_storage_folders = config.max_storage_folders.min(FOLDER_INDEX_SPACE);

        let (wal, records) = WriteAheadLog::open(
            &config.persist_dir.join(LOG_FILE_NAME),
            config.sync_mode,
            max_storage_folders,
            faults,
        )?;
        let recovery_stats = recover(&wal, &records, &config.geometry).await?;

        // Establish a durable baseline before accepting new operations; any
        // errored records appended by recovery are synced here.
        wal.sync_now().await?;

        if recovery_stats.additions_rolled_back > 0 || recovery_stats.failed_reads > 0 {
            tracing::info!(
                rolled_back = recovery_stats.additions_rolled_back,
                degraded = recovery_stats.failed_reads,
                "storage manager recovery complete"
            );
        }

        Ok(Self {
            wal,
            geometry: config.geometry,
            shutdown: ShutdownCoordinator::new(),
            recovery_stats,
        })
    }

    /// Add a storage folder to the contract manager.
    ///
    /// `path` must be an absolute path to an existing directory; `size` is
    /// the requested capacity in bytes, which must map to a sector count
    /// within the configured bounds and granularity. Safe to call
    /// concurrently; duplicate paths and over-capacity requests are rejected
    /// before any state is touched.
    ///
    /// The call returns once the folder's backing file is fully allocated
    /// and the addition is durably committed. It participates in shutdown
    /// coordination: [`ContractManager::close`] waits for in-flight
    /// additions rather than racing them.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any mutation, or a (possibly
    /// composed) rollback error if allocation or logging fails mid-way.
    pub async fn add_storage_folder(&self, path: impl Into<PathBuf>, size: u64) -> Result<()> {
        let _work = self.shutdown.begin()?;
        let path = path.into();

        // Checks that need no manager state: size bounds and granularity,
        // then the path itself.
        let sectors = self.geometry.validate_size(size)?;
        if !path.is_absolute() {
            return Err(Error::RelativePath);
        }
        let path_info = tokio::fs::metadata(&path).await?;
        if !path_info.is_dir() {
            return Err(Error::NotADirectory);
        }

        let folder = StorageFolder::new(path.clone(), sectors, &self.geometry);
        match self.wal.managed_add_storage_folder(folder).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), sectors, "added storage folder");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "storage folder addition failed");
                Err(err)
            }
        }
    }

    /// Snapshot of all committed storage folders, ordered by index.
    pub async fn storage_folders(&self) -> Vec<Arc<StorageFolder>> {
        let state = self.wal.state.lock().await;
        let mut folders: Vec<_> = state.folders.values().cloned().collect();
        folders.sort_by_key(|folder| folder.index());
        folders
    }

    /// Look up a committed storage folder by index.
    pub async fn storage_folder(&self, index: FolderIndex) -> Option<Arc<StorageFolder>> {
        self.wal.state.lock().await.folders.get(&index).cloned()
    }

    /// What the startup recovery scan found and repaired.
    #[must_use]
    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery_stats
    }

    /// Wait for in-flight operations to finish, then flush the log a final
    /// time. New operations are rejected with
    /// [`Error::ShuttingDown`] from the moment this is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the final log flush fails.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.shutdown().await;
        self.wal.sync_now().await
    }
}

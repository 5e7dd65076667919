// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Crash-recovery and end-to-end tests for storage folder addition.
//!
//! These tests drive the full manager lifecycle: add folders, simulate power
//! failures at the worst moment via fault injection, restart, and verify
//! that the recovery scan restores log/disk consistency.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use moorage_core::{Error, ManagerConfig, SectorGeometry, SyncMode, SECTOR_FILE_NAME};
use tempfile::TempDir;

use crate::faults::test_faults::DisruptAt;
use crate::faults::INCOMPLETE_FOLDER_ADD;
use crate::manager::ContractManager;

use super::log::LOG_FILE_NAME;
use super::reader::{LogReader, LOG_MAGIC, LOG_VERSION};
use super::record::{unfinished_additions, FolderRecord, StateChange};

/// Manages an isolated persist directory plus folder directories to add.
struct Harness {
    temp_dir: TempDir,
    config: ManagerConfig,
}

impl Harness {
    fn new() -> Self {
        Self::with_max_folders(8)
    }

    fn with_max_folders(max_storage_folders: u64) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = ManagerConfig {
            persist_dir: temp_dir.path().join("manager"),
            max_storage_folders,
            sync_mode: SyncMode::Fdatasync,
            // Small sectors keep test allocations to a few hundred KiB.
            geometry: SectorGeometry {
                sector_size: 4096,
                sector_metadata_size: 14,
                min_sectors: 64,
                max_sectors: 1 << 16,
                granularity: 64,
            },
        };
        Self { temp_dir, config }
    }

    /// Create (and return) a directory suitable as a storage folder.
    fn folder_dir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    /// Requested size in bytes for a folder of `sectors` sectors.
    fn size(&self, sectors: u64) -> u64 {
        sectors * self.config.geometry.sector_size
    }

    async fn open(&self) -> ContractManager {
        ContractManager::open(self.config.clone()).await.unwrap()
    }

    fn log_records(&self) -> Vec<StateChange> {
        LogReader::read(&self.config.persist_dir.join(LOG_FILE_NAME))
            .unwrap()
            .records
    }

    /// Seed the persist directory with a log holding exactly `records`, as
    /// if a previous run had written them and crashed.
    fn write_log(&self, records: &[StateChange]) {
        std::fs::create_dir_all(&self.config.persist_dir).unwrap();
        let mut data = Vec::new();
        data.extend_from_slice(LOG_MAGIC);
        data.extend_from_slice(&LOG_VERSION.to_le_bytes());
        for record in records {
            let payload = bincode::serialize(record).unwrap();
            data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            data.extend_from_slice(&payload);
        }
        std::fs::write(self.config.persist_dir.join(LOG_FILE_NAME), data).unwrap();
    }
}

#[tokio::test]
async fn add_storage_folder_success() {
    let harness = Harness::new();
    let manager = harness.open().await;
    let dir = harness.folder_dir("folder-a");

    manager
        .add_storage_folder(dir.clone(), harness.size(64))
        .await
        .unwrap();

    let folders = manager.storage_folders().await;
    assert_eq!(folders.len(), 1);
    let folder = &folders[0];
    assert_eq!(folder.path(), dir.as_path());
    assert_eq!(folder.sectors(), 64);
    assert_eq!(folder.usage(), vec![0u64]);
    assert!(!folder.is_degraded());

    // Idle again: both progress counters reset to zero.
    assert_eq!(folder.progress(), (0, 0));

    // The backing file is exactly sectors * (data + metadata) bytes.
    let expected = 64 * (4096 + 14);
    let len = std::fs::metadata(dir.join(SECTOR_FILE_NAME)).unwrap().len();
    assert_eq!(len, expected);

    // One pending and one committed record.
    let records = harness.log_records();
    assert_eq!(records.len(), 2);
    assert!(records[0].is_pending());
    assert!(matches!(records[1], StateChange::CommittedAdd(_)));
}

#[tokio::test]
async fn duplicate_folder_rejected_without_side_effects() {
    let harness = Harness::new();
    let manager = harness.open().await;
    let dir = harness.folder_dir("folder-a");

    manager
        .add_storage_folder(dir.clone(), harness.size(64))
        .await
        .unwrap();
    let records_before = harness.log_records().len();

    let err = manager
        .add_storage_folder(dir.clone(), harness.size(64))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateFolder));

    // No new log records, and the folder directory holds only the original
    // backing file.
    assert_eq!(harness.log_records().len(), records_before);
    let entries: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from(SECTOR_FILE_NAME)]);
    assert_eq!(manager.storage_folders().await.len(), 1);
}

#[tokio::test]
async fn validation_rejects_before_any_mutation() {
    let harness = Harness::new();
    let manager = harness.open().await;
    let dir = harness.folder_dir("folder-a");

    // Too small, too large, misaligned.
    assert!(matches!(
        manager
            .add_storage_folder(dir.clone(), harness.size(32))
            .await,
        Err(Error::SmallStorageFolder)
    ));
    assert!(matches!(
        manager
            .add_storage_folder(dir.clone(), harness.size((1 << 16) + 64))
            .await,
        Err(Error::LargeStorageFolder)
    ));
    assert!(matches!(
        manager
            .add_storage_folder(dir.clone(), harness.size(96))
            .await,
        Err(Error::Granularity(64))
    ));

    // Relative path.
    assert!(matches!(
        manager
            .add_storage_folder("relative/folder", harness.size(64))
            .await,
        Err(Error::RelativePath)
    ));

    // Nonexistent path.
    assert!(matches!(
        manager
            .add_storage_folder(harness.temp_dir.path().join("missing"), harness.size(64))
            .await,
        Err(Error::Io(_))
    ));

    // A file, not a directory.
    let file_path = harness.temp_dir.path().join("a-file");
    std::fs::write(&file_path, b"not a dir").unwrap();
    assert!(matches!(
        manager.add_storage_folder(file_path, harness.size(64)).await,
        Err(Error::NotADirectory)
    ));

    // None of the rejections touched the log or the registry.
    assert!(harness.log_records().is_empty());
    assert!(manager.storage_folders().await.is_empty());
}

#[tokio::test]
async fn capacity_limit_rejected_without_log_records() {
    let harness = Harness::with_max_folders(2);
    let manager = harness.open().await;

    for name in ["folder-a", "folder-b"] {
        manager
            .add_storage_folder(harness.folder_dir(name), harness.size(64))
            .await
            .unwrap();
    }
    let records_before = harness.log_records().len();

    let err = manager
        .add_storage_folder(harness.folder_dir("folder-c"), harness.size(64))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MaxStorageFolders));
    assert_eq!(harness.log_records().len(), records_before);
    assert_eq!(manager.storage_folders().await.len(), 2);
}

#[tokio::test]
async fn concurrent_additions_get_distinct_indices() {
    let harness = Harness::new();
    let manager = Arc::new(harness.open().await);

    let mut tasks = Vec::new();
    for i in 0..4 {
        let manager = Arc::clone(&manager);
        let dir = harness.folder_dir(&format!("folder-{i}"));
        let size = harness.size(64);
        tasks.push(tokio::spawn(async move {
            manager.add_storage_folder(dir, size).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let folders = manager.storage_folders().await;
    assert_eq!(folders.len(), 4);
    let indices: HashSet<_> = folders.iter().map(|f| f.index()).collect();
    assert_eq!(indices.len(), 4);
}

#[tokio::test]
async fn interrupted_addition_rolled_back_on_restart() {
    let harness = Harness::new();
    let dir = harness.folder_dir("folder-a");
    let sector_file = dir.join(SECTOR_FILE_NAME);

    // Power failure simulated after allocation completes but before the
    // addition is finalized: the call reports no error, exactly as a real
    // crash would leave no error to observe.
    {
        let manager = ContractManager::open_with_faults(
            harness.config.clone(),
            Arc::new(DisruptAt(INCOMPLETE_FOLDER_ADD)),
        )
        .await
        .unwrap();

        manager
            .add_storage_folder(dir.clone(), harness.size(64))
            .await
            .unwrap();

        // The folder never reached the registry, but its pending record and
        // its fully allocated backing file are on disk.
        assert!(manager.storage_folders().await.is_empty());
        assert!(sector_file.exists());
        assert_eq!(unfinished_additions(&harness.log_records()).len(), 1);
    }

    // Restart: recovery must find exactly that interrupted addition, delete
    // its backing file, and close it out in the log.
    let manager = harness.open().await;
    assert_eq!(manager.recovery_stats().additions_rolled_back, 1);
    assert_eq!(manager.recovery_stats().folders_recovered, 0);
    assert!(manager.storage_folders().await.is_empty());
    assert!(!sector_file.exists());
    assert!(unfinished_additions(&harness.log_records()).is_empty());

    // The path is free for reuse after the rollback.
    manager
        .add_storage_folder(dir.clone(), harness.size(64))
        .await
        .unwrap();
    assert_eq!(manager.storage_folders().await.len(), 1);
}

#[tokio::test]
async fn errored_after_committed_stays_out_of_registry() {
    let harness = Harness::new();
    let dir = harness.folder_dir("folder-a");

    // This sequence is what rollback leaves behind when the committed
    // record's flush fails: the folder was briefly in the registry, then
    // removed again, its backing file deleted, and an errored record
    // appended after the committed one. The later record is authoritative,
    // so recovery must not reinstall the folder.
    let rec = FolderRecord {
        index: 7,
        path: dir.clone(),
        sectors: 64,
    };
    harness.write_log(&[
        StateChange::PendingAdd(rec.clone()),
        StateChange::CommittedAdd(rec.clone()),
        StateChange::ErroredAdd { index: 7 },
    ]);

    let manager = harness.open().await;
    assert!(manager.storage_folder(7).await.is_none());
    assert!(manager.storage_folders().await.is_empty());
    assert_eq!(manager.recovery_stats().folders_recovered, 0);
    assert_eq!(manager.recovery_stats().additions_rolled_back, 0);

    // The path is free for a fresh addition.
    manager
        .add_storage_folder(dir.clone(), harness.size(64))
        .await
        .unwrap();
    assert_eq!(manager.storage_folders().await.len(), 1);
}

#[tokio::test]
async fn committed_folders_survive_restart() {
    let harness = Harness::new();
    let dir = harness.folder_dir("folder-a");

    let index = {
        let manager = harness.open().await;
        manager
            .add_storage_folder(dir.clone(), harness.size(128))
            .await
            .unwrap();
        let folders = manager.storage_folders().await;
        manager.close().await.unwrap();
        folders[0].index()
    };

    let manager = harness.open().await;
    assert_eq!(manager.recovery_stats().folders_recovered, 1);
    assert_eq!(manager.recovery_stats().additions_rolled_back, 0);

    let folder = manager.storage_folder(index).await.unwrap();
    assert_eq!(folder.path(), dir.as_path());
    assert_eq!(folder.sectors(), 128);
    assert_eq!(folder.usage(), vec![0u64; 2]);
    assert!(!folder.is_degraded());
}

#[tokio::test]
async fn missing_backing_file_degrades_but_installs_folder() {
    let harness = Harness::new();
    let dir = harness.folder_dir("folder-a");

    {
        let manager = harness.open().await;
        manager
            .add_storage_folder(dir.clone(), harness.size(64))
            .await
            .unwrap();
        manager.close().await.unwrap();
    }

    // Damage the folder between runs.
    std::fs::remove_file(dir.join(SECTOR_FILE_NAME)).unwrap();

    let manager = harness.open().await;
    assert_eq!(manager.recovery_stats().failed_reads, 1);

    let folders = manager.storage_folders().await;
    assert_eq!(folders.len(), 1);
    assert!(folders[0].is_degraded());
    assert_eq!(folders[0].failed_reads(), 1);
}

#[tokio::test]
async fn close_rejects_new_work() {
    let harness = Harness::new();
    let manager = harness.open().await;
    manager.close().await.unwrap();

    let err = manager
        .add_storage_folder(harness.folder_dir("folder-a"), harness.size(64))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
}

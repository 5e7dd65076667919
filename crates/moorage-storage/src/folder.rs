// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Storage folders: host-managed allocation units for sector data.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use moorage_core::{FolderIndex, SectorGeometry, SECTOR_FILE_NAME};
use parking_lot::RwLock;
use tokio::fs::File;
use tokio::sync::Mutex;

/// A storage folder: one operator-registered directory backed by a single
/// pre-allocated file holding a fixed number of sector slots.
///
/// The progress counters are plain atomics so that an in-flight allocation
/// can be observed from any thread without taking the metadata lock. Both
/// counters are zero whenever no operation is active.
#[derive(Debug)]
pub struct StorageFolder {
    index: FolderIndex,
    path: PathBuf,
    sectors: u64,
    total_size: u64,
    /// One bit per sector slot, grouped in 64-sector words; all zero until
    /// sectors are placed (placement is outside this crate).
    usage: RwLock<Vec<u64>>,
    /// Exclusive handle to the backing file. `None` until allocation begins;
    /// reopened during recovery.
    file: Mutex<Option<File>>,
    progress_num: AtomicU64,
    progress_den: AtomicU64,
    /// Number of failed attempts to reopen the backing file at startup.
    /// Nonzero marks the folder degraded but keeps it in the registry.
    failed_reads: AtomicU64,
}

impl StorageFolder {
    /// Create an in-memory folder for `sectors` sectors at `path`.
    ///
    /// The index is assigned later, under the metadata lock, when the
    /// addition is logged.
    #[must_use]
    pub fn new(path: PathBuf, sectors: u64, geometry: &SectorGeometry) -> Self {
        Self {
            index: 0,
            path,
            sectors,
            total_size: geometry.total_size(sectors),
            usage: RwLock::new(vec![0u64; (sectors / 64) as usize]),
            file: Mutex::new(None),
            progress_num: AtomicU64::new(0),
            progress_den: AtomicU64::new(0),
            failed_reads: AtomicU64::new(0),
        }
    }

    /// The folder's unique index.
    #[must_use]
    pub fn index(&self) -> FolderIndex {
        self.index
    }

    /// The operator-registered directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of sector slots in this folder.
    #[must_use]
    pub fn sectors(&self) -> u64 {
        self.sectors
    }

    /// Exact size of the backing file in bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Path of the backing file inside the folder.
    #[must_use]
    pub fn sector_file_path(&self) -> PathBuf {
        self.path.join(SECTOR_FILE_NAME)
    }

    /// Snapshot of the usage bitmap.
    #[must_use]
    pub fn usage(&self) -> Vec<u64> {
        self.usage.read().clone()
    }

    /// Progress of an in-flight allocation as `(written, total)` bytes.
    /// `(0, 0)` when idle.
    #[must_use]
    pub fn progress(&self) -> (u64, u64) {
        (
            self.progress_num.load(Ordering::Relaxed),
            self.progress_den.load(Ordering::Relaxed),
        )
    }

    /// Number of failed backing-file reopens during recovery.
    #[must_use]
    pub fn failed_reads(&self) -> u64 {
        self.failed_reads.load(Ordering::Relaxed)
    }

    /// Whether the folder survived recovery without a readable backing file.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.failed_reads() > 0
    }

    pub(crate) fn set_index(&mut self, index: FolderIndex) {
        self.index = index;
    }

    pub(crate) fn set_progress_denominator(&self, total: u64) {
        self.progress_den.store(total, Ordering::Relaxed);
    }

    pub(crate) fn add_progress(&self, bytes: u64) {
        self.progress_num.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn reset_progress(&self) {
        self.progress_num.store(0, Ordering::Relaxed);
        self.progress_den.store(0, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_read(&self) {
        self.failed_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn file(&self) -> &Mutex<Option<File>> {
        &self.file
    }

    pub(crate) async fn set_file(&self, file: File) {
        *self.file.lock().await = Some(file);
    }

    pub(crate) async fn take_file(&self) -> Option<File> {
        self.file.lock().await.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_folder_is_idle_and_zeroed() {
        let geometry = SectorGeometry {
            sector_size: 4096,
            sector_metadata_size: 14,
            min_sectors: 64,
            max_sectors: 1 << 20,
            granularity: 64,
        };
        let folder = StorageFolder::new(PathBuf::from("/srv/folder"), 128, &geometry);

        assert_eq!(folder.sectors(), 128);
        assert_eq!(folder.total_size(), 128 * (4096 + 14));
        assert_eq!(folder.usage(), vec![0u64; 2]);
        assert_eq!(folder.progress(), (0, 0));
        assert!(!folder.is_degraded());
        assert_eq!(
            folder.sector_file_path(),
            PathBuf::from("/srv/folder").join(SECTOR_FILE_NAME)
        );
    }

    #[test]
    fn progress_counters() {
        let folder =
            StorageFolder::new(PathBuf::from("/srv/f"), 64, &SectorGeometry::default());

        folder.set_progress_denominator(1000);
        folder.add_progress(400);
        folder.add_progress(600);
        assert_eq!(folder.progress(), (1000, 1000));

        folder.reset_progress();
        assert_eq!(folder.progress(), (0, 0));
    }
}

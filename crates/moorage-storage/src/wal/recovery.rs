// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Startup recovery: reconcile the log with the disk.
//!
//! Runs once, before any new operation may proceed. Replaying the log
//! rebuilds the registry of committed folders and identifies additions that
//! were interrupted mid-flight by an unclean shutdown; those are purged from
//! disk and closed out in the log.

use std::collections::HashMap;
use std::sync::Arc;

use moorage_core::{FolderIndex, Result, SectorGeometry, SECTOR_FILE_NAME};

use crate::folder::StorageFolder;

use super::log::WriteAheadLog;
use super::record::{unfinished_additions, FolderRecord, StateChange};

/// Statistics from the startup recovery scan.
#[derive(Debug, Default, Clone)]
pub struct RecoveryStats {
    /// Number of log records replayed.
    pub records_replayed: usize,
    /// Number of committed folders reinstalled into the registry.
    pub folders_recovered: usize,
    /// Number of interrupted additions rolled back.
    pub additions_rolled_back: usize,
    /// Number of folders whose backing file could not be reopened; they are
    /// installed degraded rather than blocking startup.
    pub failed_reads: usize,
}

/// Replay `records` against the freshly opened log.
pub(crate) async fn recover(
    wal: &Arc<WriteAheadLog>,
    records: &[StateChange],
    geometry: &SectorGeometry,
) -> Result<RecoveryStats> {
    let mut stats = RecoveryStats {
        records_replayed: records.len(),
        ..RecoveryStats::default()
    };

    // Left-fold the sequence into the final index -> status mapping. A
    // committed or errored record cancels an earlier pending record for the
    // same index; pending additions that survive the fold are exactly the
    // ones interrupted mid-flight.
    let mut committed: HashMap<FolderIndex, FolderRecord> = HashMap::new();
    for record in records {
        match record {
            StateChange::CommittedAdd(rec) => {
                committed.insert(rec.index, rec.clone());
            }
            // A committed folder can still be rolled back afterwards, when
            // the commit record's own flush fails; the errored record that
            // rollback appends must win over the earlier committed one.
            StateChange::ErroredAdd { index } => {
                committed.remove(index);
            }
            StateChange::PendingAdd(_) => {}
        }
    }
    let unfinished = unfinished_additions(records);

    // Purge interrupted additions: remove the partially created backing
    // file, then close the addition out in the log so disk and log agree.
    let mut interrupted: Vec<_> = unfinished.into_values().collect();
    interrupted.sort_by_key(|rec| rec.index);
    for rec in interrupted {
        let sector_path = rec.path.join(SECTOR_FILE_NAME);
        match tokio::fs::remove_file(&sector_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %sector_path.display(),
                    error = %e,
                    "unable to remove interrupted addition's backing file"
                );
            }
        }

        {
            let mut state = wal.state.lock().await;
            wal.append_change(&mut state, StateChange::ErroredAdd { index: rec.index })?;
        }
        stats.additions_rolled_back += 1;
        tracing::info!(
            index = rec.index,
            path = %rec.path.display(),
            "rolled back storage folder addition interrupted by unclean shutdown"
        );
    }

    // Reinstall committed folders, reopening each backing file read/write. A
    // reopen failure marks the folder degraded; a single damaged folder must
    // not keep the host from starting.
    let mut recovered: Vec<_> = committed.into_values().collect();
    recovered.sort_by_key(|rec| rec.index);
    for rec in recovered {
        let mut folder = StorageFolder::new(rec.path.clone(), rec.sectors, geometry);
        folder.set_index(rec.index);
        let folder = Arc::new(folder);

        let sector_path = folder.sector_file_path();
        match tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&sector_path)
            .await
        {
            Ok(file) => folder.set_file(file).await,
            Err(e) => {
                folder.record_failed_read();
                stats.failed_reads += 1;
                tracing::warn!(
                    index = rec.index,
                    path = %sector_path.display(),
                    error = %e,
                    "difficulties opening storage folder, installing it degraded"
                );
            }
        }

        wal.state.lock().await.folders.insert(rec.index, Arc::clone(&folder));
        stats.folders_recovered += 1;
    }

    Ok(stats)
}

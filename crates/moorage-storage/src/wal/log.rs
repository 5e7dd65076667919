// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! The write-ahead log: durable record sequence, group commit, and the
//! single mutex serializing all metadata mutation.

use std::collections::HashMap;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use moorage_core::{Error, FolderIndex, Result, SyncMode};
use tokio::sync::{watch, Mutex};

use crate::faults::FaultInjection;
use crate::folder::StorageFolder;

use super::reader::{LogReader, LOG_MAGIC, LOG_VERSION};
use super::record::StateChange;

/// Name of the write-ahead log file inside the persist directory.
pub const LOG_FILE_NAME: &str = "manager.wal";

/// Resolution of one flush generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushOutcome {
    /// The flush has not completed yet.
    Pending,
    /// Every record appended before the flush is durable.
    Synced,
    /// The flush failed; appended records may not be durable.
    Failed,
}

/// Everything the metadata lock guards, together: the open log file, the
/// group-commit generation, the registry of committed folders, and the set
/// of in-flight additions. Guarding the log
/// and the registry with one lock keeps log order identical to
/// registry-mutation order.
pub(crate) struct WalState {
    file: BufWriter<std::fs::File>,
    /// Number of records appended since the last flush began.
    unflushed: u64,
    /// Current group-commit generation; every append before the next flush
    /// shares it, and all waiters release together.
    sync_tx: watch::Sender<FlushOutcome>,
    flush_scheduled: bool,
    /// Registry: folders that have reached the committed state.
    pub(crate) folders: HashMap<FolderIndex, Arc<StorageFolder>>,
    /// In-flight additions, keyed by their reserved index. Entries appear
    /// when the pending record is appended and leave at finalize or
    /// rollback, so duplicate-path and capacity checks see the whole window.
    pub(crate) pending: HashMap<FolderIndex, Arc<StorageFolder>>,
}

/// The durable write-ahead log plus the in-memory state it protects.
pub(crate) struct WriteAheadLog {
    pub(crate) state: Mutex<WalState>,
    pub(crate) sync_mode: SyncMode,
    pub(crate) max_storage_folders: u64,
    pub(crate) faults: Arc<dyn FaultInjection>,
}

impl WriteAheadLog {
    /// Open (or create) the log at `path` and replay its records.
    ///
    /// Any torn tail left by a crash mid-append is truncated away so that
    /// records appended from now on stay reachable by replay.
    pub(crate) fn open(
        path: &Path,
        sync_mode: SyncMode,
        max_storage_folders: u64,
        faults: Arc<dyn FaultInjection>,
    ) -> Result<(Arc<Self>, Vec<StateChange>)> {
        let replay = LogReader::read(path)?;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)?;
        if replay.durable_len == 0 {
            file.set_len(0)?;
            file.write_all(LOG_MAGIC)?;
            file.write_all(&LOG_VERSION.to_le_bytes())?;
        } else {
            file.set_len(replay.durable_len)?;
        }
        file.sync_all()?;
        file.seek(SeekFrom::End(0))?;

        let wal = Arc::new(Self {
            state: Mutex::new(WalState {
                file: BufWriter::new(file),
                unflushed: 0,
                sync_tx: watch::channel(FlushOutcome::Pending).0,
                flush_scheduled: false,
                folders: HashMap::new(),
                pending: HashMap::new(),
            }),
            sync_mode,
            max_storage_folders,
            faults,
        });
        Ok((wal, replay.records))
    }

    /// Append one record to the log and schedule (or join) the next flush.
    ///
    /// Callers hold the metadata lock, which is what keeps log order equal
    /// to registry-mutation order. The returned receiver resolves when the
    /// flush covering this record has confirmed durability; every append
    /// since the last flush shares the same receiver (group commit).
    pub(crate) fn append_change(
        self: &Arc<Self>,
        state: &mut WalState,
        change: StateChange,
    ) -> Result<watch::Receiver<FlushOutcome>> {
        let data = bincode::serialize(&change)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        state.file.write_all(&(data.len() as u32).to_le_bytes())?;
        state.file.write_all(&data)?;
        state.unflushed += 1;

        if !state.flush_scheduled {
            state.flush_scheduled = true;
            let wal = Arc::clone(self);
            tokio::spawn(async move { wal.flush().await });
        }
        Ok(state.sync_tx.subscribe())
    }

    /// Schedule a flush even without a new append and wait for it.
    pub(crate) async fn sync_now(self: &Arc<Self>) -> Result<()> {
        let rx = {
            let mut state = self.state.lock().await;
            if !state.flush_scheduled {
                state.flush_scheduled = true;
                let wal = Arc::clone(self);
                tokio::spawn(async move { wal.flush().await });
            }
            state.sync_tx.subscribe()
        };
        Self::wait_for_flush(rx).await
    }

    /// Block until a flush generation resolves.
    pub(crate) async fn wait_for_flush(mut rx: watch::Receiver<FlushOutcome>) -> Result<()> {
        match rx.wait_for(|outcome| *outcome != FlushOutcome::Pending).await {
            Ok(outcome) if *outcome == FlushOutcome::Synced => Ok(()),
            // Failed, or the flush task dropped the sender unresolved.
            _ => Err(Error::WalSync),
        }
    }

    /// One group-commit flush: push the buffered records to the OS, install
    /// a fresh generation so later appends rendezvous separately, then sync
    /// off-lock and release every waiter of the finished generation at once.
    async fn flush(self: Arc<Self>) {
        let (tx, flushed, batch) = {
            let mut state = self.state.lock().await;
            state.flush_scheduled = false;
            let flushed = state
                .file
                .flush()
                .and_then(|()| state.file.get_ref().try_clone());
            let batch = state.unflushed;
            state.unflushed = 0;
            let (new_tx, _) = watch::channel(FlushOutcome::Pending);
            (std::mem::replace(&mut state.sync_tx, new_tx), flushed, batch)
        };
        tracing::trace!(records = batch, "flushing write-ahead log");

        let sync_mode = self.sync_mode;
        let result = match flushed {
            Ok(file) => tokio::task::spawn_blocking(move || match sync_mode {
                SyncMode::None => Ok(()),
                SyncMode::Fdatasync => file.sync_data(),
                SyncMode::Fsync => file.sync_all(),
            })
            .await
            .unwrap_or_else(|e| Err(std::io::Error::other(e))),
            Err(e) => Err(e),
        };

        let outcome = match result {
            Ok(()) => FlushOutcome::Synced,
            Err(e) => {
                tracing::error!(error = %e, "write-ahead log flush failed");
                FlushOutcome::Failed
            }
        };
        // Waiters are always released; a stuck generation would wedge every
        // later metadata operation.
        let _ = tx.send(outcome);
    }
}

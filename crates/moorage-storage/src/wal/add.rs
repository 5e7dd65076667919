// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! The crash-safe storage-folder addition state machine.
//!
//! Adding a folder writes a giant zero-filled file to disk, and failure can
//! occur late in the operation. The log is told about the addition before
//! the slow work starts, so an unclean shutdown at any point can be
//! reconciled at the next startup:
//!
//! 1. Validate, reserve an index, create the backing file, and append a
//!    pending record, all under the metadata lock.
//! 2. Off-lock, wait for the pending record to become durable. Only then may
//!    allocation begin: a crash mid-allocation is now always recoverable
//!    from the log.
//! 3. Off-lock, zero-fill the backing file, reporting progress atomically.
//! 4. Under the lock again, install the folder in the registry and append
//!    the committed record.
//! 5. Off-lock, wait for that record's durability, then report success.
//!
//! Any failure after step 1 rolls back: an errored record is appended and
//! the backing file removed, with failures from both merged into the error
//! surfaced to the caller.

use std::sync::Arc;

use moorage_core::{Error, Result, FOLDER_INDEX_SPACE};
use rand::Rng;
use tokio::io::AsyncWriteExt;

use crate::faults::INCOMPLETE_FOLDER_ADD;
use crate::folder::StorageFolder;

use super::log::WriteAheadLog;
use super::record::{FolderRecord, StateChange};

/// Zero-fill write granularity.
const ALLOCATION_CHUNK: u64 = 4 << 20;

fn record_of(folder: &StorageFolder) -> FolderRecord {
    FolderRecord {
        index: folder.index(),
        path: folder.path().to_path_buf(),
        sectors: folder.sectors(),
    }
}

impl WriteAheadLog {
    /// Add `folder` to the contract manager. The caller
    /// (`ContractManager::add_storage_folder`) has already performed every
    /// check that does not require the metadata lock.
    pub(crate) async fn managed_add_storage_folder(
        self: &Arc<Self>,
        mut folder: StorageFolder,
    ) -> Result<()> {
        let total = folder.total_size();
        let sector_path = folder.sector_file_path();

        // Step 1: validate against current state, reserve an index, create
        // the backing file, and log the pending addition.
        let (folder, rx) = {
            let mut state = self.state.lock().await;

            // The path must not collide with a committed folder or one whose
            // addition is still in flight. A conflicting folder may be on
            // its way out, but a replacement is refused until it is gone
            // entirely.
            if state
                .folders
                .values()
                .chain(state.pending.values())
                .any(|existing| existing.path() == folder.path())
            {
                return Err(Error::DuplicateFolder);
            }

            // Count distinct indices across committed and in-flight folders;
            // the maps share no keys, since pending entries reserve their
            // index until finalize or rollback.
            let unique_folders = (state.folders.len() + state.pending.len()) as u64;
            if unique_folders >= self.max_storage_folders {
                return Err(Error::MaxStorageFolders);
            }

            // Scan for an open index from a random starting point, wrapping
            // around. The random start keeps good average and worst-case
            // runtime on the scan.
            let mut index = rand::thread_rng().gen_range(0..FOLDER_INDEX_SPACE) as u16;
            let mut probes: u64 = 0;
            while state.folders.contains_key(&index) || state.pending.contains_key(&index) {
                index = index.wrapping_add(1);
                probes += 1;
                if probes == FOLDER_INDEX_SPACE {
                    tracing::error!(
                        "folder index space exhausted even though the capacity check passed"
                    );
                    return Err(Error::MaxStorageFolders);
                }
            }
            folder.set_index(index);

            let file = tokio::fs::File::create(&sector_path).await?;

            // Arm the progress report for the add operation.
            folder.set_progress_denominator(total);

            let folder = Arc::new(folder);
            folder.set_file(file).await;

            let rx = match self.append_change(&mut state, StateChange::PendingAdd(record_of(&folder)))
            {
                Ok(rx) => rx,
                Err(err) => {
                    // The pending record never reached the log, so there is
                    // nothing durable to cancel; undo the partial work here.
                    let mut errors = vec![err];
                    folder.take_file().await;
                    if let Err(e) = tokio::fs::remove_file(&sector_path).await {
                        errors.push(e.into());
                    }
                    return match Error::compose(errors) {
                        Some(e) => Err(e),
                        None => Ok(()),
                    };
                }
            };
            state.pending.insert(folder.index(), Arc::clone(&folder));
            (folder, rx)
        };

        // Steps 2-5; any failure past this point must append an errored
        // record, because the log may already carry the pending record.
        match self.allocate_and_commit(&folder, rx, total).await {
            Ok(()) => Ok(()),
            Err(err) => self.rollback_addition(&folder, err).await,
        }
    }

    /// Steps 2-5: wait for the pending record, allocate, finalize.
    async fn allocate_and_commit(
        self: &Arc<Self>,
        folder: &Arc<StorageFolder>,
        pending_rx: tokio::sync::watch::Receiver<super::log::FlushOutcome>,
        total: u64,
    ) -> Result<()> {
        // Block until the pending record is durable.
        Self::wait_for_flush(pending_rx).await?;

        allocate(folder, total).await?;

        // Recovery testing only: pretend the process lost power after the
        // allocation finished but before the addition was finalized.
        if self.faults.disrupt(INCOMPLETE_FOLDER_ADD) {
            return Ok(());
        }

        let committed_rx = {
            let mut state = self.state.lock().await;

            // No operation is actively happening anymore.
            folder.reset_progress();

            state.pending.remove(&folder.index());
            state.folders.insert(folder.index(), Arc::clone(folder));
            self.append_change(&mut state, StateChange::CommittedAdd(record_of(folder)))?
        };

        // The addition is only reported complete once the committed record
        // has synced.
        Self::wait_for_flush(committed_rx).await
    }

    /// The log is append-only, so undoing a logged addition means appending
    /// a record that marks it errored, then removing the backing file. Both
    /// are attempted unconditionally and any failures are merged with the
    /// triggering error rather than discarded.
    async fn rollback_addition(
        self: &Arc<Self>,
        folder: &Arc<StorageFolder>,
        err: Error,
    ) -> Result<()> {
        let mut errors = vec![err];
        {
            let mut state = self.state.lock().await;
            state.pending.remove(&folder.index());
            state.folders.remove(&folder.index());
            if let Err(e) = self.append_change(
                &mut state,
                StateChange::ErroredAdd { index: folder.index() },
            ) {
                errors.push(e);
            }
        }
        folder.reset_progress();
        folder.take_file().await;
        if let Err(e) = tokio::fs::remove_file(folder.sector_file_path()).await {
            errors.push(e.into());
        }

        tracing::warn!(
            index = folder.index(),
            path = %folder.path().display(),
            "rolled back storage folder addition"
        );
        match Error::compose(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Write empty data across the whole backing file to reserve space on disk,
/// updating the folder's progress numerator after each chunk so the
/// operation is observable without locking, and flush the result to durable
/// storage.
async fn allocate(folder: &StorageFolder, total: u64) -> Result<()> {
    let mut guard = folder.file().lock().await;
    let file = guard
        .as_mut()
        .ok_or_else(|| Error::Io(std::io::Error::other("backing file is not open")))?;

    let zeroes = vec![0u8; ALLOCATION_CHUNK.min(total) as usize];
    let mut written: u64 = 0;
    while written < total {
        let chunk = zeroes.len().min((total - written) as usize);
        file.write_all(&zeroes[..chunk]).await?;
        written += chunk as u64;
        folder.add_progress(chunk as u64);
    }
    file.sync_all().await?;
    Ok(())
}

// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Write-ahead log records for crash recovery.
//!
//! Each record describes one transition of a storage folder's addition,
//! allowing startup recovery to identify operations interrupted by an
//! unclean shutdown.

use std::collections::HashMap;
use std::path::PathBuf;

use moorage_core::FolderIndex;
use serde::{Deserialize, Serialize};

/// The durable description of a storage folder carried by log records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    /// Folder index, unique across committed and in-flight folders.
    pub index: FolderIndex,
    /// Absolute path of the registered directory.
    pub path: PathBuf,
    /// Number of sector slots the folder holds.
    pub sectors: u64,
}

/// A single state change in the write-ahead log.
///
/// Records follow a pending/committed pattern:
/// - `PendingAdd` is logged BEFORE the backing file is allocated
/// - `CommittedAdd` is logged AFTER allocation succeeds
/// - `ErroredAdd` cancels a pending addition that failed or was rolled back
///
/// Later records are authoritative over earlier ones for the same index: a
/// committed or errored record cancels any earlier pending record. During
/// recovery, a `PendingAdd` with no later `CommittedAdd` or `ErroredAdd` is
/// an addition interrupted mid-flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateChange {
    /// Intent to add a storage folder; allocation follows.
    PendingAdd(FolderRecord),
    /// The folder was fully allocated and entered the registry.
    CommittedAdd(FolderRecord),
    /// The addition of the folder at `index` failed and was rolled back.
    ErroredAdd {
        /// Index named by the cancelled pending record.
        index: FolderIndex,
    },
}

impl StateChange {
    /// Returns the folder index this record refers to.
    #[must_use]
    pub fn index(&self) -> FolderIndex {
        match self {
            Self::PendingAdd(rec) | Self::CommittedAdd(rec) => rec.index,
            Self::ErroredAdd { index } => *index,
        }
    }

    /// Returns true if this record opens an addition (not yet committed).
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingAdd(_))
    }
}

/// Fold a replayed record sequence into the set of additions that were still
/// in flight when the log ends, keyed by index.
///
/// An addition that finished (committed or errored) is discoverable through
/// the presence of its terminating record later in the sequence.
#[must_use]
pub fn unfinished_additions(records: &[StateChange]) -> HashMap<FolderIndex, FolderRecord> {
    let mut pending = HashMap::new();
    for record in records {
        match record {
            StateChange::PendingAdd(rec) => {
                pending.insert(rec.index, rec.clone());
            }
            StateChange::CommittedAdd(rec) => {
                pending.remove(&rec.index);
            }
            StateChange::ErroredAdd { index } => {
                pending.remove(index);
            }
        }
    }
    pending
}

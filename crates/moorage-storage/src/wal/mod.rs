// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Write-ahead log for crash-safe storage-folder management.
//!
//! The log provides durability guarantees by recording state transitions
//! before performing them. On startup, interrupted operations are identified
//! and rolled back.
//!
//! # How It Works
//!
//! Adding a storage folder follows this pattern:
//!
//! 1. Append a `PendingAdd` record and wait for it to sync
//! 2. Zero-fill the folder's backing file (slow, off-lock)
//! 3. Install the folder in the registry and append a `CommittedAdd` record
//! 4. Wait for that record to sync, then report success
//!
//! If the process crashes at any point:
//! - Before step 1 synced: the record is at most a torn tail, treated as
//!   absent; nothing happened
//! - After step 1 but before step 3: a `PendingAdd` without a terminating
//!   record; recovery deletes the partially allocated backing file and
//!   appends a matching `ErroredAdd`
//! - After step 3: the addition is replayed into the registry
//!
//! # Group commit
//!
//! Appends do not sync individually. All records appended since the last
//! flush share one completion signal, released exactly once when that
//! flush's durability is confirmed, so concurrent folder additions pay for
//! one sync between them.

mod add;
mod log;
mod reader;
mod record;
mod recovery;

#[cfg(test)]
mod durability_tests;

pub use log::LOG_FILE_NAME;
pub use record::{unfinished_additions, FolderRecord, StateChange};
pub use recovery::RecoveryStats;

pub(crate) use log::WriteAheadLog;
pub(crate) use recovery::recover;

// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Fault injection for crash-recovery testing.

/// Hook consulted at hand-picked points in long-running operations.
///
/// Production code uses [`NoFaults`]. Recovery tests install an
/// implementation that returns `true` at a named point, which makes the
/// operation stop as if the process had lost power there.
pub trait FaultInjection: Send + Sync {
    /// Returns `true` if the operation should be disrupted at `point`.
    fn disrupt(&self, point: &str) -> bool;
}

/// The production fault policy: never disrupt anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaults;

impl FaultInjection for NoFaults {
    fn disrupt(&self, _point: &str) -> bool {
        false
    }
}

/// Disruption point: allocation finished but the addition was not finalized.
/// Simulates a power failure in the middle of adding a storage folder.
pub(crate) const INCOMPLETE_FOLDER_ADD: &str = "incomplete-folder-add";

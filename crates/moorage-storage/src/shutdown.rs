// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Shutdown coordination for in-flight operations.
//!
//! Long-running operations register intent before starting and signal
//! completion when done, so a graceful shutdown can wait for them instead of
//! racing them. An in-flight operation is never interrupted; it can only be
//! waited on to completion.

use moorage_core::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Marks one in-flight operation. Dropping the guard signals completion.
#[derive(Debug)]
pub(crate) struct WorkGuard {
    _done: mpsc::Sender<()>,
}

/// Tracks in-flight operations and drains them at shutdown.
#[derive(Debug)]
pub(crate) struct ShutdownCoordinator {
    /// Cloned into each [`WorkGuard`]; taken (and dropped) at shutdown so the
    /// receiver closes once every outstanding guard is gone.
    guard_tx: Mutex<Option<mpsc::Sender<()>>>,
    drained: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl ShutdownCoordinator {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            guard_tx: Mutex::new(Some(tx)),
            drained: tokio::sync::Mutex::new(rx),
        }
    }

    /// Register intent to do work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once shutdown has begun.
    pub(crate) fn begin(&self) -> Result<WorkGuard> {
        match self.guard_tx.lock().as_ref() {
            Some(tx) => Ok(WorkGuard { _done: tx.clone() }),
            None => Err(Error::ShuttingDown),
        }
    }

    /// Begin shutdown and wait for every outstanding guard to drop.
    ///
    /// Idempotent; later calls return once the first drain has finished.
    pub(crate) async fn shutdown(&self) {
        drop(self.guard_tx.lock().take());
        let mut rx = self.drained.lock().await;
        // The guards never send; recv resolves to None once the last sender
        // clone is dropped.
        while rx.recv().await.is_some() {}
    }
}

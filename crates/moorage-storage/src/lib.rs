// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Storage-capacity management for the Moorage storage host.
//!
//! This crate provides:
//! - The [`ContractManager`], the authoritative registry of storage folders
//! - A write-ahead log making multi-step folder operations crash safe
//! - Startup recovery that reconciles the log with the disk
//!
//! Adding a storage folder pre-allocates a large zero-filled backing file,
//! which can take a long time and can fail late. The write-ahead log brackets
//! the slow work with durable pending/committed records so that an unclean
//! shutdown at any point is recoverable: on the next start, interrupted
//! additions are rolled back and committed folders are reinstalled.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod folder;
pub mod manager;
mod shutdown;
pub mod wal;

pub use faults::{FaultInjection, NoFaults};
pub use folder::StorageFolder;
pub use manager::ContractManager;
pub use wal::{RecoveryStats, StateChange};

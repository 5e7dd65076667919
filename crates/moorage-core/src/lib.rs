// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Core types and utilities for the Moorage storage host.
//!
//! This crate provides the building blocks shared across Moorage components:
//! - Configuration management
//! - Error types
//! - Sector geometry and folder-index types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{ManagerConfig, SyncMode};
pub use error::{Error, Result};
pub use types::{FolderIndex, SectorGeometry, FOLDER_INDEX_SPACE, SECTOR_FILE_NAME};

// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Configuration management for the Moorage storage manager.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{SectorGeometry, FOLDER_INDEX_SPACE};

/// Sync mode for write-ahead log durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// No explicit sync - rely on the OS.
    None,
    /// Use fdatasync after each flush.
    #[default]
    Fdatasync,
    /// Use full fsync after each flush.
    Fsync,
}

/// Configuration for the storage-capacity manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory holding the manager's write-ahead log.
    pub persist_dir: PathBuf,
    /// Maximum number of storage folders, committed and in flight combined.
    /// Bounded by the folder index space (65536).
    pub max_storage_folders: u64,
    /// Sync mode for log durability.
    pub sync_mode: SyncMode,
    /// Sector geometry for all storage folders.
    pub geometry: SectorGeometry,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from("moorage"),
            max_storage_folders: FOLDER_INDEX_SPACE,
            sync_mode: SyncMode::default(),
            geometry: SectorGeometry::default(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(crate::Error::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed.
    pub fn parse(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

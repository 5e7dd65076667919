// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types for Moorage.

use thiserror::Error;

/// A specialized `Result` type for Moorage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during Moorage operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested storage folder holds fewer than the minimum sectors.
    #[error("storage folder is too small")]
    SmallStorageFolder,

    /// The requested storage folder holds more than the maximum sectors.
    #[error("storage folder is too large")]
    LargeStorageFolder,

    /// The folder's sector count is not a multiple of the granularity.
    #[error("storage folder size must be a multiple of {0} sectors")]
    Granularity(u64),

    /// The storage folder path is not absolute.
    #[error("storage folder path must be an absolute path")]
    RelativePath,

    /// The storage folder path does not name a directory.
    #[error("storage folder path does not point to a directory")]
    NotADirectory,

    /// A folder with the same path is already registered or being added.
    #[error("storage folder with same path already exists")]
    DuplicateFolder,

    /// The maximum number of storage folders has been reached.
    #[error("maximum number of storage folders reached")]
    MaxStorageFolders,

    /// The manager is shutting down and will not accept new work.
    #[error("storage manager is shutting down")]
    ShuttingDown,

    /// The write-ahead log could not be made durable.
    #[error("write-ahead log sync failed")]
    WalSync,

    /// The write-ahead log file is not recognizable.
    #[error("corrupt write-ahead log: {0}")]
    Corrupt(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Several failures occurred during one operation; none is discarded.
    #[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<Error>),
}

impl Error {
    /// Merge the errors of an operation whose cleanup can itself fail.
    ///
    /// Returns `None` when the list is empty, the sole error when there is
    /// one, and [`Error::Multiple`] otherwise. Nested `Multiple`s are
    /// flattened so a rollback that composes twice stays one level deep.
    #[must_use]
    pub fn compose(errors: Vec<Error>) -> Option<Error> {
        let mut flat = Vec::new();
        for err in errors {
            match err {
                Error::Multiple(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Error::Multiple(flat)),
        }
    }
}

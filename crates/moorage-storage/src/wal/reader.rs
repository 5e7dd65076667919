// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Log replay for startup recovery.
//!
//! Reads the record sequence back from disk, tolerating a torn tail left by
//! a crash mid-append.

use std::io::{BufReader, Read};
use std::path::Path;

use moorage_core::{Error, Result};

use super::record::StateChange;

/// Log file format version.
pub(crate) const LOG_VERSION: u32 = 1;

/// Magic bytes for the log file header.
pub(crate) const LOG_MAGIC: &[u8; 4] = b"MWAL";

/// Byte length of the file header (magic + version).
pub(crate) const LOG_HEADER_LEN: u64 = 8;

/// The replayed contents of a write-ahead log file.
pub(crate) struct LogReader {
    /// Records replayed in append order.
    pub(crate) records: Vec<StateChange>,
    /// Byte offset just past the last whole record. Anything beyond this is
    /// a torn tail from a crash mid-append and must be truncated away before
    /// the log is reopened for appending.
    pub(crate) durable_len: u64,
}

impl LogReader {
    /// Read all whole records from `path`.
    ///
    /// A missing file replays as an empty log. An incomplete or undecodable
    /// final record is evidence of a crash mid-write and is treated as if
    /// absent: replay stops there.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupt`] if the header is unrecognizable, or an I/O
    /// error other than a clean end-of-file.
    pub(crate) fn read(path: &Path) -> Result<Self> {
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self { records: Vec::new(), durable_len: 0 });
            }
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(file);

        // A file shorter than its header is a crash between creation and the
        // first sync; replay it as empty so the header gets rewritten.
        let mut header = [0u8; LOG_HEADER_LEN as usize];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::warn!("log file shorter than its header, treating as empty");
                return Ok(Self { records: Vec::new(), durable_len: 0 });
            }
            Err(e) => return Err(e.into()),
        }
        if &header[..4] != LOG_MAGIC {
            return Err(Error::Corrupt("invalid log magic".to_string()));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != LOG_VERSION {
            return Err(Error::Corrupt(format!("unsupported log version: {version}")));
        }

        let mut records = Vec::new();
        let mut durable_len = LOG_HEADER_LEN;

        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;

            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::warn!(
                        record = records.len(),
                        "truncated log record, treating as crash evidence"
                    );
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            match bincode::deserialize::<StateChange>(&data) {
                Ok(record) => {
                    records.push(record);
                    durable_len += 4 + len as u64;
                }
                Err(e) => {
                    // A record that frames correctly but does not decode can
                    // only come from a torn write; stop replay here.
                    tracing::warn!(
                        record = records.len(),
                        error = %e,
                        "undecodable log record, stopping replay"
                    );
                    break;
                }
            }
        }

        Ok(Self { records, durable_len })
    }
}

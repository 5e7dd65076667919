// Copyright 2025 The Moorage Authors
// SPDX-License-Identifier: Apache-2.0

//! Sector geometry and storage-folder index types.

use serde::{Deserialize, Serialize};

/// Identifier of a storage folder.
///
/// Indices are unique across both committed folders and folders whose
/// addition is still in flight.
pub type FolderIndex = u16;

/// Number of distinct folder indices (the full `u16` range).
pub const FOLDER_INDEX_SPACE: u64 = 1 << 16;

/// Name of the backing file inside a storage folder that houses sector data.
pub const SECTOR_FILE_NAME: &str = "hostdata.dat";

/// On-disk geometry of a storage folder.
///
/// A storage folder is one contiguous file holding a fixed number of sector
/// slots; each slot needs `sector_size` bytes of bulk data plus
/// `sector_metadata_size` bytes of lookup metadata. The defaults are the
/// production values; tests shrink them to keep allocations small.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorGeometry {
    /// Size of one sector's data region in bytes.
    pub sector_size: u64,
    /// Per-sector metadata overhead in bytes.
    pub sector_metadata_size: u64,
    /// Minimum number of sectors a storage folder may hold.
    pub min_sectors: u64,
    /// Maximum number of sectors a storage folder may hold.
    pub max_sectors: u64,
    /// Sector-count granularity; folder sizes must be a multiple of this.
    pub granularity: u64,
}

impl Default for SectorGeometry {
    fn default() -> Self {
        Self {
            sector_size: 1 << 22, // 4 MiB
            sector_metadata_size: 14,
            min_sectors: 1 << 6,
            max_sectors: 1 << 32,
            granularity: 1 << 6,
        }
    }
}

impl SectorGeometry {
    /// Number of whole sectors that fit in `size` bytes.
    #[must_use]
    pub const fn sectors_for(&self, size: u64) -> u64 {
        size / self.sector_size
    }

    /// Total on-disk size of a folder holding `sectors` sectors.
    #[must_use]
    pub const fn total_size(&self, sectors: u64) -> u64 {
        sectors * (self.sector_size + self.sector_metadata_size)
    }

    /// Validate a requested folder size, returning the sector count.
    ///
    /// # Errors
    ///
    /// Returns an error if the size maps to fewer than `min_sectors`, more
    /// than `max_sectors`, or a sector count that is not a multiple of the
    /// granularity.
    pub fn validate_size(&self, size: u64) -> crate::Result<u64> {
        let sectors = self.sectors_for(size);
        if sectors > self.max_sectors {
            return Err(crate::Error::LargeStorageFolder);
        }
        if sectors < self.min_sectors {
            return Err(crate::Error::SmallStorageFolder);
        }
        if sectors % self.granularity != 0 {
            return Err(crate::Error::Granularity(self.granularity));
        }
        Ok(sectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_sizes() {
        let g = SectorGeometry::default();
        assert_eq!(g.sector_size, 4 * 1024 * 1024);
        assert_eq!(g.total_size(64), 64 * (g.sector_size + 14));
    }

    #[test]
    fn validate_size_bounds() {
        let g = SectorGeometry {
            sector_size: 4096,
            sector_metadata_size: 14,
            min_sectors: 8,
            max_sectors: 64,
            granularity: 8,
        };

        // In range and aligned.
        assert_eq!(g.validate_size(8 * 4096).unwrap(), 8);
        assert_eq!(g.validate_size(64 * 4096).unwrap(), 64);

        // Too small, too large, misaligned.
        assert!(matches!(
            g.validate_size(4 * 4096),
            Err(crate::Error::SmallStorageFolder)
        ));
        assert!(matches!(
            g.validate_size(128 * 4096),
            Err(crate::Error::LargeStorageFolder)
        ));
        assert!(matches!(
            g.validate_size(12 * 4096),
            Err(crate::Error::Granularity(8))
        ));
    }
}

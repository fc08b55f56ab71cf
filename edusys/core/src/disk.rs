//! The simulated block device: a fixed track/sector/block geometry over an
//! opaque durable key-value byte store.
//!
//! Cells hold fixed-length hex strings (two characters per stored byte).
//! The backend only needs get/put by flat index; durability is its problem.

use crate::MachineSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Number of tracks.
pub const TRACKS: u8 = 4;
/// Number of sectors per track.
pub const SECTORS: u8 = 8;
/// Number of blocks per track and sector.
pub const BLOCKS_PER: u8 = 8;
/// Block size in bytes.
pub const BLOCK_SIZE: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiskError {
    #[error("requested block address is outside the disk geometry")]
    OutOfRange,
    #[error("data exceeds block capacity")]
    DataTooLarge,
}

/// A track/sector/block address triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tsb {
    pub track: u8,
    pub sector: u8,
    pub block: u8,
}

impl Tsb {
    /// The reserved master-record address, doubling as the end-of-chain
    /// sentinel in file links.
    pub const ZERO: Tsb = Tsb {
        track: 0,
        sector: 0,
        block: 0,
    };

    pub fn new(track: u8, sector: u8, block: u8) -> Self {
        Self {
            track,
            sector,
            block,
        }
    }

    /// True for the (0,0,0) end-of-chain sentinel.
    pub fn is_end(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Tsb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.track, self.sector, self.block)
    }
}

/// The persistence seam underneath the simulated disk: an opaque durable
/// byte store addressed by flat cell index.
pub trait StorageBackend: fmt::Debug {
    fn get(&self, key: u32) -> Option<String>;
    fn put(&mut self, key: u32, value: String);
}

/// In-memory backend. The default for tests and the CLI; snapshots make it
/// durable.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    cells: HashMap<u32, String>,
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: u32) -> Option<String> {
        self.cells.get(&key).cloned()
    }

    fn put(&mut self, key: u32, value: String) {
        self.cells.insert(key, value);
    }
}

fn bits_for(count: u8) -> u32 {
    (count as u32).next_power_of_two().trailing_zeros()
}

/// The block device itself: bounds-checked cell access over the backend.
#[derive(Debug)]
pub struct BlockDevice {
    backend: Box<dyn StorageBackend>,
    tracks: u8,
    sectors: u8,
    blocks_per: u8,
    block_size: usize,
    track_shift: u32,
    sector_shift: u32,
}

impl BlockDevice {
    pub fn new(backend: Box<dyn StorageBackend>, spec: &MachineSpec) -> Self {
        Self {
            backend,
            tracks: spec.disk_tracks,
            sectors: spec.disk_sectors,
            blocks_per: spec.disk_blocks_per,
            block_size: spec.disk_block_size,
            track_shift: bits_for(spec.disk_sectors) + bits_for(spec.disk_blocks_per),
            sector_shift: bits_for(spec.disk_blocks_per),
        }
    }

    pub fn in_memory(spec: &MachineSpec) -> Self {
        Self::new(Box::<MemoryBackend>::default(), spec)
    }

    pub fn tracks(&self) -> u8 {
        self.tracks
    }

    pub fn sectors(&self) -> u8 {
        self.sectors
    }

    pub fn blocks_per(&self) -> u8 {
        self.blocks_per
    }

    /// Block capacity in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Read the cell at a TSB. Never-written cells read as all zeros.
    pub fn read(&self, tsb: Tsb) -> Result<String, DiskError> {
        let index = self.index(tsb)?;
        Ok(self
            .backend
            .get(index)
            .unwrap_or_else(|| "0".repeat(self.block_size * 2)))
    }

    /// Write the cell at a TSB.
    pub fn write(&mut self, tsb: Tsb, data: &str) -> Result<(), DiskError> {
        if data.len() > self.block_size * 2 {
            return Err(DiskError::DataTooLarge);
        }
        let index = self.index(tsb)?;
        self.backend.put(index, data.to_string());
        Ok(())
    }

    /// Flatten a TSB into the backend key: track, sector, and block packed
    /// into disjoint bit ranges.
    fn index(&self, tsb: Tsb) -> Result<u32, DiskError> {
        if tsb.track >= self.tracks || tsb.sector >= self.sectors || tsb.block >= self.blocks_per {
            return Err(DiskError::OutOfRange);
        }
        Ok(((tsb.track as u32) << self.track_shift)
            | ((tsb.sector as u32) << self.sector_shift)
            | tsb.block as u32)
    }

    /// Every cell address in geometry order.
    pub fn addresses(&self) -> impl Iterator<Item = Tsb> {
        let (tracks, sectors, blocks) = (self.tracks, self.sectors, self.blocks_per);
        (0..tracks).flat_map(move |t| {
            (0..sectors).flat_map(move |s| (0..blocks).map(move |b| Tsb::new(t, s, b)))
        })
    }

    /// The full device contents, for the display layer.
    pub fn contents(&self) -> Vec<Vec<Vec<String>>> {
        (0..self.tracks)
            .map(|t| {
                (0..self.sectors)
                    .map(|s| {
                        (0..self.blocks_per)
                            .map(|b| {
                                self.read(Tsb::new(t, s, b))
                                    .unwrap_or_else(|_| "0".repeat(self.block_size * 2))
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect()
    }

    pub(crate) fn export_cells(&self) -> Vec<(u32, String)> {
        self.addresses()
            .filter_map(|tsb| {
                let index = self.index(tsb).ok()?;
                self.backend.get(index).map(|value| (index, value))
            })
            .collect()
    }

    pub(crate) fn import_cells(&mut self, cells: Vec<(u32, String)>) {
        for (index, value) in cells {
            self.backend.put(index, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> BlockDevice {
        BlockDevice::in_memory(&MachineSpec::default())
    }

    #[test]
    fn cells_round_trip_by_address() {
        let mut dev = device();
        dev.write(Tsb::new(1, 2, 3), "AB").unwrap();
        dev.write(Tsb::new(3, 7, 7), "CD").unwrap();
        assert_eq!(dev.read(Tsb::new(1, 2, 3)).unwrap(), "AB");
        assert_eq!(dev.read(Tsb::new(3, 7, 7)).unwrap(), "CD");
    }

    #[test]
    fn unwritten_cells_read_as_zeros() {
        let dev = device();
        assert_eq!(dev.read(Tsb::ZERO).unwrap(), "0".repeat(128));
    }

    #[test]
    fn addresses_outside_the_geometry_are_rejected() {
        let mut dev = device();
        assert_eq!(dev.read(Tsb::new(4, 0, 0)), Err(DiskError::OutOfRange));
        assert_eq!(dev.read(Tsb::new(0, 8, 0)), Err(DiskError::OutOfRange));
        assert_eq!(dev.write(Tsb::new(0, 0, 8), "00"), Err(DiskError::OutOfRange));
    }

    #[test]
    fn oversized_writes_are_rejected() {
        let mut dev = device();
        let too_big = "0".repeat(BLOCK_SIZE * 2 + 2);
        assert_eq!(
            dev.write(Tsb::ZERO, &too_big),
            Err(DiskError::DataTooLarge)
        );
    }

    #[test]
    fn distinct_addresses_map_to_distinct_keys() {
        let dev = device();
        let mut seen = std::collections::HashSet::new();
        for tsb in dev.addresses() {
            assert!(seen.insert(dev.index(tsb).unwrap()), "key collision at {tsb}");
        }
        assert_eq!(seen.len(), 4 * 8 * 8);
    }
}

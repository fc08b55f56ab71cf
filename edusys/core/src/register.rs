//! The 8-bit storage cell shared by CPU registers and main memory words.

use serde::{Deserialize, Serialize};

/// Display tag recording the last access made to a cell. Purely for the
/// visualization boundary; cleared by `reset_display_contents` passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellStatus {
    #[default]
    Normal,
    Read,
    Written,
}

/// An 8-bit cell holding the raw two's-complement encoding of its value.
/// Signed decoding happens at the point of semantic use, never here.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Word {
    data: u8,
    status: CellStatus,
}

impl Word {
    pub fn new(data: u8) -> Self {
        Self {
            data,
            status: CellStatus::Normal,
        }
    }

    /// Read the cell, tagging it for the display layer.
    pub fn read(&mut self) -> u8 {
        self.status = CellStatus::Read;
        self.data
    }

    /// Read without touching the display tag.
    pub fn peek(&self) -> u8 {
        self.data
    }

    pub fn write(&mut self, data: u8) {
        self.status = CellStatus::Written;
        self.data = data;
    }

    /// Add one, wrapping at the 8-bit boundary.
    pub fn increment(&mut self) {
        self.status = CellStatus::Written;
        self.data = self.data.wrapping_add(1);
    }

    pub fn status(&self) -> CellStatus {
        self.status
    }

    pub fn reset_status(&mut self) {
        self.status = CellStatus::Normal;
    }
}

//! Educational simulated computer: an 8-bit CPU interpreter driven by a
//! single-tenant operating-system kernel.
//!
//! The machine is tick-driven and single-threaded. Each clock pulse the
//! kernel services at most one pending interrupt; otherwise the scheduler
//! either steps the CPU one instruction or dispatches the next ready
//! process. CPU memory traffic goes through the memory manager, which
//! translates logical addresses with a per-process relocation base and may
//! swap whole blocks through the file system driver.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod console;
pub mod cpu;
pub mod disk;
pub mod drivers;
pub mod fs;
pub mod interrupt;
pub mod kernel;
pub mod memory;
pub mod process;
pub mod register;
pub mod scheduler;
pub mod snapshot;

pub use console::{BufferedConsole, Console, StdoutConsole};
pub use cpu::{decode, to_byte, to_signed, Cpu, Opcode};
pub use disk::{BlockDevice, DiskError, MemoryBackend, StorageBackend, Tsb};
pub use drivers::{DeviceDriver, DiskDriver, DiskRequest, DiskResponse, DriverStatus, KeyboardDriver};
pub use fs::{convert_data, revert_data, FileRecord, FileStatus, FsDriver, FsError};
pub use interrupt::{Interrupt, InterruptQueue, KeyEvent};
pub use kernel::{Kernel, KernelError, MachineState};
pub use memory::{MemoryError, MemoryManager};
pub use process::{Pcb, Pid, ProcessStatus, ProcessTable};
pub use register::{CellStatus, Word};
pub use scheduler::{Scheduler, SchedulingMode};
pub use snapshot::{load_snapshot, save_snapshot, SnapshotMetadata, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};

/// Main memory size in bytes.
pub const MEMORY_SIZE: usize = 768;
/// Size of the fixed memory partition handed to each process.
pub const MEMORY_BLOCK_SIZE: usize = 256;
/// Default round-robin scheduling quantum, in CPU instructions.
pub const DEFAULT_QUANTUM: u32 = 6;
/// Default scheduling priority assigned to freshly loaded processes.
pub const DEFAULT_PRIORITY: u8 = 8;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("serialize error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("snapshot error: {0}")]
    InvalidSnapshot(String),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Disk(#[from] DiskError),
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Fixed machine parameters. One spec describes one machine; components are
/// constructed from it at bootstrap and never resized afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub memory_size: usize,
    pub memory_block_size: usize,
    pub disk_tracks: u8,
    pub disk_sectors: u8,
    pub disk_blocks_per: u8,
    pub disk_block_size: usize,
    pub quantum: u32,
}

impl Default for MachineSpec {
    fn default() -> Self {
        Self {
            memory_size: MEMORY_SIZE,
            memory_block_size: MEMORY_BLOCK_SIZE,
            disk_tracks: disk::TRACKS,
            disk_sectors: disk::SECTORS,
            disk_blocks_per: disk::BLOCKS_PER,
            disk_block_size: disk::BLOCK_SIZE,
            quantum: DEFAULT_QUANTUM,
        }
    }
}

impl MachineSpec {
    /// Number of fixed memory partitions.
    pub fn memory_blocks(&self) -> usize {
        self.memory_size / self.memory_block_size
    }
}

//! Main memory and the fixed-block memory manager.
//!
//! Memory is a flat array of words partitioned into equal blocks; each block
//! is owned by at most one process. CPU addresses are logical
//! (block-relative) and are translated through a single relocation register
//! holding the running process's base. When allocation finds no free block,
//! a resident process is rolled out to a swap file through the file system
//! driver and the search retries.

use crate::fs::FsDriver;
use crate::process::{Pid, ProcessTable};
use crate::register::Word;
use crate::MachineSpec;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("memory access out of bounds")]
    OutOfBounds,
    #[error("no process is bound to memory")]
    NoRelocation,
    #[error("not enough memory")]
    NotEnoughMemory,
    #[error("memory operation failed: process not found")]
    ProcessNotFound,
}

/// The flat word array.
#[derive(Debug)]
pub struct Memory {
    words: Vec<Word>,
}

impl Memory {
    fn new(size: usize) -> Self {
        Self {
            words: vec![Word::default(); size],
        }
    }

    fn read(&mut self, addr: usize) -> u8 {
        self.words[addr].read()
    }

    fn write(&mut self, addr: usize, data: u8) {
        self.words[addr].write(data);
    }

    fn peek(&self, addr: usize) -> u8 {
        self.words[addr].peek()
    }

    fn len(&self) -> usize {
        self.words.len()
    }
}

/// Allocator and relocation unit over [`Memory`].
#[derive(Debug)]
pub struct MemoryManager {
    memory: Memory,
    block_size: usize,
    block_owners: Vec<Option<Pid>>,
    relocation: Option<usize>,
}

impl MemoryManager {
    pub fn new(spec: &MachineSpec) -> Self {
        Self {
            memory: Memory::new(spec.memory_size),
            block_size: spec.memory_block_size,
            block_owners: vec![None; spec.memory_blocks()],
            relocation: None,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn relocation(&self) -> Option<usize> {
        self.relocation
    }

    /// Point the relocation register at a process's base (or unbind it).
    pub fn set_relocation(&mut self, base: Option<usize>) {
        self.relocation = base;
    }

    /// Read the word at a logical address.
    pub fn read(&mut self, addr: usize) -> Result<u8, MemoryError> {
        if addr >= self.block_size {
            return Err(MemoryError::OutOfBounds);
        }
        let base = self.relocation.ok_or(MemoryError::NoRelocation)?;
        Ok(self.memory.read(base + addr))
    }

    /// Write the word at a logical address.
    pub fn write(&mut self, addr: usize, data: u8) -> Result<(), MemoryError> {
        if addr >= self.block_size {
            return Err(MemoryError::OutOfBounds);
        }
        let base = self.relocation.ok_or(MemoryError::NoRelocation)?;
        self.memory.write(base + addr, data);
        Ok(())
    }

    /// Claim a free block for `pid`, rolling out a resident process and
    /// retrying when every block is taken.
    pub fn allocate(
        &mut self,
        pid: Pid,
        table: &mut ProcessTable,
        fs: &mut FsDriver,
    ) -> crate::Result<()> {
        loop {
            if let Some(block) = self.block_owners.iter().position(Option::is_none) {
                self.block_owners[block] = Some(pid);
                let pcb = table.get_mut(pid).ok_or(MemoryError::ProcessNotFound)?;
                pcb.base = Some(block * self.block_size);
                pcb.limit = Some(self.block_size);
                log::debug!("allocated memory block {block} to pid {pid}");
                return Ok(());
            }
            let victim = self
                .eviction_candidate(table)
                .ok_or(MemoryError::NotEnoughMemory)?;
            self.roll_out(victim, table, fs)?;
        }
    }

    /// Pick the resident block owner with the newest access stamp.
    /// Ties keep the first block scanned.
    pub fn eviction_candidate(&self, table: &ProcessTable) -> Option<Pid> {
        let mut newest: i64 = -1;
        let mut candidate = None;
        for owner in self.block_owners.iter().flatten() {
            if let Some(pcb) = table.get(*owner) {
                if pcb.last_access_time as i64 > newest {
                    newest = pcb.last_access_time as i64;
                    candidate = Some(*owner);
                }
            }
        }
        candidate
    }

    /// Zero-fill and release the block owned by `pid`. Returns the block's
    /// contents as they were before the wipe, for the swap path.
    pub fn deallocate(&mut self, pid: Pid, table: &mut ProcessTable) -> Option<Vec<u8>> {
        log::trace!("deallocating memory for pid {pid}");
        let block = self
            .block_owners
            .iter()
            .position(|owner| *owner == Some(pid))?;
        self.block_owners[block] = None;
        let base = block * self.block_size;
        let mut contents = Vec::with_capacity(self.block_size);
        for offset in 0..self.block_size {
            contents.push(self.memory.read(base + offset));
            self.memory.write(base + offset, 0);
        }
        if let Some(pcb) = table.get_mut(pid) {
            pcb.base = None;
            pcb.limit = None;
        }
        Some(contents)
    }

    /// Write the block owned by `pid` to its swap file and release it.
    pub fn roll_out(
        &mut self,
        pid: Pid,
        table: &mut ProcessTable,
        fs: &mut FsDriver,
    ) -> crate::Result<()> {
        log::info!("rolling out pid {pid}");
        let name = table
            .get(pid)
            .ok_or(MemoryError::ProcessNotFound)?
            .swap_file_name();
        // Claim the directory cell before wiping memory so a full directory
        // aborts with the block intact.
        fs.create_file(&name)?;
        let contents = self
            .deallocate(pid, table)
            .ok_or(MemoryError::ProcessNotFound)?;
        fs.write_file(&name, &contents, true)?;
        Ok(())
    }

    /// Restore a rolled-out process from its swap file into a fresh block.
    pub fn roll_in(
        &mut self,
        pid: Pid,
        table: &mut ProcessTable,
        fs: &mut FsDriver,
    ) -> crate::Result<()> {
        log::info!("rolling in pid {pid}");
        let name = table
            .get(pid)
            .ok_or(MemoryError::ProcessNotFound)?
            .swap_file_name();
        let contents = fs.read_file(&name)?;
        fs.delete_file(&name)?;
        self.allocate(pid, table, fs)?;
        let pcb = table.get(pid).ok_or(MemoryError::ProcessNotFound)?;
        let base = pcb.base.ok_or(MemoryError::NoRelocation)?;
        for (offset, byte) in contents.iter().take(self.block_size).enumerate() {
            self.memory.write(base + offset, *byte);
        }
        Ok(())
    }

    /// Copy program bytes into the start of a process's block. The block
    /// must already be allocated; programs longer than one block do not fit.
    pub fn load_program(&mut self, pcb: &crate::process::Pcb, code: &[u8]) -> Result<(), MemoryError> {
        if code.len() > self.block_size {
            return Err(MemoryError::NotEnoughMemory);
        }
        let base = pcb.base.ok_or(MemoryError::NoRelocation)?;
        log::debug!("loading {} bytes for pid {} at base {base}", code.len(), pcb.pid);
        for (offset, byte) in code.iter().enumerate() {
            self.memory.write(base + offset, *byte);
        }
        Ok(())
    }

    /// Physical read, bypassing relocation. For tests and the display layer.
    pub fn peek_physical(&self, addr: usize) -> Option<u8> {
        (addr < self.memory.len()).then(|| self.memory.peek(addr))
    }

    pub fn block_owners(&self) -> &[Option<Pid>] {
        &self.block_owners
    }

    /// The full word array, for the display layer.
    pub fn get_display_contents(&self) -> &[Word] {
        &self.memory.words
    }

    /// Clear every word's display tag.
    pub fn reset_display_contents(&mut self) {
        for word in &mut self.memory.words {
            word.reset_status();
        }
    }

    pub(crate) fn raw_bytes(&self) -> Vec<u8> {
        self.memory.words.iter().map(Word::peek).collect()
    }

    pub(crate) fn restore(
        &mut self,
        bytes: &[u8],
        owners: Vec<Option<Pid>>,
        relocation: Option<usize>,
    ) {
        for (word, byte) in self.memory.words.iter_mut().zip(bytes) {
            *word = Word::new(*byte);
        }
        self.block_owners = owners;
        self.relocation = relocation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::CellStatus;
    use crate::MachineSpec;

    fn manager() -> (MemoryManager, ProcessTable, FsDriver) {
        let spec = MachineSpec::default();
        let mut fs = FsDriver::new(crate::disk::BlockDevice::in_memory(&spec));
        fs.format().unwrap();
        (MemoryManager::new(&spec), ProcessTable::new(), fs)
    }

    #[test]
    fn logical_addresses_are_bounds_checked() {
        let (mut mm, ..) = manager();
        mm.set_relocation(Some(256));
        assert_eq!(mm.read(256), Err(MemoryError::OutOfBounds));
        assert_eq!(mm.write(256, 1), Err(MemoryError::OutOfBounds));
        assert!(mm.write(255, 0xAB).is_ok());
        assert_eq!(mm.read(255), Ok(0xAB));
        assert_eq!(mm.peek_physical(256 + 255), Some(0xAB));
    }

    #[test]
    fn reads_require_a_bound_process() {
        let (mut mm, ..) = manager();
        assert_eq!(mm.read(0), Err(MemoryError::NoRelocation));
    }

    #[test]
    fn allocation_is_first_fit() {
        let (mut mm, mut table, mut fs) = manager();
        let a = table.create(8);
        let b = table.create(8);
        mm.allocate(a, &mut table, &mut fs).unwrap();
        mm.allocate(b, &mut table, &mut fs).unwrap();
        assert_eq!(table.get(a).unwrap().base, Some(0));
        assert_eq!(table.get(b).unwrap().base, Some(256));
        assert_eq!(mm.block_owners()[0], Some(a));
        assert_eq!(mm.block_owners()[1], Some(b));
    }

    #[test]
    fn deallocate_zero_fills_and_frees_the_block() {
        let (mut mm, mut table, mut fs) = manager();
        let a = table.create(8);
        mm.allocate(a, &mut table, &mut fs).unwrap();
        mm.set_relocation(table.get(a).unwrap().base);
        mm.write(0, 0xAA).unwrap();
        mm.write(1, 0xBB).unwrap();

        let contents = mm.deallocate(a, &mut table).unwrap();
        assert_eq!(&contents[..2], &[0xAA, 0xBB]);
        assert_eq!(mm.peek_physical(0), Some(0));
        assert_eq!(mm.peek_physical(1), Some(0));
        assert_eq!(table.get(a).unwrap().base, None);

        let b = table.create(8);
        mm.allocate(b, &mut table, &mut fs).unwrap();
        assert_eq!(table.get(b).unwrap().base, Some(0), "freed block is reusable");
    }

    #[test]
    fn deallocate_unknown_pid_reports_nothing() {
        let (mut mm, mut table, _) = manager();
        assert!(mm.deallocate(42, &mut table).is_none());
    }

    #[test]
    fn display_tags_reset() {
        let (mut mm, ..) = manager();
        mm.set_relocation(Some(0));
        mm.write(3, 1).unwrap();
        assert_eq!(mm.get_display_contents()[3].status(), CellStatus::Written);
        mm.reset_display_contents();
        assert_eq!(mm.get_display_contents()[3].status(), CellStatus::Normal);
    }
}

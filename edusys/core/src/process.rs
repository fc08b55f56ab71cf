//! Process control blocks and the process table.
//!
//! A process is a single memory block's worth of code plus the saved CPU
//! state needed to halt and resume it. The table owns every PCB for the
//! lifetime of the machine; scheduler queues refer to processes by pid only,
//! so a pid can sit in at most one queue at a time by construction.

use crate::cpu::Cpu;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type Pid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Created, not yet loaded into memory.
    New,
    /// Loaded in memory (or swapped out), not runnable.
    Resident,
    /// Waiting in the ready queue.
    Ready,
    /// Bound to the CPU.
    Running,
    /// Completed or killed; resources released.
    Terminated,
}

/// Saved execution and memory state of one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pcb {
    pub pid: Pid,
    pub pc: u16,
    pub acc: u8,
    pub x: u8,
    pub y: u8,
    pub zf: u8,
    pub status: ProcessStatus,
    /// Physical base of the owned memory block; `None` while swapped out
    /// or not yet allocated.
    pub base: Option<usize>,
    pub limit: Option<usize>,
    pub priority: u8,
    /// Clock tick at which the process entered the ready queue.
    pub arrival_time: u64,
    /// Clock tick of the last dispatch or load into memory.
    pub last_access_time: u64,
}

impl Pcb {
    pub fn new(pid: Pid, priority: u8) -> Self {
        Self {
            pid,
            pc: 0,
            acc: 0,
            x: 0,
            y: 0,
            zf: 0,
            status: ProcessStatus::New,
            base: None,
            limit: None,
            priority,
            arrival_time: 0,
            last_access_time: 0,
        }
    }

    /// Capture the CPU registers into this PCB.
    pub fn save_registers(&mut self, cpu: &Cpu) {
        self.pc = cpu.pc();
        self.acc = cpu.acc.peek();
        self.x = cpu.x.peek();
        self.y = cpu.y.peek();
        self.zf = cpu.zf.peek();
    }

    /// Name of the swap file holding this process's memory while rolled out.
    pub fn swap_file_name(&self) -> String {
        format!("swap{}", self.pid)
    }
}

/// All PCBs ever created, keyed by pid. Pids increase monotonically and are
/// never reused, terminated ones included.
#[derive(Debug, Default)]
pub struct ProcessTable {
    next_pid: Pid,
    entries: BTreeMap<Pid, Pcb>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a PCB with the next pid.
    pub fn create(&mut self, priority: u8) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        self.entries.insert(pid, Pcb::new(pid, priority));
        pid
    }

    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.entries.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.entries.get_mut(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.entries.values()
    }

    pub fn next_pid(&self) -> Pid {
        self.next_pid
    }

    /// Restore a table from snapshot contents.
    pub fn from_parts(next_pid: Pid, pcbs: Vec<Pcb>) -> Self {
        Self {
            next_pid,
            entries: pcbs.into_iter().map(|p| (p.pid, p)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pids_increase_and_are_never_reused() {
        let mut table = ProcessTable::new();
        let a = table.create(8);
        let b = table.create(8);
        assert_eq!((a, b), (0, 1));
        if let Some(pcb) = table.get_mut(a) {
            pcb.status = ProcessStatus::Terminated;
        }
        let c = table.create(8);
        assert_eq!(c, 2, "terminated pids must not be handed out again");
    }
}

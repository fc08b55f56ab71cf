//! CPU scheduling: the ready queue, the resident list, and the selection
//! policies.
//!
//! Round robin dequeues FIFO and enforces the quantum; FCFS and priority
//! scan the ready queue for the minimum scheduling key (arrival time and
//! explicit priority respectively), first occurrence winning ties. Under
//! FCFS and priority the quantum is never enforced.

use crate::process::{Pcb, Pid, ProcessTable};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingMode {
    #[serde(rename = "round-robin")]
    RoundRobin,
    #[serde(rename = "fcfs")]
    Fcfs,
    #[serde(rename = "priority")]
    Priority,
}

impl fmt::Display for SchedulingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingMode::RoundRobin => write!(f, "round-robin"),
            SchedulingMode::Fcfs => write!(f, "fcfs"),
            SchedulingMode::Priority => write!(f, "priority"),
        }
    }
}

#[derive(Debug)]
pub struct Scheduler {
    mode: SchedulingMode,
    quantum: u32,
    /// Instructions executed by the running process in its current slice.
    cycles: u32,
    ready: VecDeque<Pid>,
    resident: Vec<Pid>,
    running: Option<Pid>,
}

impl Scheduler {
    pub fn new(quantum: u32) -> Self {
        Self {
            mode: SchedulingMode::RoundRobin,
            quantum,
            cycles: 0,
            ready: VecDeque::new(),
            resident: Vec::new(),
            running: None,
        }
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SchedulingMode) {
        self.mode = mode;
    }

    pub fn quantum(&self) -> u32 {
        self.quantum
    }

    pub fn set_quantum(&mut self, quantum: u32) {
        self.quantum = quantum;
    }

    pub fn running(&self) -> Option<Pid> {
        self.running
    }

    pub fn set_running(&mut self, pid: Option<Pid>) {
        self.running = pid;
    }

    pub fn take_running(&mut self) -> Option<Pid> {
        self.running.take()
    }

    /// True while any process is running or waiting to run; policy changes
    /// are rejected in this state.
    pub fn has_active_processes(&self) -> bool {
        self.running.is_some() || !self.ready.is_empty()
    }

    pub fn ready_pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.ready.iter().copied()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn residents(&self) -> &[Pid] {
        &self.resident
    }

    pub fn add_resident(&mut self, pid: Pid) {
        self.resident.push(pid);
    }

    pub fn remove_resident(&mut self, pid: Pid) -> bool {
        match self.resident.iter().position(|p| *p == pid) {
            Some(index) => {
                self.resident.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn enqueue_ready(&mut self, pid: Pid) {
        self.ready.push_back(pid);
    }

    pub fn remove_ready(&mut self, pid: Pid) -> bool {
        match self.ready.iter().position(|p| *p == pid) {
            Some(index) => {
                self.ready.remove(index);
                true
            }
            None => false,
        }
    }

    /// Pick and remove the next process to run, per the current policy.
    pub fn select_next(&mut self, table: &ProcessTable) -> Option<Pid> {
        match self.mode {
            SchedulingMode::RoundRobin => self.ready.pop_front(),
            SchedulingMode::Fcfs | SchedulingMode::Priority => {
                let mut best: Option<(usize, u64)> = None;
                for (index, pid) in self.ready.iter().enumerate() {
                    let key = table
                        .get(*pid)
                        .map(|pcb| self.scheduling_priority(pcb))
                        .unwrap_or(u64::MAX);
                    // Strict comparison keeps the first occurrence on ties.
                    if best.map_or(true, |(_, current)| key < current) {
                        best = Some((index, key));
                    }
                }
                best.and_then(|(index, _)| self.ready.remove(index))
            }
        }
    }

    fn scheduling_priority(&self, pcb: &Pcb) -> u64 {
        match self.mode {
            SchedulingMode::Fcfs => pcb.arrival_time,
            _ => pcb.priority as u64,
        }
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn count_cycle(&mut self) {
        self.cycles += 1;
    }

    pub fn reset_cycles(&mut self) {
        self.cycles = 0;
    }

    /// Whether the running process has used up its slice. Only round robin
    /// preempts; under the other policies the quantum is effectively
    /// infinite.
    pub fn quantum_expired(&self) -> bool {
        self.mode == SchedulingMode::RoundRobin
            && self.cycles >= self.quantum
            && !self.ready.is_empty()
    }

    pub(crate) fn restore(
        &mut self,
        mode: SchedulingMode,
        quantum: u32,
        ready: Vec<Pid>,
        resident: Vec<Pid>,
        running: Option<Pid>,
    ) {
        self.mode = mode;
        self.quantum = quantum;
        self.cycles = 0;
        self.ready = ready.into();
        self.resident = resident;
        self.running = running;
    }
}

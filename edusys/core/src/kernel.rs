//! The kernel: interrupt dispatch, process lifecycle, and the public API
//! the shell and host drive.
//!
//! All machine state lives in the [`Kernel`] struct, created once at
//! bootstrap and torn down at shutdown. One [`Kernel::tick`] call is one
//! clock pulse: a pending interrupt is serviced first; otherwise the CPU
//! steps one instruction or the next ready process is dispatched. The tick
//! source (free-running or single-step) is the caller's concern.

use crate::console::Console;
use crate::cpu::{to_signed, Cpu};
use crate::disk::BlockDevice;
use crate::drivers::{DeviceDriver, DiskDriver, DiskRequest, KeyboardDriver};
use crate::fs::FsDriver;
use crate::interrupt::{Interrupt, InterruptQueue, KeyEvent};
use crate::memory::{MemoryError, MemoryManager};
use crate::process::{Pcb, Pid, ProcessStatus, ProcessTable};
use crate::register::Word;
use crate::scheduler::{Scheduler, SchedulingMode};
use crate::{MachineSpec, DEFAULT_PRIORITY};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    #[error("there is no process with that ID")]
    NoSuchProcess(Pid),
    #[error("the quantum must be a positive integer")]
    InvalidQuantum,
    #[error("cannot change the scheduling mode while processes are active")]
    SchedulingModeBusy,
    #[error("machine is halted")]
    Halted,
    #[error("invalid program text: {0}")]
    InvalidProgram(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    Running,
    Halted,
}

pub struct Kernel {
    pub(crate) spec: MachineSpec,
    pub(crate) clock: u64,
    pub(crate) state: MachineState,
    pub(crate) cpu: Cpu,
    pub(crate) mm: MemoryManager,
    pub(crate) table: ProcessTable,
    pub(crate) sched: Scheduler,
    pub(crate) interrupts: InterruptQueue,
    pub(crate) keyboard: KeyboardDriver,
    pub(crate) disk: DiskDriver,
    pub(crate) console: Box<dyn Console>,
    pub(crate) input: VecDeque<char>,
}

impl Kernel {
    /// Bring the machine up: load the device drivers, format the disk,
    /// and leave the kernel idle at clock zero.
    pub fn bootstrap(spec: MachineSpec, console: Box<dyn Console>) -> crate::Result<Self> {
        log::info!("bootstrap");
        let mut keyboard = KeyboardDriver::new();
        keyboard.driver_entry()?;
        let mut disk = DiskDriver::new(FsDriver::new(BlockDevice::in_memory(&spec)));
        disk.driver_entry()?;
        disk.isr(DiskRequest::Format)?;
        Ok(Self {
            clock: 0,
            state: MachineState::Running,
            cpu: Cpu::new(),
            mm: MemoryManager::new(&spec),
            table: ProcessTable::new(),
            sched: Scheduler::new(spec.quantum),
            interrupts: InterruptQueue::new(),
            keyboard,
            disk,
            console,
            input: VecDeque::new(),
            spec,
        })
    }

    /// One clock pulse. Within a tick any already-queued interrupt is
    /// serviced before the CPU executes or the scheduler dispatches.
    pub fn tick(&mut self) -> crate::Result<()> {
        if self.state == MachineState::Halted {
            return Err(KernelError::Halted.into());
        }
        self.clock += 1;
        if let Some(interrupt) = self.interrupts.dequeue() {
            self.handle_interrupt(interrupt);
        } else if self.cpu.executing {
            self.cpu.cycle(&mut self.mm, &mut self.interrupts);
            self.sched.count_cycle();
            if self.sched.quantum_expired() {
                self.interrupts.enqueue(Interrupt::ContextSwitch);
            }
        } else if self.sched.ready_len() > 0 {
            self.dispatch_next();
        } else if self.clock % 10 == 0 {
            log::trace!("idle");
        }
        Ok(())
    }

    /// Enqueue an interrupt. The entry point drivers and the host use.
    pub fn interrupt(&mut self, interrupt: Interrupt) {
        self.interrupts.enqueue(interrupt);
    }

    fn handle_interrupt(&mut self, interrupt: Interrupt) {
        log::trace!("handling irq {}", interrupt.irq());
        match interrupt {
            Interrupt::Timer => self.timer_isr(),
            Interrupt::Keyboard(event) => self.keyboard_isr(event),
            Interrupt::ProcessFault { message } => self.process_fault_isr(&message),
            Interrupt::ProcessTerminated => self.process_terminated_isr(),
            Interrupt::ContextSwitch => self.context_switch_isr(),
            Interrupt::SystemCall(call) => self.system_call_isr(call),
        }
    }

    /// Built-in timer service routine. Quantum enforcement lives in the
    /// scheduling path; this is the hook for timed kernel work.
    fn timer_isr(&mut self) {
        log::trace!("timer interrupt");
    }

    fn keyboard_isr(&mut self, event: KeyEvent) {
        match self.keyboard.isr(event) {
            Ok(Some(chr)) => self.input.push_back(chr),
            Ok(None) => {}
            Err(err) => self.trap(&format!("keyboard driver failure: {err}")),
        }
    }

    /// The faulting process is halted and kept memory-resident for
    /// inspection; it is not retried.
    fn process_fault_isr(&mut self, message: &str) {
        let Some(pid) = self.sched.take_running() else {
            self.trap("process fault with no running process");
            return;
        };
        let report = format!("Process aborted (PID {pid}): {message}");
        log::warn!("{report}");
        self.cpu.executing = false;
        self.cpu.clear_registers();
        self.mm.set_relocation(None);
        if let Some(pcb) = self.table.get_mut(pid) {
            pcb.status = ProcessStatus::Resident;
        }
        self.sched.add_resident(pid);
        self.console.put_text(&report);
        self.console.advance_line();
    }

    fn process_terminated_isr(&mut self) {
        let Some(pid) = self.sched.take_running() else {
            self.trap("process terminated with no running process");
            return;
        };
        log::info!("process completed (pid {pid})");
        self.cpu.executing = false;
        self.cpu.clear_registers();
        self.mm.set_relocation(None);
        self.mm.deallocate(pid, &mut self.table);
        if let Some(pcb) = self.table.get_mut(pid) {
            pcb.status = ProcessStatus::Terminated;
        }
    }

    fn context_switch_isr(&mut self) {
        let Some(current) = self.sched.take_running() else {
            // Stale preemption: the running process terminated or faulted
            // after the quantum expired but before the switch was serviced.
            self.sched.reset_cycles();
            return;
        };
        let Some(next) = self.sched.select_next(&self.table) else {
            // The ready queue drained in the meantime; the current process
            // keeps the CPU.
            self.sched.set_running(Some(current));
            self.sched.reset_cycles();
            return;
        };
        log::trace!("context switch: pid {current} -> pid {next}");
        if let Some(pcb) = self.table.get_mut(current) {
            pcb.save_registers(&self.cpu);
            pcb.status = ProcessStatus::Ready;
        }
        self.sched.enqueue_ready(current);
        if let Err(err) = self.bind_process(next) {
            self.trap(&format!("dispatch of pid {next} failed: {err}"));
            return;
        }
        self.sched.reset_cycles();
    }

    fn system_call_isr(&mut self, call: u8) {
        if self.sched.running().is_none() {
            self.trap("system call with no running process");
            return;
        }
        match call {
            // Print the Y register as a signed decimal.
            1 => {
                let value = to_signed(self.cpu.y.read());
                self.console.put_text(&value.to_string());
            }
            // Print the NUL-terminated string starting at the address in Y.
            2 => {
                let mut addr = self.cpu.y.read() as usize;
                let mut text = String::new();
                loop {
                    match self.mm.read(addr) {
                        Ok(0) => break,
                        Ok(byte) => {
                            text.push(byte as char);
                            addr += 1;
                        }
                        Err(err) => {
                            self.interrupts.enqueue(Interrupt::ProcessFault {
                                message: err.to_string(),
                            });
                            return;
                        }
                    }
                }
                self.console.put_text(&text);
            }
            other => {
                self.interrupts.enqueue(Interrupt::ProcessFault {
                    message: format!("invalid system call {other}"),
                });
            }
        }
    }

    fn dispatch_next(&mut self) {
        let Some(next) = self.sched.select_next(&self.table) else {
            return;
        };
        log::trace!("dispatching pid {next}");
        if let Err(err) = self.bind_process(next) {
            self.trap(&format!("dispatch of pid {next} failed: {err}"));
            return;
        }
        self.sched.reset_cycles();
    }

    /// Make `pid` the running process: roll it back in if swapped out, set
    /// the relocation base, and mirror its registers onto the CPU.
    fn bind_process(&mut self, pid: Pid) -> crate::Result<()> {
        let swapped_out = self
            .table
            .get(pid)
            .ok_or(KernelError::NoSuchProcess(pid))?
            .base
            .is_none();
        if swapped_out {
            self.mm.roll_in(pid, &mut self.table, self.disk.fs_mut())?;
        }
        let clock = self.clock;
        let pcb = self
            .table
            .get_mut(pid)
            .ok_or(KernelError::NoSuchProcess(pid))?;
        pcb.status = ProcessStatus::Running;
        pcb.last_access_time = clock;
        self.mm.set_relocation(pcb.base);
        self.cpu.set_registers(pcb);
        self.sched.set_running(Some(pid));
        self.cpu.executing = true;
        Ok(())
    }

    /// Fatal trap: log, present the terminal failure state, halt the
    /// machine. Not recoverable.
    fn trap(&mut self, message: &str) {
        log::error!("kernel trap: {message}");
        self.console.trap_display(message);
        self.cpu.executing = false;
        self.state = MachineState::Halted;
    }

    // ---------- Public API ----------

    /// Load a program given as hex byte text. Allocates a block, writes the
    /// code, and returns the newly assigned pid.
    pub fn load_memory(&mut self, code: &str) -> crate::Result<Pid> {
        self.load_memory_prioritized(code, DEFAULT_PRIORITY)
    }

    pub fn load_memory_prioritized(&mut self, code: &str, priority: u8) -> crate::Result<Pid> {
        if self.state == MachineState::Halted {
            return Err(KernelError::Halted.into());
        }
        let bytes = parse_hex_program(code)?;
        if bytes.len() > self.mm.block_size() {
            return Err(MemoryError::NotEnoughMemory.into());
        }
        let pid = self.table.create(priority);
        self.mm.allocate(pid, &mut self.table, self.disk.fs_mut())?;
        let clock = self.clock;
        let pcb = self
            .table
            .get_mut(pid)
            .ok_or(KernelError::NoSuchProcess(pid))?;
        pcb.last_access_time = clock;
        pcb.status = ProcessStatus::Resident;
        let pcb = self
            .table
            .get(pid)
            .ok_or(KernelError::NoSuchProcess(pid))?;
        self.mm.load_program(pcb, &bytes)?;
        self.sched.add_resident(pid);
        log::info!("loaded process (pid {pid}, {} bytes)", bytes.len());
        Ok(pid)
    }

    /// Move a resident process onto the ready queue.
    pub fn run_process(&mut self, pid: Pid) -> crate::Result<()> {
        if !self.sched.remove_resident(pid) {
            return Err(KernelError::NoSuchProcess(pid).into());
        }
        let clock = self.clock;
        if let Some(pcb) = self.table.get_mut(pid) {
            pcb.status = ProcessStatus::Ready;
            pcb.arrival_time = clock;
        }
        self.sched.enqueue_ready(pid);
        log::info!("running process (pid {pid})");
        Ok(())
    }

    /// Kill a running or ready process.
    pub fn kill_process(&mut self, pid: Pid) -> crate::Result<()> {
        if self.sched.running() == Some(pid) {
            self.interrupts.enqueue(Interrupt::ProcessTerminated);
            log::info!("kill requested for running pid {pid}");
            Ok(())
        } else if self.sched.remove_ready(pid) {
            self.mm.deallocate(pid, &mut self.table);
            if let Some(pcb) = self.table.get_mut(pid) {
                pcb.status = ProcessStatus::Terminated;
            }
            log::info!("killed ready pid {pid}");
            Ok(())
        } else {
            Err(KernelError::NoSuchProcess(pid).into())
        }
    }

    /// Change the scheduling policy. Rejected while a schedule is in
    /// flight, to avoid corrupting it.
    pub fn apply_scheduling_mode(&mut self, mode: SchedulingMode) -> crate::Result<()> {
        if self.sched.has_active_processes() {
            return Err(KernelError::SchedulingModeBusy.into());
        }
        log::info!("scheduling mode set to {mode}");
        self.sched.set_mode(mode);
        Ok(())
    }

    pub fn set_quantum(&mut self, quantum: u32) -> crate::Result<()> {
        if quantum < 1 {
            return Err(KernelError::InvalidQuantum.into());
        }
        self.sched.set_quantum(quantum);
        Ok(())
    }

    /// Stop the tick source outright. In-flight state is left as-is.
    pub fn shutdown(&mut self) {
        log::info!("shutdown");
        self.state = MachineState::Halted;
    }

    // ---------- Inspection for the shell/display boundary ----------

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn machine_state(&self) -> MachineState {
        self.state
    }

    pub fn scheduling_mode(&self) -> SchedulingMode {
        self.sched.mode()
    }

    pub fn quantum(&self) -> u32 {
        self.sched.quantum()
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn memory_manager(&self) -> &MemoryManager {
        &self.mm
    }

    pub fn process(&self, pid: Pid) -> Option<&Pcb> {
        self.table.get(pid)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Pcb> {
        self.table.iter()
    }

    pub fn running_pid(&self) -> Option<Pid> {
        self.sched.running()
    }

    pub fn ready_pids(&self) -> Vec<Pid> {
        self.sched.ready_pids().collect()
    }

    pub fn resident_pids(&self) -> &[Pid] {
        self.sched.residents()
    }

    pub fn pending_interrupts(&self) -> usize {
        self.interrupts.len()
    }

    /// Characters decoded by the keyboard driver, in arrival order.
    pub fn drain_input(&mut self) -> String {
        self.input.drain(..).collect()
    }

    /// Memory words for the display layer.
    pub fn memory_display(&self) -> &[Word] {
        self.mm.get_display_contents()
    }

    pub fn reset_memory_display(&mut self) {
        self.mm.reset_display_contents();
        self.cpu.reset_display_contents();
    }

    /// Full disk contents for the display layer.
    pub fn disk_contents(&self) -> Vec<Vec<Vec<String>>> {
        self.disk.fs().get_contents()
    }

    /// Direct access to the disk driver, for the shell's file commands.
    pub fn disk_request(
        &mut self,
        request: DiskRequest,
    ) -> crate::Result<crate::drivers::DiskResponse> {
        self.disk.isr(request)
    }
}

/// Parse whitespace-separated hex byte text into a program image.
fn parse_hex_program(code: &str) -> Result<Vec<u8>, KernelError> {
    let cleaned: String = code.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return Err(KernelError::InvalidProgram("empty program".into()));
    }
    if cleaned.len() % 2 != 0 {
        return Err(KernelError::InvalidProgram(
            "odd number of hex characters".into(),
        ));
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16).map_err(|_| {
                KernelError::InvalidProgram(format!("bad hex byte at offset {i}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_programs_parse_with_arbitrary_whitespace() {
        assert_eq!(
            parse_hex_program("A9 05\n8D 00 00\t00").unwrap(),
            vec![0xA9, 0x05, 0x8D, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn bad_hex_programs_are_rejected() {
        assert!(parse_hex_program("").is_err());
        assert!(parse_hex_program("A9 0").is_err());
        assert!(parse_hex_program("G9").is_err());
    }
}

//! The 8-bit CPU: fetch/decode/execute over a fixed opcode table.
//!
//! Memory operands are 16-bit little-endian logical addresses; arithmetic
//! is 8-bit two's-complement. Register cells store the raw 0-255 encoding;
//! [`to_signed`]/[`to_byte`] convert at the point of semantic use. Any
//! failure inside a cycle is converted into a `ProcessFault` interrupt and
//! never escapes as a raw error.

use crate::interrupt::{Interrupt, InterruptQueue};
use crate::memory::{MemoryError, MemoryManager};
use crate::register::Word;
use thiserror::Error;

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// A9: load the accumulator with a constant.
    LdaImm,
    /// AD: load the accumulator from memory.
    LdaMem,
    /// 8D: store the accumulator in memory.
    Sta,
    /// 6D: add the addressed byte to the accumulator.
    Adc,
    /// A2: load the X register with a constant.
    LdxImm,
    /// AE: load the X register from memory.
    LdxMem,
    /// A0: load the Y register with a constant.
    LdyImm,
    /// AC: load the Y register from memory.
    LdyMem,
    /// EA: no operation.
    Nop,
    /// 00: break (process exit).
    Brk,
    /// EC: compare the addressed byte to X, setting the zero flag.
    Cpx,
    /// D0: branch forward when the zero flag is clear.
    Bne,
    /// EE: increment the addressed byte.
    Inc,
    /// FF: system call selected by X.
    Sys,
}

/// Map a fetched byte through the opcode table.
pub fn decode(byte: u8) -> Option<Opcode> {
    match byte {
        0xA9 => Some(Opcode::LdaImm),
        0xAD => Some(Opcode::LdaMem),
        0x8D => Some(Opcode::Sta),
        0x6D => Some(Opcode::Adc),
        0xA2 => Some(Opcode::LdxImm),
        0xAE => Some(Opcode::LdxMem),
        0xA0 => Some(Opcode::LdyImm),
        0xAC => Some(Opcode::LdyMem),
        0xEA => Some(Opcode::Nop),
        0x00 => Some(Opcode::Brk),
        0xEC => Some(Opcode::Cpx),
        0xD0 => Some(Opcode::Bne),
        0xEE => Some(Opcode::Inc),
        0xFF => Some(Opcode::Sys),
        _ => None,
    }
}

/// Decode an 8-bit two's-complement byte to its signed value.
pub fn to_signed(byte: u8) -> i16 {
    if byte > 127 {
        byte as i16 - 256
    } else {
        byte as i16
    }
}

/// Encode a signed value as its 8-bit two's-complement byte, wrapping at
/// the byte boundary.
pub fn to_byte(value: i16) -> u8 {
    value as u8
}

#[derive(Debug, Error)]
pub enum CpuFault {
    #[error("invalid operation")]
    InvalidOperation,
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// CPU state. One instance exists; the running process's PCB mirrors it.
#[derive(Debug, Default)]
pub struct Cpu {
    pc: u16,
    /// Instruction register: the last fetched byte.
    pub ir: u8,
    /// The decoded operation, if the instruction register held a valid one.
    pub op: Option<Opcode>,
    pub acc: Word,
    pub x: Word,
    pub y: Word,
    pub zf: Word,
    pub executing: bool,
}

impl Cpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u16) {
        self.pc = pc;
    }

    /// Load the registers from a PCB when the process is dispatched.
    pub fn set_registers(&mut self, pcb: &crate::process::Pcb) {
        self.pc = pcb.pc;
        self.acc.write(pcb.acc);
        self.x.write(pcb.x);
        self.y.write(pcb.y);
        self.zf.write(pcb.zf);
    }

    pub fn clear_registers(&mut self) {
        self.pc = 0;
        self.ir = 0;
        self.op = None;
        self.acc.write(0);
        self.x.write(0);
        self.y.write(0);
        self.zf.write(0);
    }

    /// One full fetch/decode/execute cycle. Faults are converted into
    /// `ProcessFault` interrupts; the cycle itself never fails.
    pub fn cycle(&mut self, mm: &mut MemoryManager, interrupts: &mut InterruptQueue) {
        log::trace!("cpu cycle at pc={:#04x}", self.pc);
        match self.fetch(mm) {
            Ok(byte) => {
                self.ir = byte;
                self.op = decode(byte);
            }
            Err(err) => {
                self.fault(interrupts, &CpuFault::from(err));
                return;
            }
        }
        match self.op {
            None => self.fault(interrupts, &CpuFault::InvalidOperation),
            Some(op) => {
                if let Err(err) = self.execute(op, mm, interrupts) {
                    self.fault(interrupts, &err);
                }
            }
        }
    }

    /// Read the byte at `pc` and advance. An out-of-bounds read is a fault
    /// handled by the caller; the read is not retried.
    fn fetch(&mut self, mm: &mut MemoryManager) -> Result<u8, MemoryError> {
        let byte = mm.read(self.pc as usize)?;
        self.pc = self.pc.wrapping_add(1);
        Ok(byte)
    }

    fn execute(
        &mut self,
        op: Opcode,
        mm: &mut MemoryManager,
        interrupts: &mut InterruptQueue,
    ) -> Result<(), CpuFault> {
        match op {
            Opcode::LdaImm => {
                let value = self.operand8(mm)?;
                self.acc.write(value);
            }
            Opcode::LdaMem => {
                let addr = self.operand16(mm)?;
                let value = mm.read(addr)?;
                self.acc.write(value);
            }
            Opcode::Sta => {
                let addr = self.operand16(mm)?;
                mm.write(addr, self.acc.read())?;
            }
            Opcode::Adc => {
                let addr = self.operand16(mm)?;
                let sum = to_signed(self.acc.read()) + to_signed(mm.read(addr)?);
                self.acc.write(to_byte(sum));
            }
            Opcode::LdxImm => {
                let value = self.operand8(mm)?;
                self.x.write(value);
            }
            Opcode::LdxMem => {
                let addr = self.operand16(mm)?;
                let value = mm.read(addr)?;
                self.x.write(value);
            }
            Opcode::LdyImm => {
                let value = self.operand8(mm)?;
                self.y.write(value);
            }
            Opcode::LdyMem => {
                let addr = self.operand16(mm)?;
                let value = mm.read(addr)?;
                self.y.write(value);
            }
            Opcode::Nop => {}
            Opcode::Brk => {
                interrupts.enqueue(Interrupt::ProcessTerminated);
            }
            Opcode::Cpx => {
                let addr = self.operand16(mm)?;
                let equal = self.x.read() == mm.read(addr)?;
                self.zf.write(equal as u8);
            }
            Opcode::Bne => {
                if self.zf.read() == 0 {
                    let offset = self.operand8(mm)?;
                    self.pc = self.pc.wrapping_add(offset as u16);
                    // Branch targets stay inside the process's block.
                    let block = mm.block_size() as u16;
                    if self.pc >= block {
                        self.pc -= block;
                    }
                } else {
                    // Skip the operand byte.
                    self.pc = self.pc.wrapping_add(1);
                }
            }
            Opcode::Inc => {
                let addr = self.operand16(mm)?;
                let value = to_signed(mm.read(addr)?);
                mm.write(addr, to_byte(value + 1))?;
            }
            Opcode::Sys => match self.x.read() {
                1 => interrupts.enqueue(Interrupt::SystemCall(1)),
                2 => interrupts.enqueue(Interrupt::SystemCall(2)),
                _ => {}
            },
        }
        Ok(())
    }

    /// One-byte immediate operand.
    fn operand8(&mut self, mm: &mut MemoryManager) -> Result<u8, MemoryError> {
        self.fetch(mm)
    }

    /// Two-byte little-endian address operand.
    fn operand16(&mut self, mm: &mut MemoryManager) -> Result<usize, MemoryError> {
        let lo = self.fetch(mm)? as usize;
        let hi = self.fetch(mm)? as usize;
        Ok(hi << 8 | lo)
    }

    fn fault(&mut self, interrupts: &mut InterruptQueue, fault: &CpuFault) {
        interrupts.enqueue(Interrupt::ProcessFault {
            message: fault.to_string(),
        });
    }

    /// Clear the register display tags.
    pub fn reset_display_contents(&mut self) {
        self.acc.reset_status();
        self.x.reset_status();
        self.y.reset_status();
        self.zf.reset_status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MachineSpec;
    use proptest::prelude::*;

    fn machine() -> (Cpu, MemoryManager, InterruptQueue) {
        let mut mm = MemoryManager::new(&MachineSpec::default());
        mm.set_relocation(Some(0));
        (Cpu::new(), mm, InterruptQueue::new())
    }

    fn load(mm: &mut MemoryManager, code: &[u8]) {
        for (addr, byte) in code.iter().enumerate() {
            mm.write(addr, *byte).unwrap();
        }
    }

    #[test]
    fn signed_conversion_matches_the_table() {
        assert_eq!(to_signed(0), 0);
        assert_eq!(to_signed(127), 127);
        assert_eq!(to_signed(128), -128);
        assert_eq!(to_signed(255), -1);
        assert_eq!(to_byte(-1), 255);
        assert_eq!(to_byte(-128), 128);
        assert_eq!(to_byte(5), 5);
    }

    proptest! {
        #[test]
        fn signed_conversion_round_trips(byte in any::<u8>()) {
            prop_assert_eq!(to_signed(to_byte(to_signed(byte))), to_signed(byte));
            prop_assert_eq!(to_byte(to_signed(byte)), byte);
        }
    }

    #[test]
    fn decode_covers_the_full_table() {
        let table = [
            (0xA9, Opcode::LdaImm),
            (0xAD, Opcode::LdaMem),
            (0x8D, Opcode::Sta),
            (0x6D, Opcode::Adc),
            (0xA2, Opcode::LdxImm),
            (0xAE, Opcode::LdxMem),
            (0xA0, Opcode::LdyImm),
            (0xAC, Opcode::LdyMem),
            (0xEA, Opcode::Nop),
            (0x00, Opcode::Brk),
            (0xEC, Opcode::Cpx),
            (0xD0, Opcode::Bne),
            (0xEE, Opcode::Inc),
            (0xFF, Opcode::Sys),
        ];
        for (byte, op) in table {
            assert_eq!(decode(byte), Some(op));
        }
        assert_eq!(decode(0x42), None);
    }

    #[test]
    fn lda_and_sta_move_bytes_through_memory() {
        let (mut cpu, mut mm, mut irq) = machine();
        load(&mut mm, &[0xA9, 0x05, 0x8D, 0x20, 0x00]);
        cpu.cycle(&mut mm, &mut irq);
        assert_eq!(cpu.acc.peek(), 5);
        cpu.cycle(&mut mm, &mut irq);
        assert_eq!(mm.read(0x20).unwrap(), 5);
        assert!(irq.is_empty());
    }

    #[test]
    fn adc_uses_twos_complement_arithmetic() {
        let (mut cpu, mut mm, mut irq) = machine();
        // ACC = 5, then add mem[0x10] = -3 (0xFD).
        load(&mut mm, &[0xA9, 0x05, 0x6D, 0x10, 0x00]);
        mm.write(0x10, 0xFD).unwrap();
        cpu.cycle(&mut mm, &mut irq);
        cpu.cycle(&mut mm, &mut irq);
        assert_eq!(to_signed(cpu.acc.peek()), 2);
    }

    #[test]
    fn inc_wraps_at_the_signed_boundary() {
        let (mut cpu, mut mm, mut irq) = machine();
        load(&mut mm, &[0xEE, 0x10, 0x00]);
        mm.write(0x10, 0x7F).unwrap();
        cpu.cycle(&mut mm, &mut irq);
        assert_eq!(mm.read(0x10).unwrap(), 0x80);
    }

    #[test]
    fn cpx_sets_and_clears_the_zero_flag() {
        let (mut cpu, mut mm, mut irq) = machine();
        load(&mut mm, &[0xA2, 0x07, 0xEC, 0x10, 0x00, 0xEC, 0x11, 0x00]);
        mm.write(0x10, 0x07).unwrap();
        mm.write(0x11, 0x08).unwrap();
        cpu.cycle(&mut mm, &mut irq);
        cpu.cycle(&mut mm, &mut irq);
        assert_eq!(cpu.zf.peek(), 1);
        cpu.cycle(&mut mm, &mut irq);
        assert_eq!(cpu.zf.peek(), 0);
    }

    #[test]
    fn bne_taken_adds_the_raw_offset() {
        let (mut cpu, mut mm, mut irq) = machine();
        load(&mut mm, &[0xD0, 0x03]);
        cpu.cycle(&mut mm, &mut irq);
        assert_eq!(cpu.pc(), 5);
    }

    #[test]
    fn bne_wraps_inside_the_block() {
        let (mut cpu, mut mm, mut irq) = machine();
        mm.write(0xFA, 0xD0).unwrap();
        mm.write(0xFB, 0x0A).unwrap();
        cpu.set_pc(0xFA);
        cpu.cycle(&mut mm, &mut irq);
        // 0xFC + 0x0A = 0x106, wrapped back into the 256-byte block.
        assert_eq!(cpu.pc(), 0x06);
    }

    #[test]
    fn bne_not_taken_skips_the_operand() {
        let (mut cpu, mut mm, mut irq) = machine();
        load(&mut mm, &[0xD0, 0x03]);
        cpu.zf.write(1);
        cpu.cycle(&mut mm, &mut irq);
        assert_eq!(cpu.pc(), 2);
    }

    #[test]
    fn brk_raises_process_terminated() {
        let (mut cpu, mut mm, mut irq) = machine();
        load(&mut mm, &[0x00]);
        cpu.cycle(&mut mm, &mut irq);
        assert_eq!(irq.dequeue(), Some(Interrupt::ProcessTerminated));
    }

    #[test]
    fn sys_raises_the_selected_system_call() {
        let (mut cpu, mut mm, mut irq) = machine();
        load(&mut mm, &[0xA2, 0x01, 0xFF, 0xA2, 0x02, 0xFF, 0xA2, 0x03, 0xFF]);
        for _ in 0..6 {
            cpu.cycle(&mut mm, &mut irq);
        }
        assert_eq!(irq.dequeue(), Some(Interrupt::SystemCall(1)));
        assert_eq!(irq.dequeue(), Some(Interrupt::SystemCall(2)));
        assert!(irq.is_empty(), "other X values must not raise a call");
    }

    #[test]
    fn invalid_opcode_faults() {
        let (mut cpu, mut mm, mut irq) = machine();
        load(&mut mm, &[0x42]);
        cpu.cycle(&mut mm, &mut irq);
        match irq.dequeue() {
            Some(Interrupt::ProcessFault { message }) => {
                assert_eq!(message, "invalid operation");
            }
            other => panic!("expected a process fault, got {other:?}"),
        }
    }

    #[test]
    fn out_of_bounds_operand_faults() {
        let (mut cpu, mut mm, mut irq) = machine();
        // AD 00 02: read from 0x0200, past the 256-byte block.
        load(&mut mm, &[0xAD, 0x00, 0x02]);
        cpu.cycle(&mut mm, &mut irq);
        assert!(matches!(
            irq.dequeue(),
            Some(Interrupt::ProcessFault { .. })
        ));
    }
}

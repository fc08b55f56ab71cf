//! Whole-machine snapshots: a zip archive holding JSON metadata plus the
//! raw memory image and the disk's backing cells.

use crate::cpu::decode;
use crate::interrupt::Interrupt;
use crate::kernel::{Kernel, MachineState};
use crate::process::{Pcb, Pid, ProcessTable};
use crate::scheduler::SchedulingMode;
use crate::{CoreError, MachineSpec, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::read::ZipArchive;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const SNAPSHOT_MAGIC: &str = "edusys.snapshot";
pub const SNAPSHOT_VERSION: u32 = 1;

/// Byte layout of `registers.bin`: name and width per register, in order.
pub const SNAPSHOT_REGISTER_LAYOUT: [(&str, usize); 5] = [
    ("PC", 2),
    ("ACC", 1),
    ("X", 1),
    ("Y", 1),
    ("ZF", 1),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub magic: String,
    pub version: u32,
    pub spec: MachineSpec,
    pub clock: u64,
    pub state: MachineState,
    pub mode: SchedulingMode,
    pub quantum: u32,
    pub executing: bool,
    pub ir: u8,
    pub next_pid: Pid,
    pub processes: Vec<Pcb>,
    pub ready: Vec<Pid>,
    pub resident: Vec<Pid>,
    pub running: Option<Pid>,
    pub block_owners: Vec<Option<Pid>>,
    pub relocation: Option<usize>,
    pub interrupts: Vec<Interrupt>,
}

fn pack_registers(kernel: &Kernel) -> Vec<u8> {
    let cpu = &kernel.cpu;
    let mut buf = Vec::with_capacity(6);
    buf.extend_from_slice(&cpu.pc().to_le_bytes());
    buf.push(cpu.acc.peek());
    buf.push(cpu.x.peek());
    buf.push(cpu.y.peek());
    buf.push(cpu.zf.peek());
    buf
}

fn unpack_registers(payload: &[u8]) -> Result<(u16, u8, u8, u8, u8)> {
    let expected: usize = SNAPSHOT_REGISTER_LAYOUT.iter().map(|(_, w)| *w).sum();
    if payload.len() != expected {
        return Err(CoreError::InvalidSnapshot(format!(
            "registers.bin length mismatch (expected {expected}, got {})",
            payload.len()
        )));
    }
    let pc = u16::from_le_bytes([payload[0], payload[1]]);
    Ok((pc, payload[2], payload[3], payload[4], payload[5]))
}

/// Write the machine's full state to a snapshot archive.
pub fn save_snapshot(path: &Path, kernel: &Kernel) -> Result<()> {
    let metadata = SnapshotMetadata {
        magic: SNAPSHOT_MAGIC.to_string(),
        version: SNAPSHOT_VERSION,
        spec: kernel.spec,
        clock: kernel.clock,
        state: kernel.state,
        mode: kernel.sched.mode(),
        quantum: kernel.sched.quantum(),
        executing: kernel.cpu.executing,
        ir: kernel.cpu.ir,
        next_pid: kernel.table.next_pid(),
        processes: kernel.table.iter().cloned().collect(),
        ready: kernel.sched.ready_pids().collect(),
        resident: kernel.sched.residents().to_vec(),
        running: kernel.sched.running(),
        block_owners: kernel.mm.block_owners().to_vec(),
        relocation: kernel.mm.relocation(),
        interrupts: kernel.interrupts.contents().cloned().collect(),
    };

    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file("snapshot.json", options)?;
    zip.write_all(&serde_json::to_vec_pretty(&metadata)?)?;

    zip.start_file("registers.bin", options)?;
    zip.write_all(&pack_registers(kernel))?;

    zip.start_file("memory.bin", options)?;
    zip.write_all(&kernel.mm.raw_bytes())?;

    zip.start_file("disk.json", options)?;
    let cells = kernel.disk.fs().device().export_cells();
    zip.write_all(&serde_json::to_vec(&cells)?)?;

    zip.finish()?;
    log::info!("snapshot saved to {}", path.display());
    Ok(())
}

/// Restore a machine from a snapshot archive. The kernel must have been
/// bootstrapped with the same machine spec the snapshot was taken on.
pub fn load_snapshot(path: &Path, kernel: &mut Kernel) -> Result<SnapshotMetadata> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let metadata: SnapshotMetadata = {
        let mut buf = Vec::new();
        let mut entry = archive
            .by_name("snapshot.json")
            .map_err(|e| CoreError::InvalidSnapshot(format!("snapshot.json missing: {e}")))?;
        entry.read_to_end(&mut buf)?;
        serde_json::from_slice(&buf)?
    };
    if metadata.magic != SNAPSHOT_MAGIC || metadata.version != SNAPSHOT_VERSION {
        return Err(CoreError::InvalidSnapshot(
            "snapshot magic/version mismatch".to_string(),
        ));
    }
    if metadata.spec != kernel.spec {
        return Err(CoreError::InvalidSnapshot(
            "snapshot was taken on a different machine spec".to_string(),
        ));
    }

    let (pc, acc, x, y, zf) = {
        let mut buf = Vec::new();
        let mut entry = archive
            .by_name("registers.bin")
            .map_err(|e| CoreError::InvalidSnapshot(format!("registers.bin missing: {e}")))?;
        entry.read_to_end(&mut buf)?;
        unpack_registers(&buf)?
    };

    let memory = {
        let mut buf = Vec::new();
        let mut entry = archive
            .by_name("memory.bin")
            .map_err(|e| CoreError::InvalidSnapshot(format!("memory.bin missing: {e}")))?;
        entry.read_to_end(&mut buf)?;
        buf
    };

    let cells: Vec<(u32, String)> = {
        let mut buf = Vec::new();
        let mut entry = archive
            .by_name("disk.json")
            .map_err(|e| CoreError::InvalidSnapshot(format!("disk.json missing: {e}")))?;
        entry.read_to_end(&mut buf)?;
        serde_json::from_slice(&buf)?
    };

    kernel.clock = metadata.clock;
    kernel.state = metadata.state;
    kernel.cpu.set_pc(pc);
    kernel.cpu.acc.write(acc);
    kernel.cpu.x.write(x);
    kernel.cpu.y.write(y);
    kernel.cpu.zf.write(zf);
    kernel.cpu.ir = metadata.ir;
    kernel.cpu.op = decode(metadata.ir);
    kernel.cpu.executing = metadata.executing;
    kernel.mm.restore(
        &memory,
        metadata.block_owners.clone(),
        metadata.relocation,
    );
    kernel.table = ProcessTable::from_parts(metadata.next_pid, metadata.processes.clone());
    kernel.sched.restore(
        metadata.mode,
        metadata.quantum,
        metadata.ready.clone(),
        metadata.resident.clone(),
        metadata.running,
    );
    kernel.interrupts.restore(metadata.interrupts.clone());
    kernel.disk.fs_mut().device_mut().import_cells(cells);

    log::info!("snapshot restored from {}", path.display());
    Ok(metadata)
}

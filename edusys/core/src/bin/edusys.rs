use anyhow::{Context, Result};
use clap::Parser;
use edusys_core::{
    load_snapshot, save_snapshot, Interrupt, Kernel, KeyEvent, MachineSpec, MachineState,
    SchedulingMode, StdoutConsole, DEFAULT_PRIORITY, DEFAULT_QUANTUM,
};
use std::fs;
use std::io::{self, BufRead};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "edusys",
    about = "Run programs on the simulated 8-bit machine and its kernel."
)]
struct Args {
    /// Hex program files to load at boot (whitespace-separated byte pairs).
    #[arg(value_name = "PROGRAM")]
    programs: Vec<PathBuf>,

    /// Inline hex program text (may repeat).
    #[arg(long, value_name = "HEX")]
    code: Vec<String>,

    /// Maximum clock ticks to run before giving up.
    #[arg(long, default_value_t = 10_000)]
    ticks: u64,

    /// Scheduling policy.
    #[arg(long, value_enum, default_value_t = SchedulingMode::RoundRobin)]
    mode: SchedulingMode,

    /// Round-robin quantum, in instructions.
    #[arg(long, default_value_t = DEFAULT_QUANTUM)]
    quantum: u32,

    /// Scheduling priority given to the loaded programs (lower runs first).
    #[arg(long, default_value_t = DEFAULT_PRIORITY)]
    priority: u8,

    /// Type these characters through the keyboard driver before running.
    #[arg(long, value_name = "TEXT")]
    keys: Option<String>,

    /// Restore the machine from a snapshot before loading programs.
    #[arg(long, value_name = "PATH")]
    load_snapshot: Option<PathBuf>,

    /// Save a snapshot of the machine when the run ends.
    #[arg(long, value_name = "PATH")]
    save_snapshot: Option<PathBuf>,

    /// Wait for <Enter> between ticks instead of free-running.
    #[arg(long, default_value_t = false)]
    step: bool,

    /// Print the process table when the run ends.
    #[arg(long, default_value_t = false)]
    summary: bool,
}

/// Map a typed character onto the key event the keyboard driver expects.
fn key_event_for(chr: char) -> Option<KeyEvent> {
    match chr {
        'a'..='z' | '0'..='9' => Some(KeyEvent::new(chr as u8, false)),
        'A'..='Z' => Some(KeyEvent::new(chr as u8, true)),
        ' ' => Some(KeyEvent::new(32, false)),
        '\n' => Some(KeyEvent::new(13, false)),
        '`' | '-' | '=' | '[' | ']' | ';' | '\'' | ',' | '.' | '/' | '\\' => {
            Some(KeyEvent::new(chr as u8, false))
        }
        _ => None,
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut kernel = Kernel::bootstrap(MachineSpec::default(), Box::new(StdoutConsole))
        .context("bootstrap failed")?;
    kernel.apply_scheduling_mode(args.mode)?;
    kernel.set_quantum(args.quantum)?;

    if let Some(path) = &args.load_snapshot {
        load_snapshot(path, &mut kernel)
            .with_context(|| format!("loading snapshot {}", path.display()))?;
        println!("Restored snapshot from {}", path.display());
    }

    if let Some(keys) = &args.keys {
        for chr in keys.chars() {
            if let Some(event) = key_event_for(chr) {
                kernel.interrupt(Interrupt::Keyboard(event));
            }
        }
    }

    let mut pids = Vec::new();
    for path in &args.programs {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let pid = kernel.load_memory_prioritized(&text, args.priority)?;
        println!("Loaded {} as PID {pid}", path.display());
        pids.push(pid);
    }
    for code in &args.code {
        let pid = kernel.load_memory_prioritized(code, args.priority)?;
        println!("Loaded inline program as PID {pid}");
        pids.push(pid);
    }
    for pid in &pids {
        kernel.run_process(*pid)?;
    }

    let stdin = io::stdin();
    let mut elapsed = 0;
    for _ in 0..args.ticks {
        if args.step {
            let mut line = String::new();
            stdin.lock().read_line(&mut line)?;
        }
        if kernel.tick().is_err() {
            break;
        }
        elapsed += 1;
        let quiesced = kernel.running_pid().is_none()
            && kernel.ready_pids().is_empty()
            && kernel.pending_interrupts() == 0;
        if quiesced {
            break;
        }
    }
    println!();

    let typed = kernel.drain_input();
    if !typed.is_empty() {
        println!("Keyboard input decoded: {typed:?}");
    }

    if args.summary || kernel.machine_state() == MachineState::Halted {
        println!("clock={} state={:?}", kernel.clock(), kernel.machine_state());
        for pcb in kernel.processes() {
            println!(
                "  PID {:<4} {:<12} base={:<5} priority={}",
                pcb.pid,
                format!("{:?}", pcb.status),
                pcb.base.map_or("-".to_string(), |b| b.to_string()),
                pcb.priority
            );
        }
    }
    log::debug!("run finished after {elapsed} ticks");

    if let Some(path) = &args.save_snapshot {
        save_snapshot(path, &kernel)
            .with_context(|| format!("saving snapshot {}", path.display()))?;
        println!("Snapshot saved to {}", path.display());
    }
    Ok(())
}

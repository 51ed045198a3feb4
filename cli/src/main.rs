//! Command-line runner for the AMD64 user-mode process emulator.
//!
//! Loads an ELF64 executable, forwards the remaining command-line arguments
//! to it as `argv`, runs it to completion, and unloads it. Exits 0 on a
//! clean `exit` syscall, non-zero on any unrecoverable emulation error.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use amd64_emu_core::elf::Loader;
use amd64_emu_core::{Config, ExecutionContext};

#[derive(Parser, Debug)]
#[command(name = "amd64-emu", about = "Runs an AMD64 ELF64 executable under emulation")]
struct Args {
    /// Path to the ELF64 executable to load.
    program: PathBuf,

    /// Arguments forwarded to the emulated program as argv[1..].
    program_args: Vec<String>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn run(args: &Args) -> Result<()> {
    let file_bytes = std::fs::read(&args.program)
        .with_context(|| format!("reading {}", args.program.display()))?;
    let elf = goblin::elf::Elf::parse(&file_bytes).context("parsing ELF headers")?;

    let config = Config::safe();
    let mut ctx = ExecutionContext::new(&config);

    let mut argv = vec![args.program.display().to_string()];
    argv.extend(args.program_args.iter().cloned());
    let envp: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();

    Loader::load(
        &elf,
        &file_bytes,
        &argv,
        &envp,
        config.base_address,
        config.base_stack_address,
        config.stack_size,
        &mut ctx.memory,
        &mut ctx.cpu,
    )?;

    ctx.cpu.turn_on();
    let run_result = ctx.cpu.execute(&mut ctx.memory);

    // Run destructors regardless of how the program stopped; a failure here
    // doesn't override an earlier emulation error.
    let unload_result = Loader::unload(&elf, config.base_address, &mut ctx.memory, &mut ctx.cpu);

    run_result?;
    unload_result?;
    Ok(())
}

fn main() {
    init_tracing();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        match err.downcast_ref::<amd64_emu_core::EmuError>() {
            Some(amd64_emu_core::EmuError::PermissionDenied { address, kind }) => {
                eprintln!("emulation error: permission denied ({kind}) at {address:#018x}");
            }
            Some(amd64_emu_core::EmuError::UninitializedRead(addr)) => {
                eprintln!("emulation error: uninitialized read at {addr:#018x}");
            }
            Some(other) => eprintln!("emulation error: {other}"),
            None => eprintln!("error: {err:#}"),
        }
        std::process::exit(1);
    }
}

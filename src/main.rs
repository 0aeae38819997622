//! CPU runner
//!
//! Loads a binary image and executes it. On a normal halt the remaining
//! operand-stack contents are printed, top first.

use anyhow::{Context, Result};
use clap::Parser;
use stackvm::interp::Cpu;
use stackvm::ir::Program;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "svm")]
#[command(about = "Stack VM CPU: executes assembled binary images")]
struct Args {
    /// Binary image produced by svm-asm
    bin_file: PathBuf,

    /// Abort after this many executed instructions
    #[arg(long)]
    step_limit: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let program = Program::from_file(&args.bin_file)
        .with_context(|| format!("failed to load {}", args.bin_file.display()))?;

    let mut cpu = Cpu::new(program);
    if let Some(limit) = args.step_limit {
        cpu = cpu.with_step_limit(limit);
    }

    cpu.execute().context("execution failed")?;

    for (i, value) in cpu.drain().context("corrupted operand stack")?.iter().enumerate() {
        println!("## {i}:\t|{value}|");
    }

    Ok(())
}

//! Standalone assembler
//!
//! Translates VM source text to a binary image.

use anyhow::{Context, Result};
use clap::Parser;
use stackvm::ir::{disassemble, Assembler};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "svm-asm")]
#[command(about = "Stack VM assembler: translates VM_FILE and writes BIN_FILE")]
struct Args {
    /// VM source file
    vm_file: PathBuf,

    /// Output binary image
    bin_file: PathBuf,

    /// Show disassembly of the assembled program
    #[arg(short, long)]
    disasm: bool,

    /// Write the image hex-encoded instead of binary
    #[arg(long)]
    hex: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let source = fs::read_to_string(&args.vm_file)
        .with_context(|| format!("failed to read {}", args.vm_file.display()))?;

    let mut asm = Assembler::new();
    let program = asm.assemble(&source).context("assembly failed")?;

    eprintln!(
        "Assembled {} instructions ({} bytes)",
        program.len(),
        program.byte_size()
    );

    if args.disasm {
        eprintln!("\nDisassembly:\n{}", disassemble(&program));
    }

    let bytes = program.encode();
    if args.hex {
        fs::write(&args.bin_file, hex::encode(&bytes))
    } else {
        fs::write(&args.bin_file, &bytes)
    }
    .with_context(|| format!("failed to write {}", args.bin_file.display()))?;

    eprintln!("Wrote {} bytes to {}", bytes.len(), args.bin_file.display());

    Ok(())
}

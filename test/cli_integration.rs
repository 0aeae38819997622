//! End-to-end CLI tests
//!
//! Drives the `svm-asm` and `svm` binaries the way a user would:
//! assemble a source file, execute the image, check the console output.

use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

const SVM: &str = env!("CARGO_BIN_EXE_svm");
const SVM_ASM: &str = env!("CARGO_BIN_EXE_svm-asm");

struct Workspace {
    vm_file: PathBuf,
    bin_file: PathBuf,
}

impl Workspace {
    fn new(name: &str, source: &str) -> Self {
        let dir = std::env::temp_dir();
        let tag = format!("stackvm-cli-{}-{name}", std::process::id());
        let ws = Self {
            vm_file: dir.join(format!("{tag}.vm")),
            bin_file: dir.join(format!("{tag}.bin")),
        };
        fs::write(&ws.vm_file, source).expect("write source");
        ws
    }

    fn assemble(&self) -> Output {
        Command::new(SVM_ASM)
            .arg(&self.vm_file)
            .arg(&self.bin_file)
            .output()
            .expect("spawn svm-asm")
    }

    fn run(&self) -> Output {
        Command::new(SVM)
            .arg(&self.bin_file)
            .output()
            .expect("spawn svm")
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        fs::remove_file(&self.vm_file).ok();
        fs::remove_file(&self.bin_file).ok();
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_assemble_and_run_drains_stack() {
    let ws = Workspace::new("drain", "PUSH CONSTANT 2\nPUSH CONSTANT 3\nADD\n");

    let asm = ws.assemble();
    assert!(asm.status.success(), "svm-asm failed: {}", stderr(&asm));
    assert!(stderr(&asm).contains("Assembled 3 instructions"));

    let run = ws.run();
    assert!(run.status.success(), "svm failed: {}", stderr(&run));
    assert_eq!(stdout(&run), "## 0:\t|5|\n");
}

#[test]
fn test_pop_out_prints_to_stdout() {
    let ws = Workspace::new(
        "out",
        "PUSH CONSTANT 21\nPUSH CONSTANT 2\nMUL\nPOP OUT 1\n",
    );
    assert!(ws.assemble().status.success());

    let run = ws.run();
    assert!(run.status.success());
    assert_eq!(stdout(&run), "42\n");
}

#[test]
fn test_unknown_mnemonic_fails_without_output() {
    let ws = Workspace::new("badsrc", "FROB CONSTANT 1\n");

    let asm = ws.assemble();
    assert!(!asm.status.success());
    assert!(stderr(&asm).contains("FROB"), "stderr: {}", stderr(&asm));
    assert!(!ws.bin_file.exists());
}

#[test]
fn test_truncated_image_fails_to_load() {
    let ws = Workspace::new("truncated", "PUSH CONSTANT 1\nPOP OUT 1\n");
    assert!(ws.assemble().status.success());

    let mut bytes = fs::read(&ws.bin_file).expect("read image");
    bytes.truncate(bytes.len() - 1);
    fs::write(&ws.bin_file, &bytes).expect("rewrite image");

    let run = ws.run();
    assert!(!run.status.success());
    assert!(
        stderr(&run).contains("failed to load"),
        "stderr: {}",
        stderr(&run)
    );
}

#[test]
fn test_division_by_zero_is_runtime_error() {
    let ws = Workspace::new("divzero", "PUSH CONSTANT 1\nPUSH CONSTANT 0\nDIV\n");
    assert!(ws.assemble().status.success());

    let run = ws.run();
    assert!(!run.status.success());
    assert!(
        stderr(&run).contains("division by zero"),
        "stderr: {}",
        stderr(&run)
    );
}

#[test]
fn test_step_limit_flag_stops_infinite_loop() {
    let ws = Workspace::new("looper", "LABEL start\nJUMP UN start\n");
    assert!(ws.assemble().status.success());

    let run = Command::new(SVM)
        .arg(&ws.bin_file)
        .arg("--step-limit")
        .arg("1000")
        .output()
        .expect("spawn svm");
    assert!(!run.status.success());
    assert!(
        stderr(&run).contains("step limit"),
        "stderr: {}",
        stderr(&run)
    );
}

#[test]
fn test_disasm_flag_lists_program() {
    let ws = Workspace::new("disasm", "PUSH CONSTANT 7\nSQRT\nPOP OUT 1\n");

    let asm = Command::new(SVM_ASM)
        .arg(&ws.vm_file)
        .arg(&ws.bin_file)
        .arg("--disasm")
        .output()
        .expect("spawn svm-asm");
    assert!(asm.status.success());
    let listing = stderr(&asm);
    assert!(listing.contains("PUSH CONSTANT 7"), "stderr: {listing}");
    assert!(listing.contains("SQRT"), "stderr: {listing}");
}

#[test]
fn test_hex_flag_writes_hex_image() {
    let ws = Workspace::new("hex", "RETURN\n");

    let asm = Command::new(SVM_ASM)
        .arg(&ws.vm_file)
        .arg(&ws.bin_file)
        .arg("--hex")
        .output()
        .expect("spawn svm-asm");
    assert!(asm.status.success());

    let text = fs::read_to_string(&ws.bin_file).expect("read hex image");
    assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
    // 8-byte header + one 9-byte record, two hex digits per byte.
    assert_eq!(text.len(), 2 * 17);
}

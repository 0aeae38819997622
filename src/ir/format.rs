//! Binary instruction format
//!
//! Every instruction is one fixed-width packed record:
//!
//! ```text
//! ┌──────────┬────────────────┬────────────────┐
//! │  Opcode  │      arg1      │      arg2      │
//! │  1 byte  │  4 bytes (LE)  │  4 bytes (LE)  │
//! └──────────┴────────────────┴────────────────┘
//! ```
//!
//! The meaning of `arg1`/`arg2` depends on the opcode: memory bank id and
//! cell offset for `PUSH`/`POP`, jump condition and target index for `JUMP`,
//! target index for `CALL`, unused (zero) elsewhere.
//!
//! A binary image is `[8-byte LE instruction count][count records]`, packed
//! with no padding. Loading verifies that the byte length is exactly
//! `8 + count * 9`; that is the only integrity check and it catches
//! truncated or hand-edited images.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Image header size in bytes (the LE instruction count).
pub const HEADER_SIZE: usize = 8;
/// Packed size of one instruction record in bytes.
pub const RECORD_SIZE: usize = 9;

/// `arg2` sentinel for `PUSH`/`POP` on a concrete bank: the cell index is
/// popped from the operand stack at runtime instead of being a literal.
pub const DYN_INDEX: i32 = -1;

/// Opcode byte assignments.
///
/// Historically `SUB` sat on 0xFF, which a later instruction-set revision
/// also handed to the `NEQ` jump condition, and `LEQ`/`GEQ` shared 0xEE.
/// This table is collision-free: every opcode and every [`JumpCond`] byte is
/// distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// PUSH bank [imm|offset|INDEX] ; push a constant, memory cell or input
    Push = 0xFA,
    /// POP bank [offset|INDEX] ; pop into a memory cell or output
    Pop = 0xFB,
    /// MUL ; pop two, push product
    Mul = 0xFC,
    /// DIV ; pop divisor then dividend, push quotient
    Div = 0xFD,
    /// ADD ; pop two, push sum
    Add = 0xFE,
    /// SUB ; pop subtrahend then minuend, push difference
    Sub = 0xF9,
    /// SQRT ; pop one, push integer square root
    Sqrt = 0xC4,
    /// JUMP cond target ; conditional transfer to an instruction index
    Jump = 0xC1,
    /// CALL target ; push the call site on the return stack and transfer
    Call = 0xC2,
    /// RETURN ; resume after the most recent CALL
    Return = 0xC3,
}

/// Every opcode, in mnemonic-table order. `LABEL` is assembler-only and
/// emits no record, so it does not appear here.
pub const ALL_OPCODES: [Opcode; 10] = [
    Opcode::Push,
    Opcode::Pop,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Sqrt,
    Opcode::Jump,
    Opcode::Call,
    Opcode::Return,
];

impl Opcode {
    /// Convert from the encoded byte, returning None for invalid opcodes.
    pub fn from_u8(value: u8) -> Option<Self> {
        ALL_OPCODES.into_iter().find(|op| *op as u8 == value)
    }

    /// Assembly mnemonic for this opcode.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Sqrt => "SQRT",
            Opcode::Jump => "JUMP",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
        }
    }
}

/// Jump conditions, encoded in `arg1` of a `JUMP` record. The popped value
/// is compared against zero; `UN` is unconditional and never pops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JumpCond {
    Un = 0xAA,
    Eq = 0xBB,
    Gt = 0xCC,
    Ls = 0xDD,
    Leq = 0xE0,
    Geq = 0xE1,
    Neq = 0xE2,
}

pub const ALL_CONDS: [JumpCond; 7] = [
    JumpCond::Un,
    JumpCond::Eq,
    JumpCond::Gt,
    JumpCond::Ls,
    JumpCond::Leq,
    JumpCond::Geq,
    JumpCond::Neq,
];

impl JumpCond {
    pub fn from_u8(value: u8) -> Option<Self> {
        ALL_CONDS.into_iter().find(|c| *c as u8 == value)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_CONDS.into_iter().find(|c| c.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            JumpCond::Un => "UN",
            JumpCond::Eq => "EQ",
            JumpCond::Gt => "GT",
            JumpCond::Ls => "LS",
            JumpCond::Leq => "LEQ",
            JumpCond::Geq => "GEQ",
            JumpCond::Neq => "NEQ",
        }
    }

    /// Whether the condition holds for a value popped from the stack.
    /// `UN` always holds (and the CPU never pops for it).
    pub fn holds(&self, value: crate::Word) -> bool {
        match self {
            JumpCond::Un => true,
            JumpCond::Eq => value == 0,
            JumpCond::Gt => value > 0,
            JumpCond::Ls => value < 0,
            JumpCond::Leq => value <= 0,
            JumpCond::Geq => value >= 0,
            JumpCond::Neq => value != 0,
        }
    }
}

/// Memory bank selectors, encoded in `arg1` of `PUSH`/`POP` records.
///
/// `LOCAL`, `GLOBAL` and `MEMORY` are real arrays owned by the CPU;
/// `CONSTANT`, `IN` and `OUT` are virtual: `CONSTANT` yields the immediate
/// operand and `IN`/`OUT` perform console I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Bank {
    Constant = 0,
    Local = 1,
    Global = 2,
    Memory = 3,
    In = 4,
    Out = 5,
}

pub const ALL_BANKS: [Bank; 6] = [
    Bank::Constant,
    Bank::Local,
    Bank::Global,
    Bank::Memory,
    Bank::In,
    Bank::Out,
];

impl Bank {
    pub fn from_id(id: i32) -> Option<Self> {
        ALL_BANKS.into_iter().find(|b| *b as i32 == id)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_BANKS.into_iter().find(|b| b.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Bank::Constant => "CONSTANT",
            Bank::Local => "LOCAL",
            Bank::Global => "GLOBAL",
            Bank::Memory => "MEMORY",
            Bank::In => "IN",
            Bank::Out => "OUT",
        }
    }

    /// Whether the bank has backing storage (as opposed to the virtual
    /// `CONSTANT`/`IN`/`OUT` banks).
    pub fn is_concrete(&self) -> bool {
        matches!(self, Bank::Local | Bank::Global | Bank::Memory)
    }
}

/// Errors produced while encoding or decoding binary images.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("truncated input: {actual} bytes, need at least {needed}")]
    TooShort { actual: usize, needed: usize },
    #[error(
        "image size mismatch: {count} instructions imply {expected} bytes, got {actual}"
    )]
    SizeMismatch {
        count: u64,
        expected: u64,
        actual: usize,
    },
    #[error("invalid opcode byte {opcode:#04x} in record {index}")]
    InvalidOpcode { opcode: u8, index: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One decoded instruction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub opcode: Opcode,
    pub arg1: i32,
    pub arg2: i32,
}

impl Instr {
    pub fn new(opcode: Opcode, arg1: i32, arg2: i32) -> Self {
        Self { opcode, arg1, arg2 }
    }

    /// Appends the packed 9-byte encoding of this record.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode as u8);
        out.extend_from_slice(&self.arg1.to_le_bytes());
        out.extend_from_slice(&self.arg2.to_le_bytes());
    }

    /// Decodes one record from the front of `bytes`. `index` is only used
    /// for error reporting.
    pub fn decode(bytes: &[u8], index: usize) -> Result<Self, FormatError> {
        if bytes.len() < RECORD_SIZE {
            return Err(FormatError::TooShort {
                actual: bytes.len(),
                needed: RECORD_SIZE,
            });
        }
        let opcode = Opcode::from_u8(bytes[0]).ok_or(FormatError::InvalidOpcode {
            opcode: bytes[0],
            index,
        })?;
        let arg1 = i32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let arg2 = i32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        Ok(Self { opcode, arg1, arg2 })
    }
}

/// A complete program: the in-memory form of a binary image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub instrs: Vec<Instr>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn push(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    pub fn reserve(&mut self, additional: usize) {
        self.instrs.reserve(additional);
    }

    pub fn shrink_to_fit(&mut self) {
        self.instrs.shrink_to_fit();
    }

    /// Exact byte size of the encoded image.
    pub fn byte_size(&self) -> usize {
        HEADER_SIZE + self.instrs.len() * RECORD_SIZE
    }

    /// Encodes the image: LE count header followed by packed records.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_size());
        bytes.extend_from_slice(&(self.instrs.len() as u64).to_le_bytes());
        for instr in &self.instrs {
            instr.encode_into(&mut bytes);
        }
        bytes
    }

    /// Decodes an image, verifying the exact byte length against the header
    /// count before touching any record.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FormatError::TooShort {
                actual: bytes.len(),
                needed: HEADER_SIZE,
            });
        }

        let count = u64::from_le_bytes(bytes[..HEADER_SIZE].try_into().expect("header slice"));
        // Saturating math: a hand-edited count near u64::MAX must report a
        // mismatch, not overflow.
        let expected = count
            .saturating_mul(RECORD_SIZE as u64)
            .saturating_add(HEADER_SIZE as u64);
        if bytes.len() as u64 != expected {
            return Err(FormatError::SizeMismatch {
                count,
                expected,
                actual: bytes.len(),
            });
        }

        // The length check above proves count * RECORD_SIZE fits in memory.
        let count = count as usize;
        let mut instrs = Vec::with_capacity(count);
        for index in 0..count {
            let start = HEADER_SIZE + index * RECORD_SIZE;
            instrs.push(Instr::decode(&bytes[start..start + RECORD_SIZE], index)?);
        }
        Ok(Self { instrs })
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), FormatError> {
        fs::write(path, self.encode())?;
        Ok(())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let bytes = fs::read(path)?;
        Self::decode(&bytes)
    }
}

/// Renders a human-readable listing of a program, one `index: MNEMONIC args`
/// line per record.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();
    for (index, instr) in program.instrs.iter().enumerate() {
        let _ = write!(out, "{index:4}: {}", instr.opcode.mnemonic());
        match instr.opcode {
            Opcode::Push | Opcode::Pop => {
                match Bank::from_id(instr.arg1) {
                    Some(bank) => {
                        let _ = write!(out, " {}", bank.name());
                        if bank.is_concrete() && instr.arg2 == DYN_INDEX {
                            let _ = write!(out, " INDEX");
                        } else {
                            let _ = write!(out, " {}", instr.arg2);
                        }
                    }
                    None => {
                        let _ = write!(out, " ?bank:{} {}", instr.arg1, instr.arg2);
                    }
                }
            }
            Opcode::Jump => {
                match JumpCond::from_u8(instr.arg1 as u8) {
                    Some(cond) => {
                        let _ = write!(out, " {}", cond.name());
                    }
                    None => {
                        let _ = write!(out, " ?cond:{:#04x}", instr.arg1);
                    }
                }
                let _ = write!(out, " {}", instr.arg2);
            }
            Opcode::Call => {
                let _ = write!(out, " {}", instr.arg2);
            }
            _ => {}
        }
        let _ = writeln!(out);
    }
    out
}

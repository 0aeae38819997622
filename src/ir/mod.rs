//! Instruction set, binary format and assembler.

pub mod assembler;
pub mod format;

pub use assembler::{AsmError, Assembler};
pub use format::{
    disassemble, Bank, FormatError, Instr, JumpCond, Opcode, Program, DYN_INDEX, HEADER_SIZE,
    RECORD_SIZE,
};

//! stackvm - a small stack-based bytecode virtual machine
//!
//! The pipeline has three stages:
//!
//! - **Assembler** ([`ir::Assembler`]): compiles the text instruction language
//!   into a [`ir::Program`] of fixed-width binary records, resolving labels in
//!   two passes so forward references are legal.
//! - **Binary image** ([`ir::Program`]): `[8-byte LE count][9-byte records]`,
//!   packed with no padding. Loading validates the exact byte length.
//! - **CPU** ([`interp::Cpu`]): fetch-decode-execute loop over the records,
//!   with an operand stack, a separate return-address stack for CALL/RETURN,
//!   and banked memory (`LOCAL`/`GLOBAL`/`MEMORY` arrays plus the virtual
//!   `CONSTANT`/`IN`/`OUT` banks).
//!
//! Both CPU stacks are [`guard::GuardedStack`]s: canary regions, dead-byte
//! poisoning of free slots, and a rolling hash turn memory corruption into an
//! immediately detected error instead of silent misbehavior.
//!
//! # Example
//!
//! ```rust
//! use stackvm::ir::Assembler;
//! use stackvm::interp::Cpu;
//!
//! let mut asm = Assembler::new();
//! let program = asm
//!     .assemble("PUSH CONSTANT 2\nPUSH CONSTANT 3\nADD\n")
//!     .unwrap();
//!
//! let mut cpu = Cpu::new(program);
//! cpu.execute().unwrap();
//!
//! assert_eq!(cpu.drain().unwrap(), vec![5]);
//! ```

pub mod guard;
pub mod interp;
pub mod ir;

/// The VM word type. Operand values, memory cells and return addresses are
/// all words.
pub type Word = i64;

//! CPU
//!
//! Fetch-decode-execute loop over a loaded [`Program`]. The CPU owns one
//! operand stack, one return-address stack (both [`GuardedStack`]s), the
//! memory banks and the program counter (`fetcher`).
//!
//! Every executor advances `fetcher` itself, usually by one; `JUMP`, `CALL`
//! and `RETURN` set it explicitly, which is how control flow redirects
//! execution. The loop halts normally when `fetcher` runs past the last
//! instruction, or abnormally on the first executor error. Nothing is ever
//! retried.

use crate::guard::{GuardedStack, StackError};
use crate::interp::banks::MemoryBanks;
use crate::ir::{Bank, Instr, JumpCond, Opcode, Program, DYN_INDEX};
use crate::Word;
use std::io::{self, BufRead, Write};
use thiserror::Error;

/// Initial capacity of the operand and return stacks; both grow on demand.
const STACK_CAPACITY: usize = 16;

/// Runtime errors. Any of these halts the VM immediately.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Stack(#[from] StackError),
    #[error("invalid memory bank id {id}")]
    InvalidBank { id: i32 },
    #[error("offset {offset} out of range for bank {bank}")]
    BankOffset { bank: &'static str, offset: i64 },
    #[error("division by zero at instruction {at}")]
    DivisionByZero { at: usize },
    #[error("negative operand {value} for SQRT at instruction {at}")]
    NegativeOperand { value: Word, at: usize },
    #[error("unknown jump condition byte {byte:#04x} at instruction {at}")]
    UnknownJumpCond { byte: i32, at: usize },
    #[error("negative transfer target {target} at instruction {at}")]
    BadTarget { target: i32, at: usize },
    #[error("cannot parse {input:?} as an input value")]
    Input { input: String },
    #[error("step limit of {limit} instructions exceeded")]
    StepLimit { limit: u64 },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// The virtual machine.
pub struct Cpu {
    fetcher: usize,
    stack: GuardedStack,
    rstack: GuardedStack,
    memory: MemoryBanks,
    program: Program,
    steps: u64,
    step_limit: Option<u64>,
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
}

impl Cpu {
    /// CPU over a loaded program, wired to stdin/stdout for the `IN`/`OUT`
    /// banks.
    pub fn new(program: Program) -> Self {
        Self::with_io(
            program,
            Box::new(io::stdin().lock()),
            Box::new(io::stdout()),
        )
    }

    /// CPU with explicit I/O handles, used by tests to feed `IN` and
    /// capture `OUT`.
    pub fn with_io(program: Program, input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        Self {
            fetcher: 0,
            stack: GuardedStack::new(STACK_CAPACITY, "operand"),
            rstack: GuardedStack::new(STACK_CAPACITY, "return"),
            memory: MemoryBanks::new(),
            program,
            steps: 0,
            step_limit: None,
            input,
            output,
        }
    }

    /// Aborts execution with [`ExecError::StepLimit`] after `limit`
    /// instructions. Programs are allowed to loop forever; this is for
    /// harnesses that need them not to.
    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = Some(limit);
        self
    }

    /// Number of values left on the operand stack.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Pops the whole operand stack, top first.
    pub fn drain(&mut self) -> Result<Vec<Word>, ExecError> {
        let mut values = Vec::with_capacity(self.stack.len());
        while !self.stack.is_empty() {
            values.push(self.stack.pop()?);
        }
        Ok(values)
    }

    /// Runs the program to completion or to the first error.
    pub fn execute(&mut self) -> Result<(), ExecError> {
        while self.fetcher < self.program.len() {
            if let Some(limit) = self.step_limit {
                if self.steps >= limit {
                    return Err(ExecError::StepLimit { limit });
                }
            }
            self.steps += 1;

            let instr = self.program.instrs[self.fetcher];
            match instr.opcode {
                Opcode::Push => self.exec_push(instr)?,
                Opcode::Pop => self.exec_pop(instr)?,
                Opcode::Add => self.exec_binop(|a, b| Ok(a.wrapping_add(b)))?,
                Opcode::Sub => self.exec_binop(|a, b| Ok(a.wrapping_sub(b)))?,
                Opcode::Mul => self.exec_binop(|a, b| Ok(a.wrapping_mul(b)))?,
                Opcode::Div => {
                    let at = self.fetcher;
                    self.exec_binop(move |a, b| {
                        if b == 0 {
                            Err(ExecError::DivisionByZero { at })
                        } else {
                            Ok(a.wrapping_div(b))
                        }
                    })?
                }
                Opcode::Sqrt => self.exec_sqrt()?,
                Opcode::Jump => self.exec_jump(instr)?,
                Opcode::Call => self.exec_call(instr)?,
                Opcode::Return => self.exec_return()?,
            }
        }
        self.output.flush()?;
        Ok(())
    }

    /// Resolves the cell offset of a concrete-bank access: the literal from
    /// `arg2`, or the top of the operand stack for the `INDEX` form.
    fn operand_index(&mut self, arg2: i32) -> Result<i64, ExecError> {
        if arg2 == DYN_INDEX {
            Ok(self.stack.pop()?)
        } else {
            Ok(arg2 as i64)
        }
    }

    fn decode_bank(&self, instr: Instr) -> Result<Bank, ExecError> {
        Bank::from_id(instr.arg1).ok_or(ExecError::InvalidBank { id: instr.arg1 })
    }

    fn exec_push(&mut self, instr: Instr) -> Result<(), ExecError> {
        let bank = self.decode_bank(instr)?;
        match bank {
            Bank::Constant => self.stack.push(instr.arg2 as Word)?,
            Bank::In => {
                for _ in 0..instr.arg2 {
                    let value = self.read_value()?;
                    self.stack.push(value)?;
                }
            }
            Bank::Out => return Err(ExecError::InvalidBank { id: instr.arg1 }),
            _ => {
                let index = self.operand_index(instr.arg2)?;
                let value = self.memory.get(bank, index)?;
                self.stack.push(value)?;
            }
        }
        self.fetcher += 1;
        Ok(())
    }

    fn exec_pop(&mut self, instr: Instr) -> Result<(), ExecError> {
        let bank = self.decode_bank(instr)?;
        match bank {
            Bank::Out => {
                for _ in 0..instr.arg2 {
                    let value = self.stack.pop()?;
                    writeln!(self.output, "{value}")?;
                }
            }
            Bank::Constant | Bank::In => {
                return Err(ExecError::InvalidBank { id: instr.arg1 })
            }
            _ => {
                let index = self.operand_index(instr.arg2)?;
                let value = self.stack.pop()?;
                self.memory.set(bank, index, value)?;
            }
        }
        self.fetcher += 1;
        Ok(())
    }

    /// Pops the right operand first (it is on top), then the left one.
    fn exec_binop<F>(&mut self, op: F) -> Result<(), ExecError>
    where
        F: FnOnce(Word, Word) -> Result<Word, ExecError>,
    {
        let rhs = self.stack.pop()?;
        let lhs = self.stack.pop()?;
        self.stack.push(op(lhs, rhs)?)?;
        self.fetcher += 1;
        Ok(())
    }

    fn exec_sqrt(&mut self) -> Result<(), ExecError> {
        let value = self.stack.pop()?;
        if value < 0 {
            return Err(ExecError::NegativeOperand {
                value,
                at: self.fetcher,
            });
        }
        self.stack.push((value as f64).sqrt() as Word)?;
        self.fetcher += 1;
        Ok(())
    }

    fn target(&self, arg2: i32) -> Result<usize, ExecError> {
        usize::try_from(arg2).map_err(|_| ExecError::BadTarget {
            target: arg2,
            at: self.fetcher,
        })
    }

    fn exec_jump(&mut self, instr: Instr) -> Result<(), ExecError> {
        let cond = JumpCond::from_u8(instr.arg1 as u8).ok_or(ExecError::UnknownJumpCond {
            byte: instr.arg1,
            at: self.fetcher,
        })?;

        // UN never consults the operand stack.
        if cond == JumpCond::Un {
            self.fetcher = self.target(instr.arg2)?;
            return Ok(());
        }

        let value = self.stack.pop()?;
        if cond.holds(value) {
            self.fetcher = self.target(instr.arg2)?;
        } else {
            self.fetcher += 1;
        }
        Ok(())
    }

    fn exec_call(&mut self, instr: Instr) -> Result<(), ExecError> {
        let target = self.target(instr.arg2)?;
        self.rstack.push(self.fetcher as Word)?;
        self.fetcher = target;
        Ok(())
    }

    fn exec_return(&mut self) -> Result<(), ExecError> {
        let address = self.rstack.pop()?;
        // Resume at the instruction after the CALL that got us here.
        self.fetcher = address as usize + 1;
        Ok(())
    }

    /// Reads one whitespace-trimmed line from the `IN` handle and parses it
    /// as a word.
    fn read_value(&mut self) -> Result<Word, ExecError> {
        let mut line = String::new();
        let n = self.input.read_line(&mut line)?;
        if n == 0 {
            return Err(ExecError::Input {
                input: "<eof>".to_string(),
            });
        }
        let text = line.trim();
        text.parse().map_err(|_| ExecError::Input {
            input: text.to_string(),
        })
    }
}

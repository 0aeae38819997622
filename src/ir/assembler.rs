//! Two-pass assembler
//!
//! Converts the text instruction language into a binary [`Program`].
//!
//! Pass 1 walks the source line by line: `;` starts a comment, blank lines
//! are skipped, and the first token of each remaining line selects an entry
//! in the mnemonic table. `JUMP`/`CALL` targets are encoded as *label table
//! slot indices* because the label may not be defined yet; `LABEL` resolves
//! its table entry to the current instruction count without emitting a
//! record.
//!
//! Pass 2 requires every label to be resolved and rewrites each `JUMP`/`CALL`
//! target from its table slot to the label's instruction index. Forward
//! references are therefore legal:
//!
//! ```text
//! JUMP UN end    ; legal, `end` is defined below
//! PUSH CONSTANT 1
//! LABEL end
//! ```

use crate::ir::format::{Bank, Instr, JumpCond, Opcode, Program, DYN_INDEX};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use thiserror::Error;

/// Errors reported during assembly. Syntax errors carry the 1-based source
/// line; unresolved labels are only detectable after the whole file.
#[derive(Debug, Error)]
pub enum AsmError {
    #[error("unknown command {name:?} on line {line}")]
    UnknownCommand { line: usize, name: String },
    #[error("{mnemonic} expects {expected} operand(s), found {found} on line {line}")]
    Arity {
        line: usize,
        mnemonic: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("unknown memory bank {name:?} on line {line}")]
    UnknownBank { line: usize, name: String },
    #[error("bank {bank} cannot be used with {mnemonic} on line {line}")]
    InvalidBankUse {
        line: usize,
        mnemonic: &'static str,
        bank: &'static str,
    },
    #[error("unknown jump condition {name:?} on line {line}")]
    UnknownJumpCond { line: usize, name: String },
    #[error("bad operand {token:?} on line {line}")]
    BadOperand { line: usize, token: String },
    #[error("duplicate label {name:?} on line {line}")]
    DuplicateLabel { line: usize, name: String },
    #[error("unresolved label {name:?}")]
    UnresolvedLabel { name: String },
}

/// One label table entry. `index` stays `None` until a `LABEL` line defines
/// the name.
#[derive(Debug, Clone)]
struct LabelEntry {
    name: String,
    index: Option<i32>,
}

type EncodeFn = fn(&mut Assembler, &[&str], usize, &mut Program) -> Result<(), AsmError>;

/// One mnemonic table record. `arity` counts all tokens on the line,
/// mnemonic included.
struct MnemonicDef {
    name: &'static str,
    arity: usize,
    encode: EncodeFn,
}

/// The instruction set, one declarative table. Dispatch and arity checking
/// both go through it.
static MNEMONICS: &[MnemonicDef] = &[
    MnemonicDef { name: "PUSH", arity: 3, encode: encode_push },
    MnemonicDef { name: "POP", arity: 3, encode: encode_pop },
    MnemonicDef { name: "ADD", arity: 1, encode: encode_add },
    MnemonicDef { name: "SUB", arity: 1, encode: encode_sub },
    MnemonicDef { name: "MUL", arity: 1, encode: encode_mul },
    MnemonicDef { name: "DIV", arity: 1, encode: encode_div },
    MnemonicDef { name: "SQRT", arity: 1, encode: encode_sqrt },
    MnemonicDef { name: "LABEL", arity: 2, encode: encode_label },
    MnemonicDef { name: "JUMP", arity: 3, encode: encode_jump },
    MnemonicDef { name: "CALL", arity: 2, encode: encode_call },
    MnemonicDef { name: "RETURN", arity: 1, encode: encode_return },
];

static MNEMONIC_INDEX: Lazy<HashMap<&'static str, &'static MnemonicDef>> =
    Lazy::new(|| MNEMONICS.iter().map(|def| (def.name, def)).collect());

/// Two-pass assembler. Owns the label table; a single instance can be
/// reused, each [`assemble`](Assembler::assemble) call starts fresh.
#[derive(Default)]
pub struct Assembler {
    labels: Vec<LabelEntry>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembles source text into a program. On any error the partially
    /// built program is dropped; nothing is ever written out.
    pub fn assemble(&mut self, source: &str) -> Result<Program, AsmError> {
        self.labels.clear();
        let mut program = Program::new();

        for (idx, raw) in source.lines().enumerate() {
            let line = idx + 1;
            let text = raw.split(';').next().unwrap_or("").trim();
            if text.is_empty() {
                continue;
            }

            let tokens: Vec<&str> = text.split_whitespace().collect();
            let def = MNEMONIC_INDEX
                .get(tokens[0])
                .ok_or_else(|| AsmError::UnknownCommand {
                    line,
                    name: tokens[0].to_string(),
                })?;
            if tokens.len() != def.arity {
                return Err(AsmError::Arity {
                    line,
                    mnemonic: def.name,
                    expected: def.arity - 1,
                    found: tokens.len() - 1,
                });
            }

            (def.encode)(self, &tokens, line, &mut program)?;
        }

        self.resolve_labels(&mut program)?;
        program.shrink_to_fit();
        Ok(program)
    }

    /// Pass 2: every label must be resolved, then `JUMP`/`CALL` targets are
    /// rewritten from label table slots to instruction indices.
    fn resolve_labels(&self, program: &mut Program) -> Result<(), AsmError> {
        let mut resolved = Vec::with_capacity(self.labels.len());
        for entry in &self.labels {
            match entry.index {
                Some(index) => resolved.push(index),
                None => {
                    return Err(AsmError::UnresolvedLabel {
                        name: entry.name.clone(),
                    })
                }
            }
        }

        for instr in &mut program.instrs {
            if matches!(instr.opcode, Opcode::Jump | Opcode::Call) {
                // Slots were handed out by label_get, so the index is valid.
                instr.arg2 = resolved[instr.arg2 as usize];
            }
        }
        Ok(())
    }

    /// Defines `name` at instruction `index`. Redefinition is an error.
    fn label_set(&mut self, name: &str, index: i32, line: usize) -> Result<(), AsmError> {
        match self.labels.iter_mut().find(|entry| entry.name == name) {
            Some(entry) if entry.index.is_some() => Err(AsmError::DuplicateLabel {
                line,
                name: name.to_string(),
            }),
            Some(entry) => {
                entry.index = Some(index);
                Ok(())
            }
            None => {
                self.labels.push(LabelEntry {
                    name: name.to_string(),
                    index: Some(index),
                });
                Ok(())
            }
        }
    }

    /// Returns the table slot for `name`, appending an unresolved entry for
    /// a first reference.
    fn label_get(&mut self, name: &str) -> i32 {
        if let Some(slot) = self.labels.iter().position(|entry| entry.name == name) {
            return slot as i32;
        }
        self.labels.push(LabelEntry {
            name: name.to_string(),
            index: None,
        });
        (self.labels.len() - 1) as i32
    }
}

fn parse_bank(token: &str, line: usize) -> Result<Bank, AsmError> {
    Bank::from_name(token).ok_or_else(|| AsmError::UnknownBank {
        line,
        name: token.to_string(),
    })
}

/// Parses the second operand of `PUSH`/`POP`: a literal for the virtual
/// banks, a non-negative cell offset or the `INDEX` keyword for concrete
/// ones.
fn parse_operand(bank: Bank, token: &str, line: usize) -> Result<i32, AsmError> {
    if bank.is_concrete() && token == "INDEX" {
        return Ok(DYN_INDEX);
    }
    let bad = || AsmError::BadOperand {
        line,
        token: token.to_string(),
    };
    let value: i32 = token.parse().map_err(|_| bad())?;
    match bank {
        // Immediates may be any i32.
        Bank::Constant => Ok(value),
        // Cell offsets and I/O counts must not be negative.
        _ if value < 0 => Err(bad()),
        _ => Ok(value),
    }
}

fn encode_push(
    _asm: &mut Assembler,
    args: &[&str],
    line: usize,
    program: &mut Program,
) -> Result<(), AsmError> {
    let bank = parse_bank(args[1], line)?;
    if bank == Bank::Out {
        return Err(AsmError::InvalidBankUse {
            line,
            mnemonic: "PUSH",
            bank: bank.name(),
        });
    }
    let operand = parse_operand(bank, args[2], line)?;
    program.push(Instr::new(Opcode::Push, bank as i32, operand));
    Ok(())
}

fn encode_pop(
    _asm: &mut Assembler,
    args: &[&str],
    line: usize,
    program: &mut Program,
) -> Result<(), AsmError> {
    let bank = parse_bank(args[1], line)?;
    if matches!(bank, Bank::Constant | Bank::In) {
        return Err(AsmError::InvalidBankUse {
            line,
            mnemonic: "POP",
            bank: bank.name(),
        });
    }
    let operand = parse_operand(bank, args[2], line)?;
    program.push(Instr::new(Opcode::Pop, bank as i32, operand));
    Ok(())
}

fn encode_label(
    asm: &mut Assembler,
    args: &[&str],
    line: usize,
    program: &mut Program,
) -> Result<(), AsmError> {
    // No record is emitted; the label resolves to the next instruction.
    asm.label_set(args[1], program.len() as i32, line)
}

fn encode_jump(
    asm: &mut Assembler,
    args: &[&str],
    line: usize,
    program: &mut Program,
) -> Result<(), AsmError> {
    let cond = JumpCond::from_name(args[1]).ok_or_else(|| AsmError::UnknownJumpCond {
        line,
        name: args[1].to_string(),
    })?;
    let slot = asm.label_get(args[2]);
    program.push(Instr::new(Opcode::Jump, cond as i32, slot));
    Ok(())
}

fn encode_call(
    asm: &mut Assembler,
    args: &[&str],
    line: usize,
    program: &mut Program,
) -> Result<(), AsmError> {
    let _ = line;
    let slot = asm.label_get(args[1]);
    program.push(Instr::new(Opcode::Call, 0, slot));
    Ok(())
}

macro_rules! plain_encoder {
    ($fname:ident, $opcode:expr) => {
        fn $fname(
            _asm: &mut Assembler,
            _args: &[&str],
            _line: usize,
            program: &mut Program,
        ) -> Result<(), AsmError> {
            program.push(Instr::new($opcode, 0, 0));
            Ok(())
        }
    };
}

plain_encoder!(encode_add, Opcode::Add);
plain_encoder!(encode_sub, Opcode::Sub);
plain_encoder!(encode_mul, Opcode::Mul);
plain_encoder!(encode_div, Opcode::Div);
plain_encoder!(encode_sqrt, Opcode::Sqrt);
plain_encoder!(encode_return, Opcode::Return);

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(source: &str) -> Result<Program, AsmError> {
        Assembler::new().assemble(source)
    }

    #[test]
    fn test_simple_program() {
        let program = assemble("PUSH CONSTANT 2\nPUSH CONSTANT 3\nADD\nPOP OUT 1\n").unwrap();
        assert_eq!(program.len(), 4);
        assert_eq!(
            program.instrs[0],
            Instr::new(Opcode::Push, Bank::Constant as i32, 2)
        );
        assert_eq!(program.instrs[2], Instr::new(Opcode::Add, 0, 0));
        assert_eq!(
            program.instrs[3],
            Instr::new(Opcode::Pop, Bank::Out as i32, 1)
        );
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let program = assemble(
            "; whole-line comment\n\
             \n\
             ADD ; trailing comment\n\
             \t  \n",
        )
        .unwrap();
        assert_eq!(program.len(), 1);
    }

    #[test]
    fn test_label_emits_no_record() {
        let program = assemble("LABEL a\nADD\nLABEL b\n").unwrap();
        assert_eq!(program.len(), 1);
    }

    #[test]
    fn test_backward_reference() {
        let program = assemble("LABEL start\nPUSH CONSTANT 1\nJUMP UN start\n").unwrap();
        assert_eq!(
            program.instrs[1],
            Instr::new(Opcode::Jump, JumpCond::Un as i32, 0)
        );
    }

    #[test]
    fn test_forward_reference() {
        let program = assemble("JUMP UN end\nPUSH CONSTANT 1\nLABEL end\n").unwrap();
        // Target resolves to instruction index 2, one past the PUSH.
        assert_eq!(
            program.instrs[0],
            Instr::new(Opcode::Jump, JumpCond::Un as i32, 2)
        );
    }

    #[test]
    fn test_forward_and_backward_agree() {
        let fwd = assemble("JUMP UN l\nLABEL l\nADD\n").unwrap();
        let bwd = assemble("LABEL l\nADD\nJUMP UN l\n").unwrap();
        assert_eq!(fwd.instrs[0].arg2, 1);
        assert_eq!(bwd.instrs[1].arg2, 0);
    }

    #[test]
    fn test_call_target_resolved() {
        let program = assemble("CALL f\nRETURN\nLABEL f\nADD\nRETURN\n").unwrap();
        assert_eq!(program.instrs[0], Instr::new(Opcode::Call, 0, 2));
    }

    #[test]
    fn test_unknown_command() {
        match assemble("ADD\nNOP\n") {
            Err(AsmError::UnknownCommand { line: 2, name }) => assert_eq!(name, "NOP"),
            other => panic!("expected unknown command, got {other:?}"),
        }
    }

    #[test]
    fn test_arity_checked() {
        assert!(matches!(
            assemble("PUSH CONSTANT\n"),
            Err(AsmError::Arity {
                line: 1,
                expected: 2,
                found: 1,
                ..
            })
        ));
        assert!(matches!(
            assemble("ADD 1\n"),
            Err(AsmError::Arity { line: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_bank() {
        assert!(matches!(
            assemble("PUSH REGISTER 0\n"),
            Err(AsmError::UnknownBank { line: 1, .. })
        ));
    }

    #[test]
    fn test_pop_constant_rejected() {
        assert!(matches!(
            assemble("POP CONSTANT 1\n"),
            Err(AsmError::InvalidBankUse { .. })
        ));
    }

    #[test]
    fn test_index_sentinel() {
        let program = assemble("PUSH LOCAL INDEX\nPOP MEMORY INDEX\n").unwrap();
        assert_eq!(program.instrs[0].arg2, DYN_INDEX);
        assert_eq!(program.instrs[1].arg2, DYN_INDEX);
    }

    #[test]
    fn test_index_invalid_for_constant() {
        assert!(matches!(
            assemble("PUSH CONSTANT INDEX\n"),
            Err(AsmError::BadOperand { line: 1, .. })
        ));
    }

    #[test]
    fn test_negative_offset_rejected() {
        assert!(matches!(
            assemble("POP LOCAL -3\n"),
            Err(AsmError::BadOperand { .. })
        ));
        // Negative immediates are fine.
        assert!(assemble("PUSH CONSTANT -3\n").is_ok());
    }

    #[test]
    fn test_duplicate_label() {
        assert!(matches!(
            assemble("LABEL a\nADD\nLABEL a\n"),
            Err(AsmError::DuplicateLabel { line: 3, .. })
        ));
    }

    #[test]
    fn test_unresolved_label() {
        match assemble("JUMP UN nowhere\n") {
            Err(AsmError::UnresolvedLabel { name }) => assert_eq!(name, "nowhere"),
            other => panic!("expected unresolved label, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_jump_condition() {
        assert!(matches!(
            assemble("JUMP XX somewhere\n"),
            Err(AsmError::UnknownJumpCond { line: 1, .. })
        ));
    }
}

//! Line-oriented assembler for kernel programs.
//!
//! One instruction per line, `;` starts a comment. Registers are written
//! `R0`..`R15`; the three read-only identity registers can also be named
//! `%blockIdx`, `%blockDim` and `%threadIdx`. Immediates are written
//! `#N` (decimal) or `#0xNN`.
//!
//! ```text
//! ; i = blockIdx * blockDim + threadIdx
//! MUL R3, %blockIdx, %blockDim
//! ADD R3, R3, %threadIdx
//! RET
//! ```

use thiserror::Error;

use super::instruction::Instruction;
use crate::device::params::PROGRAM_MEM_SIZE;

/// Assembly error, with the 1-based source line where it occurred.
#[derive(Debug, Error)]
pub enum AsmError {
    /// Mnemonic is not part of the instruction set.
    #[error("line {line}: unknown mnemonic '{mnemonic}'")]
    UnknownMnemonic { line: usize, mnemonic: String },

    /// Wrong number of operands for the mnemonic.
    #[error("line {line}: {mnemonic} takes {expected} operand(s), found {found}")]
    OperandCount {
        line: usize,
        mnemonic: String,
        expected: usize,
        found: usize,
    },

    /// Operand is not a valid register name.
    #[error("line {line}: invalid register '{operand}'")]
    InvalidRegister { line: usize, operand: String },

    /// Operand is not a valid 8-bit immediate.
    #[error("line {line}: invalid immediate '{operand}'")]
    InvalidImmediate { line: usize, operand: String },

    /// Program does not fit in program memory.
    #[error("program too long: {words} words exceed the {capacity}-word program memory")]
    ProgramTooLong { words: usize, capacity: usize },
}

/// Assemble a program into instruction words.
///
/// Blank lines and comments are skipped; the remaining lines map 1:1 to
/// words at consecutive program addresses starting from zero.
pub fn assemble(source: &str) -> Result<Vec<u16>, AsmError> {
    let mut words = Vec::new();

    for (idx, raw_line) in source.lines().enumerate() {
        let line = idx + 1;
        let text = raw_line.split(';').next().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        words.push(assemble_line(text, line)?.encode());
    }

    if words.len() > PROGRAM_MEM_SIZE {
        return Err(AsmError::ProgramTooLong {
            words: words.len(),
            capacity: PROGRAM_MEM_SIZE,
        });
    }
    Ok(words)
}

/// Assemble a single non-empty, comment-stripped line.
fn assemble_line(text: &str, line: usize) -> Result<Instruction, AsmError> {
    let mut parts = text.splitn(2, char::is_whitespace);
    let mnemonic = parts.next().unwrap_or("").to_ascii_uppercase();
    let operands: Vec<&str> = match parts.next() {
        Some(rest) => rest.split(',').map(str::trim).collect(),
        None => Vec::new(),
    };

    let expect = |n: usize| -> Result<(), AsmError> {
        if operands.len() == n {
            Ok(())
        } else {
            Err(AsmError::OperandCount {
                line,
                mnemonic: mnemonic.clone(),
                expected: n,
                found: operands.len(),
            })
        }
    };

    match mnemonic.as_str() {
        "NOP" => {
            expect(0)?;
            Ok(Instruction::Nop)
        }
        "ADD" => {
            expect(3)?;
            Ok(Instruction::Add {
                rd: parse_register(operands[0], line)?,
                rs: parse_register(operands[1], line)?,
                rt: parse_register(operands[2], line)?,
            })
        }
        "MUL" => {
            expect(3)?;
            Ok(Instruction::Mul {
                rd: parse_register(operands[0], line)?,
                rs: parse_register(operands[1], line)?,
                rt: parse_register(operands[2], line)?,
            })
        }
        "LDR" => {
            expect(2)?;
            Ok(Instruction::Ldr {
                rd: parse_register(operands[0], line)?,
                rs: parse_register(operands[1], line)?,
            })
        }
        "STR" => {
            expect(2)?;
            Ok(Instruction::Str {
                rs: parse_register(operands[0], line)?,
                rt: parse_register(operands[1], line)?,
            })
        }
        "CONST" => {
            expect(2)?;
            Ok(Instruction::Const {
                rd: parse_register(operands[0], line)?,
                imm: parse_immediate(operands[1], line)?,
            })
        }
        "RET" => {
            expect(0)?;
            Ok(Instruction::Ret)
        }
        _ => Err(AsmError::UnknownMnemonic {
            line,
            mnemonic: mnemonic.clone(),
        }),
    }
}

fn parse_register(operand: &str, line: usize) -> Result<u8, AsmError> {
    match operand.to_ascii_lowercase().as_str() {
        "%blockidx" => return Ok(crate::emu::regfile::REG_BLOCK_IDX),
        "%blockdim" => return Ok(crate::emu::regfile::REG_BLOCK_DIM),
        "%threadidx" => return Ok(crate::emu::regfile::REG_THREAD_IDX),
        _ => {}
    }

    let rest = operand
        .strip_prefix('R')
        .or_else(|| operand.strip_prefix('r'));
    match rest.and_then(|n| n.parse::<u8>().ok()) {
        Some(n) if n < 16 => Ok(n),
        _ => Err(AsmError::InvalidRegister {
            line,
            operand: operand.to_string(),
        }),
    }
}

fn parse_immediate(operand: &str, line: usize) -> Result<u8, AsmError> {
    let err = || AsmError::InvalidImmediate {
        line,
        operand: operand.to_string(),
    };

    let digits = operand.strip_prefix('#').ok_or_else(err)?;
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16)
    } else {
        digits.parse::<u8>()
    };
    value.map_err(|_| err())
}

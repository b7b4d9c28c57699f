//! Instruction set of the accelerator.
//!
//! This module provides:
//! - The 16-bit instruction word and its decoder/disassembler
//! - A line-oriented assembler for writing kernels as text
//! - A loader for raw little-endian kernel images

pub mod asm;
pub mod image;
pub mod instruction;

pub use asm::{assemble, AsmError};
pub use image::{parse_program_image, ImageError};
pub use instruction::Instruction;

//! Raw kernel image loading.
//!
//! A kernel image is a flat sequence of little-endian 16-bit instruction
//! words, as produced by assembling offline. No header, no sections.

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::device::params::PROGRAM_MEM_SIZE;

/// Kernel image parse error.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Image length is not a multiple of the instruction width.
    #[error("image length {0} is not a multiple of 2 bytes")]
    OddLength(usize),

    /// Image holds more words than program memory.
    #[error("image holds {words} words, program memory holds {capacity}")]
    TooLong { words: usize, capacity: usize },
}

/// Parse a raw little-endian kernel image into instruction words.
pub fn parse_program_image(bytes: &[u8]) -> Result<Vec<u16>, ImageError> {
    if bytes.len() % 2 != 0 {
        return Err(ImageError::OddLength(bytes.len()));
    }
    let words = bytes.len() / 2;
    if words > PROGRAM_MEM_SIZE {
        return Err(ImageError::TooLong {
            words,
            capacity: PROGRAM_MEM_SIZE,
        });
    }

    let mut cursor = std::io::Cursor::new(bytes);
    let mut program = Vec::with_capacity(words);
    for _ in 0..words {
        // Cursor over a checked-length slice cannot fail here.
        match cursor.read_u16::<LittleEndian>() {
            Ok(word) => program.push(word),
            Err(_) => return Err(ImageError::OddLength(bytes.len())),
        }
    }
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::instruction::Instruction;

    #[test]
    fn test_parse_words_little_endian() {
        // 0x3123 then 0xF000, little-endian byte order.
        let bytes = [0x23, 0x31, 0x00, 0xF0];
        let words = parse_program_image(&bytes).unwrap();
        assert_eq!(words, vec![0x3123, 0xF000]);
        assert_eq!(
            Instruction::decode(words[0]),
            Instruction::Add { rd: 1, rs: 2, rt: 3 }
        );
        assert_eq!(Instruction::decode(words[1]), Instruction::Ret);
    }

    #[test]
    fn test_empty_image() {
        assert!(parse_program_image(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_odd_length_rejected() {
        assert!(matches!(
            parse_program_image(&[0x00, 0x00, 0x23]).unwrap_err(),
            ImageError::OddLength(3)
        ));
    }

    #[test]
    fn test_too_long_rejected() {
        let bytes = vec![0u8; (PROGRAM_MEM_SIZE + 1) * 2];
        assert!(matches!(
            parse_program_image(&bytes).unwrap_err(),
            ImageError::TooLong { .. }
        ));
    }
}

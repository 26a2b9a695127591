//! `.ls8` program images.
//!
//! The source format is one instruction byte per line, written as eight
//! binary digits. `#` starts a comment that runs to the end of the line;
//! blank lines are skipped. Anything else fails the whole load — a
//! malformed image never produces a partially-running machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::memory::Memory;
use super::output::OutputSink;
use super::Emulator;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LoadError {
    #[error("program contains no instruction bytes")]
    EmptyProgram,
    #[error("line {line}: expected eight binary digits, found {found:?}")]
    InvalidLine { line: usize, found: String },
    #[error("program of {len} bytes does not fit in {capacity} bytes of memory")]
    ProgramTooLarge { len: usize, capacity: usize },
}

/// Parse `.ls8` source text into a program image.
pub fn parse_source(source: &str) -> Result<Vec<u8>, LoadError> {
    let span = tracing::debug_span!("parse_source", source_len = source.len());
    let _enter = span.enter();

    let mut image = Vec::new();
    for (index, raw) in source.lines().enumerate() {
        let digits = raw.split('#').next().unwrap_or("").trim();
        if digits.is_empty() {
            continue;
        }
        if digits.len() != 8 || !digits.bytes().all(|b| b == b'0' || b == b'1') {
            return Err(LoadError::InvalidLine {
                line: index + 1,
                found: digits.to_string(),
            });
        }
        let value = u8::from_str_radix(digits, 2).map_err(|_| LoadError::InvalidLine {
            line: index + 1,
            found: digits.to_string(),
        })?;
        tracing::trace!(address = image.len(), value, "image byte");
        image.push(value);
    }

    if image.is_empty() {
        return Err(LoadError::EmptyProgram);
    }
    tracing::debug!(len = image.len(), "image parsed");
    Ok(image)
}

impl<M: Memory, O: OutputSink> Emulator<M, O> {
    /// Flash a program image into memory starting at address 0. The image
    /// must be non-empty and fit entirely; nothing is written otherwise.
    pub fn load_program(&mut self, image: &[u8]) -> Result<(), LoadError> {
        let span = tracing::info_span!("load_program", len = image.len());
        let _enter = span.enter();

        if image.is_empty() {
            return Err(LoadError::EmptyProgram);
        }
        let capacity = self.memory.size();
        if image.len() > capacity {
            return Err(LoadError::ProgramTooLarge {
                len: image.len(),
                capacity,
            });
        }
        for (address, &byte) in image.iter().enumerate() {
            // Cannot fault: the image was just checked against capacity.
            if self.memory.write(address as u8, byte).is_err() {
                return Err(LoadError::ProgramTooLarge {
                    len: image.len(),
                    capacity,
                });
            }
        }
        tracing::info!(len = image.len(), "program loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::Ram;
    use super::super::output::BufferSink;
    use super::*;

    #[test]
    fn parses_binary_lines_with_comments() {
        let source = "\
# print8.ls8: Print the number 8 on the screen

10011001 # LDI R0,8
00000000
00001000
01000011 # PRN R0
00000000
00000001 # HLT
";
        assert_eq!(
            parse_source(source).unwrap(),
            [0b10011001, 0, 8, 0b01000011, 0, 0b00000001]
        );
    }

    #[test]
    fn rejects_lines_that_are_not_eight_binary_digits() {
        let err = parse_source("10011001\n1001\n").unwrap_err();
        assert_eq!(
            err,
            LoadError::InvalidLine {
                line: 2,
                found: "1001".into()
            }
        );

        let err = parse_source("10011021\n").unwrap_err();
        assert_eq!(
            err,
            LoadError::InvalidLine {
                line: 1,
                found: "10011021".into()
            }
        );
    }

    #[test]
    fn comment_only_source_is_empty() {
        assert_eq!(
            parse_source("# nothing here\n\n# still nothing\n"),
            Err(LoadError::EmptyProgram)
        );
    }

    #[test]
    fn load_program_flashes_from_address_zero() {
        let mut machine = Emulator::new(Ram::default(), BufferSink::new());
        machine.load_program(&[0x99, 0x00, 0x08, 0x01]).unwrap();
        assert_eq!(machine.memory.read(0), Ok(0x99));
        assert_eq!(machine.memory.read(3), Ok(0x01));
        assert_eq!(machine.memory.read(4), Ok(0x00));
    }

    #[test]
    fn load_program_refuses_oversized_or_empty_images() {
        let mut machine = Emulator::new(Ram::new(4), BufferSink::new());
        assert_eq!(machine.load_program(&[]), Err(LoadError::EmptyProgram));
        assert_eq!(
            machine.load_program(&[0; 5]),
            Err(LoadError::ProgramTooLarge {
                len: 5,
                capacity: 4
            })
        );
    }
}

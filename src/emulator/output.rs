//! The print capability. PRN hands the sink a register value as a number,
//! PRA as a character; rendering is entirely the sink's business.

use std::io::{self, Write};

pub trait OutputSink {
    fn print_value(&mut self, value: u8);
    fn print_char(&mut self, ch: char);
}

/// Writes to the process stdout: numbers one per line, characters as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn print_value(&mut self, value: u8) {
        println!("{value}");
    }

    fn print_char(&mut self, ch: char) {
        print!("{ch}");
        // Characters usually arrive without a trailing newline.
        let _ = io::stdout().flush();
    }
}

/// Collects everything in a string, for tests and captured runs.
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    buffer: String,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }
}

impl OutputSink for BufferSink {
    fn print_value(&mut self, value: u8) {
        self.buffer.push_str(&value.to_string());
        self.buffer.push('\n');
    }

    fn print_char(&mut self, ch: char) {
        self.buffer.push(ch);
    }
}

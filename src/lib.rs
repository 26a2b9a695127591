#![warn(clippy::all, rust_2018_idioms)]

pub mod emulator;

pub use emulator::{CpuState, Emulator, ExecError};

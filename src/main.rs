#![warn(clippy::all, rust_2018_idioms)]

use std::process::ExitCode;
use std::time::{Duration, Instant};
use std::{env, fs, thread};

use ls8_emulator::emulator::memory::Ram;
use ls8_emulator::emulator::output::StdoutSink;
use ls8_emulator::emulator::parse;
use ls8_emulator::{CpuState, Emulator};
use tracing_subscriber::EnvFilter;

/// The interrupt line the wall-clock timer is wired to.
const TIMER_LINE: u8 = 0;
const TIMER_PERIOD: Duration = Duration::from_secs(1);
/// 1 kHz clock, like the reference machine.
const CLOCK_PERIOD: Duration = Duration::from_millis(1);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: ls8 <program.ls8>");
        return ExitCode::FAILURE;
    };

    let source = match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read {path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let image = match parse::parse_source(&source) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("error: {path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut machine = Emulator::new(Ram::default(), StdoutSink);
    if let Err(err) = machine.load_program(&image) {
        eprintln!("error: {path}: {err}");
        return ExitCode::FAILURE;
    }

    // The machine itself has no clock; this loop is the clock. Once per
    // period the timer line goes up, sampled by the engine at the next
    // cycle boundary.
    let mut last_tick = Instant::now();
    while machine.state() == CpuState::Running {
        if last_tick.elapsed() >= TIMER_PERIOD {
            machine.raise_interrupt(TIMER_LINE);
            last_tick = Instant::now();
        }
        if machine.step().is_err() {
            break;
        }
        thread::sleep(CLOCK_PERIOD);
    }

    match machine.fault() {
        Some(fault) => {
            eprintln!("error: machine halted: {fault}");
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    }
}

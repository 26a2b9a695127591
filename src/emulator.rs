#![allow(clippy::unusual_byte_groupings)] // so we can group opcode bits by field

pub mod alu;
pub mod memory;
pub mod ops;
pub mod output;
pub mod parse;

use thiserror::Error;

use self::memory::Memory;
use self::ops::OpCode;
use self::output::OutputSink;

/// Interrupt mask register.
pub const IM: usize = 5;
/// Interrupt status register.
pub const IS: usize = 6;
/// Stack pointer register.
pub const SP: usize = 7;

/// Where the stack pointer starts; the stack grows down from here.
pub const SP_INIT: u8 = 0xF4;
/// First byte of the interrupt vector table. Line `i` vectors through
/// `VECTOR_TABLE + i`.
pub const VECTOR_TABLE: u8 = 0xF8;

// FL register bits. CMP writes exactly one of these; the rest of FL is
// always zero.
pub const FL_LT: u8 = 0b100;
pub const FL_GT: u8 = 0b010;
pub const FL_EQ: u8 = 0b001;

/// Why the machine stopped dead. Every variant is terminal: the engine
/// transitions to [`CpuState::Halted`] and stays there until [`Emulator::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("unknown opcode 0b{opcode:08b} at address 0x{pc:02X}")]
    UnknownOpcode { opcode: u8, pc: u8 },
    #[error("division by zero")]
    DivisionByZero,
    #[error("memory access out of bounds at 0x{address:02X}")]
    OutOfBounds { address: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Running,
    Halted,
}

/// An LS-8 machine: eight 8-bit registers, a program counter, a flags
/// register, and a byte-coded instruction stream in at most 256 bytes of
/// memory.
///
/// The emulator owns its memory and output sink through the [`Memory`] and
/// [`OutputSink`] traits, so multiple independent machines can run side by
/// side and tests can substitute their own stores and sinks. One call to
/// [`step`](Emulator::step) is one instruction cycle; the caller decides
/// when and how often to invoke it.
#[derive(Debug, Clone)]
pub struct Emulator<M: Memory, O: OutputSink> {
    /// General-purpose registers R0-R7. R5 is the interrupt mask, R6 the
    /// interrupt status, R7 the stack pointer; programs may still address
    /// them like any other register.
    pub r: [u8; 8],

    /// Program counter: address of the next instruction to fetch.
    pub pc: u8,

    /// Flags register. Only CMP writes it, and a CMP fully overwrites it
    /// with exactly one of `FL_LT`/`FL_GT`/`FL_EQ`.
    pub fl: u8,

    /// Backing store for program, data, stack and the vector table.
    pub memory: M,

    /// Where PRN and PRA deliver their values.
    pub output: O,

    state: CpuState,
    interrupts_enabled: bool,
    fault: Option<ExecError>,
}

impl<M: Memory, O: OutputSink> Emulator<M, O> {
    pub fn new(memory: M, output: O) -> Self {
        let mut r = [0; 8];
        r[SP] = SP_INIT;
        Self {
            r,
            pc: 0,
            fl: 0,
            memory,
            output,
            state: CpuState::Running,
            interrupts_enabled: true,
            fault: None,
        }
    }

    pub fn state(&self) -> CpuState {
        self.state
    }

    /// The reason for a fatal halt, if the machine died on one. A clean
    /// HLT leaves this `None`.
    pub fn fault(&self) -> Option<ExecError> {
        self.fault
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    /// Mark interrupt line `line` (0-7) pending. External drivers (a timer,
    /// a keyboard) call this between cycles; the engine samples IS at the
    /// top of each cycle.
    pub fn raise_interrupt(&mut self, line: u8) {
        self.r[IS] |= 1 << (line & 0x07);
        tracing::debug!(line = line & 0x07, is = self.r[IS], "interrupt raised");
    }

    /// Put the register file, PC, FL and interrupt state back to power-on
    /// values. Memory contents are left alone.
    pub fn reset(&mut self) {
        self.r = [0; 8];
        self.r[SP] = SP_INIT;
        self.pc = 0;
        self.fl = 0;
        self.state = CpuState::Running;
        self.interrupts_enabled = true;
        self.fault = None;
        tracing::info!("machine reset");
    }

    /// Execute one instruction cycle.
    ///
    /// A pending, unmasked interrupt consumes the whole cycle: state is
    /// saved and PC moves to the handler, but no instruction is fetched.
    /// On a fatal error the machine transitions to `Halted`, records the
    /// reason, and the error is returned; a halted machine ignores further
    /// `step` calls until [`reset`](Emulator::reset).
    pub fn step(&mut self) -> Result<(), ExecError> {
        if self.state == CpuState::Halted {
            return Ok(());
        }
        match self.cycle() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fault = Some(err);
                self.state = CpuState::Halted;
                tracing::error!(reason = %err, "machine halted on fault");
                Err(err)
            }
        }
    }

    /// Run cycles until the machine halts, or until `max_steps` cycles have
    /// executed if a budget is given.
    pub fn run(&mut self, max_steps: Option<usize>) -> Result<(), ExecError> {
        let span = tracing::info_span!("run", max_steps = ?max_steps);
        let _enter = span.enter();

        let mut steps = 0usize;
        while self.state == CpuState::Running {
            if let Some(max) = max_steps {
                if steps >= max {
                    tracing::info!(steps, "step budget exhausted");
                    return Ok(());
                }
                steps += 1;
            }
            self.step()?;
        }
        tracing::info!("machine halted");
        Ok(())
    }

    fn cycle(&mut self) -> Result<(), ExecError> {
        let span = tracing::trace_span!("cycle", pc = self.pc);
        let _enter = span.enter();

        if self.service_interrupt()? {
            return Ok(());
        }

        // Fetch and decode. Operand bytes an instruction doesn't have
        // default to zero.
        let opcode = self.memory.read(self.pc)?;
        let op = OpCode::from_value(opcode).ok_or(ExecError::UnknownOpcode {
            opcode,
            pc: self.pc,
        })?;
        let count = op.operand_count();
        let operand_a = if count >= 1 {
            self.memory.read(self.pc.wrapping_add(1))?
        } else {
            0
        };
        let operand_b = if count >= 2 {
            self.memory.read(self.pc.wrapping_add(2))?
        } else {
            0
        };
        tracing::trace!(op = %op, operand_a, operand_b, "dispatch");

        let pc_set = self.execute(op, operand_a, operand_b)?;
        debug_assert!(!pc_set || op.sets_pc());

        if !pc_set {
            self.pc = self.pc.wrapping_add(count + 1);
        }
        Ok(())
    }

    /// Perform one instruction. Returns whether the instruction wrote PC
    /// itself, in which case the caller must not auto-advance.
    fn execute(&mut self, op: OpCode, operand_a: u8, operand_b: u8) -> Result<bool, ExecError> {
        let ra = (operand_a & 0x07) as usize;
        let rb = (operand_b & 0x07) as usize;

        if let Some(alu_op) = op.alu_op() {
            let out = alu::apply(alu_op, self.r[ra], self.r[rb])?;
            if let Some(result) = out.result {
                self.r[ra] = result;
            }
            if let Some(fl) = out.fl {
                self.fl = fl;
                tracing::trace!(fl, "flags updated");
            }
            return Ok(false);
        }

        match op {
            OpCode::Nop => Ok(false),
            OpCode::Hlt => {
                self.state = CpuState::Halted;
                tracing::info!("HLT");
                Ok(false)
            }
            OpCode::Ldi => {
                self.r[ra] = operand_b;
                Ok(false)
            }
            OpCode::Ld => {
                self.r[ra] = self.memory.read(self.r[rb])?;
                Ok(false)
            }
            OpCode::St => {
                self.memory.write(self.r[ra], self.r[rb])?;
                Ok(false)
            }
            OpCode::Prn => {
                self.output.print_value(self.r[ra]);
                Ok(false)
            }
            OpCode::Pra => {
                self.output.print_char(self.r[ra] as char);
                Ok(false)
            }
            OpCode::Push => {
                self.push(self.r[ra])?;
                Ok(false)
            }
            OpCode::Pop => {
                self.r[ra] = self.pop()?;
                Ok(false)
            }
            OpCode::Call => {
                // Return address is the byte after CALL's operand.
                self.push(self.pc.wrapping_add(2))?;
                self.pc = self.r[ra];
                Ok(true)
            }
            OpCode::Ret => {
                self.pc = self.pop()?;
                Ok(true)
            }
            OpCode::Int => {
                let line = self.r[ra] & 0x07;
                self.r[IS] |= 1 << line;
                tracing::debug!(line, "INT raised software interrupt");
                Ok(false)
            }
            OpCode::Iret => {
                self.return_from_interrupt()?;
                Ok(true)
            }
            OpCode::Jmp => {
                self.pc = self.r[ra];
                Ok(true)
            }
            OpCode::Jeq => Ok(self.jump_if(self.fl & FL_EQ != 0, ra)),
            OpCode::Jne => Ok(self.jump_if(self.fl & FL_EQ == 0, ra)),
            OpCode::Jlt => Ok(self.jump_if(self.fl & FL_LT != 0, ra)),
            OpCode::Jgt => Ok(self.jump_if(self.fl & FL_GT != 0, ra)),

            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Inc
            | OpCode::Dec
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Not
            | OpCode::Cmp => unreachable!("ALU opcodes are dispatched above"),
        }
    }

    /// Conditional control transfer: only a taken branch counts as having
    /// set PC, an untaken one falls through to the normal advance.
    fn jump_if(&mut self, taken: bool, reg: usize) -> bool {
        if taken {
            self.pc = self.r[reg];
            tracing::trace!(target = self.pc, "branch taken");
        }
        taken
    }

    /// Push one byte. SP is only moved once the write has succeeded, so a
    /// faulting push leaves the register file untouched.
    fn push(&mut self, value: u8) -> Result<(), ExecError> {
        let sp = self.r[SP].wrapping_sub(1);
        self.memory.write(sp, value)?;
        self.r[SP] = sp;
        tracing::trace!(sp, value, "push");
        Ok(())
    }

    fn pop(&mut self) -> Result<u8, ExecError> {
        let value = self.memory.read(self.r[SP])?;
        self.r[SP] = self.r[SP].wrapping_add(1);
        tracing::trace!(sp = self.r[SP], value, "pop");
        Ok(value)
    }

    /// Check for a pending, unmasked interrupt and dispatch the lowest set
    /// line. Returns whether a dispatch happened (which consumes the cycle).
    ///
    /// Entry saves PC, FL, then R0-R6 on the stack. The saved IS value has
    /// the dispatched bit already cleared, so restoring it on IRET cannot
    /// re-raise the same line. R7 is the stack pointer itself and is never
    /// saved; balanced push/pop brings it back as a side effect.
    fn service_interrupt(&mut self) -> Result<bool, ExecError> {
        if !self.interrupts_enabled {
            return Ok(false);
        }
        let pending = self.r[IM] & self.r[IS];
        if pending == 0 {
            return Ok(false);
        }
        let line = pending.trailing_zeros() as u8;

        let span = tracing::debug_span!("interrupt_entry", line);
        let _enter = span.enter();

        let is_after = self.r[IS] & !(1 << line);
        let frame = [
            self.pc, self.fl, self.r[0], self.r[1], self.r[2], self.r[3], self.r[4], self.r[5],
            is_after,
        ];

        // Stage every fallible access before mutating machine state.
        let mut sp = self.r[SP];
        for value in frame {
            sp = sp.wrapping_sub(1);
            self.memory.write(sp, value)?;
        }
        let handler = self.memory.read(VECTOR_TABLE.wrapping_add(line))?;

        self.r[IS] = is_after;
        self.r[SP] = sp;
        self.interrupts_enabled = false;
        self.pc = handler;
        tracing::debug!(handler, "interrupt dispatched");
        Ok(true)
    }

    /// IRET: pop R6 down to R0, then FL, then PC, and accept interrupts
    /// again. Exact reverse of the entry order.
    fn return_from_interrupt(&mut self) -> Result<(), ExecError> {
        let span = tracing::debug_span!("interrupt_return");
        let _enter = span.enter();

        let mut sp = self.r[SP];
        let mut frame = [0u8; 9];
        for slot in frame.iter_mut() {
            *slot = self.memory.read(sp)?;
            sp = sp.wrapping_add(1);
        }
        let [r6, r5, r4, r3, r2, r1, r0, fl, pc] = frame;

        self.r[0] = r0;
        self.r[1] = r1;
        self.r[2] = r2;
        self.r[3] = r3;
        self.r[4] = r4;
        self.r[5] = r5;
        self.r[6] = r6;
        self.fl = fl;
        self.pc = pc;
        self.r[SP] = sp;
        self.interrupts_enabled = true;
        tracing::debug!(pc, "interrupt return");
        Ok(())
    }
}

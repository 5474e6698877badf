//! CPU status snapshot, materialized by the CPU thread and handed to the UI
//! thread as a plain value — no shared interior mutability crosses the
//! boundary, matching the teacher's copy-for-the-UI approach to its own
//! debugger overlay (`processor.rs`'s `Debugger`/`disassemble`).

use crate::registers::Registers;

#[derive(Debug, Clone)]
pub struct CpuStatus {
    pub registers: Registers,
    pub cycles: u64,
    pub stack_window: [u8; 6],
    pub mnemonic: String,
    pub operands: String,
    pub run_state: RunState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Run,
    Stop,
    Step,
    Next,
    Halted,
    Exit,
}

impl CpuStatus {
    /// `mnemonic` and `operands` are kept apart rather than pre-joined,
    /// mirroring `Mc6809CpuStatus`'s separate `mnemonic[8]`/`operands[20]`
    /// fields, so a UI can column-align them independently.
    pub fn capture(
        regs: &Registers,
        cycles: u64,
        stack_window: [u8; 6],
        mnemonic: String,
        operands: String,
        run_state: RunState,
    ) -> Self {
        CpuStatus { registers: regs.clone(), cycles, stack_window, mnemonic, operands, run_state }
    }
}

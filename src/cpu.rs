//! The MC6809 instruction interpreter: decode, addressing, ALU dispatch and
//! interrupt servicing.
//!
//! Grounded on `other_examples/2a55b2af_c0rner-mc6809-core__src-cpu.rs.rs`
//! for the interrupt/stack-frame structure (vector constants, push/pull
//! order, NMI-arming rule) and on the teacher's `processor.rs` for the
//! fetch-execute pipeline shape (`clock_cycle`, `memory_handle`,
//! `lookahead`) and its `CCRFlags`-merge-into-`CC` idiom, generalized here
//! to the 6809's single condition-code register.

use crate::addressing::{decode_indexed, resolve_indirect};
use crate::alu;
use crate::bus::Bus;
use crate::error::Mc6809Error;
use crate::events::{Event, PendingEvents};
use crate::registers::{ConditionCodes, RegisterCode, Registers};
use std::sync::{Arc, Mutex};

pub const VEC_RESET: u16 = 0xfffe;
pub const VEC_NMI: u16 = 0xfffc;
pub const VEC_SWI: u16 = 0xfffa;
pub const VEC_IRQ: u16 = 0xfff8;
pub const VEC_FIRQ: u16 = 0xfff6;
pub const VEC_SWI2: u16 = 0xfff4;
pub const VEC_SWI3: u16 = 0xfff2;

/// What the CPU fetched and how it should be operated on: either a memory
/// location (direct/extended/indexed) or a value already resident in the
/// instruction stream (immediate) or a register.
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    Address(u16),
    Immediate8(u8),
    Immediate16(u16),
}

pub struct Cpu {
    pub regs: Registers,
    pub bus: Arc<Mutex<Bus>>,
    pub cycles: u64,
    pub halted: bool,
    pub waiting_sync: bool,
    pub events: Arc<PendingEvents>,
    nmi_armed: bool,
    nmi_line: bool,
    firq_line: bool,
    irq_line: bool,
    cwai_mask: Option<ConditionCodes>,
}

impl Cpu {
    pub fn new(bus: Arc<Mutex<Bus>>) -> Self {
        Self::with_events(bus, Arc::new(PendingEvents::new()))
    }

    /// Builds a CPU sharing `events` with its [`crate::scheduler::Scheduler`],
    /// so an `NMI`/`FIRQ`/`IRQ`/`INVALID` raised inside `step()` is visible
    /// to the thread servicing the run loop without a separate channel.
    pub fn with_events(bus: Arc<Mutex<Bus>>, events: Arc<PendingEvents>) -> Self {
        Cpu {
            regs: Registers::new(),
            bus,
            cycles: 0,
            halted: false,
            waiting_sync: false,
            events,
            nmi_armed: false,
            nmi_line: false,
            firq_line: false,
            irq_line: false,
            cwai_mask: None,
        }
    }

    /// True for BSR/LBSR/JSR opcodes, the "step over" feature's cue to plant
    /// the internal breakpoint at the return address instead of just
    /// stopping after the next instruction.
    pub fn is_subroutine_call(opcode: u8) -> bool {
        matches!(opcode, 0x8d | 0x17 | 0x9d | 0xad | 0xbd)
    }

    /// Resets registers to the power-on state and loads PC from the reset
    /// vector. `S` is left untouched by real hardware; callers typically
    /// set it explicitly before the first `step`.
    pub fn reset(&mut self) {
        self.regs.cc = ConditionCodes::IRQ_MASK | ConditionCodes::FIRQ_MASK;
        self.regs.dp = 0;
        self.regs.pc = self.bus.lock().unwrap().read_word(VEC_RESET);
        self.cycles = 0;
        self.halted = false;
        self.waiting_sync = false;
        self.nmi_armed = false;
        self.nmi_line = false;
    }

    pub fn set_irq(&mut self, level: bool) {
        self.irq_line = level;
        if level {
            self.events.set(Event::IRQ);
        }
    }

    pub fn set_firq(&mut self, level: bool) {
        self.firq_line = level;
        if level {
            self.events.set(Event::FIRQ);
        }
    }

    /// NMI is edge-triggered and is only armed after the first write to `S`
    /// following reset, matching real hardware's power-up behavior.
    pub fn trigger_nmi(&mut self) {
        if self.nmi_armed {
            self.nmi_line = true;
            self.events.set(Event::NMI);
        }
    }

    fn arm_nmi_if_needed(&mut self) {
        self.nmi_armed = true;
    }

    fn fetch_byte(&mut self) -> u8 {
        let value = self.bus.lock().unwrap().read_byte(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    fn fetch_word(&mut self) -> u16 {
        let hi = self.fetch_byte();
        let lo = self.fetch_byte();
        u16::from_be_bytes([hi, lo])
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        self.bus.lock().unwrap().read_byte(addr)
    }
    fn write_byte(&mut self, addr: u16, value: u8) {
        self.bus.lock().unwrap().write_byte(addr, value);
    }
    pub fn read_word(&self, addr: u16) -> u16 {
        self.bus.lock().unwrap().read_word(addr)
    }
    fn write_word(&mut self, addr: u16, value: u16) {
        self.bus.lock().unwrap().write_word(addr, value);
    }

    // ---- stack helpers -------------------------------------------------

    fn push_byte_s(&mut self, value: u8) {
        self.regs.s = self.regs.s.wrapping_sub(1);
        self.arm_nmi_if_needed();
        self.write_byte(self.regs.s, value);
    }
    fn push_word_s(&mut self, value: u16) {
        let bytes = value.to_be_bytes();
        self.push_byte_s(bytes[1]);
        self.push_byte_s(bytes[0]);
    }
    fn pull_byte_s(&mut self) -> u8 {
        let value = self.read_byte(self.regs.s);
        self.regs.s = self.regs.s.wrapping_add(1);
        value
    }
    fn pull_word_s(&mut self) -> u16 {
        let hi = self.pull_byte_s();
        let lo = self.pull_byte_s();
        u16::from_be_bytes([hi, lo])
    }
    fn push_byte_u(&mut self, value: u8) {
        self.regs.u = self.regs.u.wrapping_sub(1);
        self.write_byte(self.regs.u, value);
    }
    fn push_word_u(&mut self, value: u16) {
        let bytes = value.to_be_bytes();
        self.push_byte_u(bytes[1]);
        self.push_byte_u(bytes[0]);
    }
    fn pull_byte_u(&mut self) -> u8 {
        let value = self.read_byte(self.regs.u);
        self.regs.u = self.regs.u.wrapping_add(1);
        value
    }
    fn pull_word_u(&mut self) -> u16 {
        let hi = self.pull_byte_u();
        let lo = self.pull_byte_u();
        u16::from_be_bytes([hi, lo])
    }

    /// Full interrupt stack frame, high addresses first: PC, U, Y, X, DP,
    /// B, A, CC. Used by NMI/IRQ/SWI*; FIRQ only pushes PC and CC.
    fn push_entire_state(&mut self) {
        let pc = self.regs.pc;
        let u = self.regs.u;
        let y = self.regs.y;
        let x = self.regs.x;
        let dp = self.regs.dp;
        let b = self.regs.b;
        let a = self.regs.a;
        let cc = self.regs.cc.bits();
        self.push_word_s(pc);
        self.push_word_s(u);
        self.push_word_s(y);
        self.push_word_s(x);
        self.push_byte_s(dp);
        self.push_byte_s(b);
        self.push_byte_s(a);
        self.push_byte_s(cc);
        self.regs.cc.insert(ConditionCodes::ENTIRE);
    }

    fn pull_entire_state(&mut self) {
        self.regs.cc = ConditionCodes::from_bits_truncate(self.pull_byte_s());
        self.regs.a = self.pull_byte_s();
        self.regs.b = self.pull_byte_s();
        self.regs.dp = self.pull_byte_s();
        self.regs.x = self.pull_word_s();
        self.regs.y = self.pull_word_s();
        self.regs.u = self.pull_word_s();
        self.regs.pc = self.pull_word_s();
    }

    // ---- addressing modes ----------------------------------------------

    fn addr_direct(&mut self) -> u16 {
        let offset = self.fetch_byte();
        ((self.regs.dp as u16) << 8) | offset as u16
    }

    fn addr_extended(&mut self) -> u16 {
        self.fetch_word()
    }

    /// Returns the effective address plus the extra cycles this postbyte's
    /// variant costs on top of the base opcode timing (spec: 1-11 cycles,
    /// with indirection adding a further 3). An illegal postbyte (e.g. the
    /// indirect bit set on a single inc/dec mode) raises `Event::INVALID`
    /// and errors out with `PC` rewound to the postbyte, same policy as
    /// `exchange`/`transfer`.
    fn addr_indexed(&mut self) -> Result<(u16, u32), Mc6809Error> {
        let postbyte = self.fetch_byte();
        let mut regs = self.regs.clone();
        let bus = Arc::clone(&self.bus);
        let pc = std::cell::Cell::new(regs.pc);
        let decode = {
            let bus_ref = bus.lock().unwrap();
            let fetch_byte = || {
                let v = bus_ref.read_byte(pc.get());
                pc.set(pc.get().wrapping_add(1));
                v
            };
            let fetch_word = || {
                let hi = bus_ref.read_byte(pc.get());
                let lo = bus_ref.read_byte(pc.get().wrapping_add(1));
                pc.set(pc.get().wrapping_add(2));
                u16::from_be_bytes([hi, lo])
            };
            decode_indexed(postbyte, &mut regs, fetch_byte, fetch_word)
        };
        self.regs = regs;
        self.regs.pc = pc.get();
        match decode {
            Some(d) => {
                let address = if d.indirect { resolve_indirect(&self.bus.lock().unwrap(), d.address) } else { d.address };
                Ok((address, d.extra_cycles))
            }
            None => {
                self.events.set(Event::INVALID);
                Err(Mc6809Error::InvalidPostbyte { address: self.regs.pc.wrapping_sub(1), postbyte })
            }
        }
    }

    fn addr_relative8(&mut self) -> u16 {
        let offset = self.fetch_byte() as i8 as i16;
        self.regs.pc.wrapping_add(offset as u16)
    }

    fn addr_relative16(&mut self) -> u16 {
        let offset = self.fetch_word() as i16;
        self.regs.pc.wrapping_add(offset as u16)
    }

    // ---- register access by TFR/EXG code --------------------------------

    fn read_register(&self, code: RegisterCode) -> u16 {
        match code {
            RegisterCode::D => self.regs.d(),
            RegisterCode::X => self.regs.x,
            RegisterCode::Y => self.regs.y,
            RegisterCode::U => self.regs.u,
            RegisterCode::S => self.regs.s,
            RegisterCode::Pc => self.regs.pc,
            RegisterCode::A => 0xff00 | self.regs.a as u16,
            RegisterCode::B => 0xff00 | self.regs.b as u16,
            RegisterCode::Cc => 0xff00 | self.regs.cc.bits() as u16,
            RegisterCode::Dp => 0xff00 | self.regs.dp as u16,
        }
    }

    fn write_register(&mut self, code: RegisterCode, value: u16) {
        match code {
            RegisterCode::D => self.regs.set_d(value),
            RegisterCode::X => self.regs.x = value,
            RegisterCode::Y => self.regs.y = value,
            RegisterCode::U => self.regs.u = value,
            RegisterCode::S => self.regs.s = value,
            RegisterCode::Pc => self.regs.pc = value,
            RegisterCode::A => self.regs.a = value as u8,
            RegisterCode::B => self.regs.b = value as u8,
            RegisterCode::Cc => self.regs.cc = ConditionCodes::from_bits_truncate(value as u8),
            RegisterCode::Dp => self.regs.dp = value as u8,
        }
    }

    // ---- interrupts ------------------------------------------------------

    /// Services the highest-priority pending interrupt, if any and if
    /// unmasked. Returns the extra cycles consumed. Priority: NMI > FIRQ >
    /// IRQ, matching `check_interrupts` in the grounding source.
    pub fn check_interrupts(&mut self) -> u32 {
        if self.nmi_line {
            self.nmi_line = false;
            self.events.clear(Event::NMI);
            self.halted = false;
            self.waiting_sync = false;
            self.push_entire_state();
            self.regs.cc.insert(ConditionCodes::IRQ_MASK | ConditionCodes::FIRQ_MASK);
            self.regs.pc = self.read_word(VEC_NMI);
            return 19;
        }
        if self.firq_line && !self.regs.cc.contains(ConditionCodes::FIRQ_MASK) {
            self.firq_line = false;
            self.events.clear(Event::FIRQ);
            self.halted = false;
            self.waiting_sync = false;
            self.regs.cc.remove(ConditionCodes::ENTIRE);
            self.push_word_s(self.regs.pc);
            let cc = self.regs.cc.bits();
            self.push_byte_s(cc);
            self.regs.cc.insert(ConditionCodes::IRQ_MASK | ConditionCodes::FIRQ_MASK);
            self.regs.pc = self.read_word(VEC_FIRQ);
            return 10;
        }
        if self.irq_line && !self.regs.cc.contains(ConditionCodes::IRQ_MASK) {
            self.irq_line = false;
            self.events.clear(Event::IRQ);
            self.halted = false;
            self.waiting_sync = false;
            self.push_entire_state();
            self.regs.cc.insert(ConditionCodes::IRQ_MASK);
            self.regs.pc = self.read_word(VEC_IRQ);
            return 19;
        }
        0
    }

    /// Executes exactly one instruction (or services a CWAI/SYNC wait
    /// state) and returns the number of cycles it consumed.
    pub fn step(&mut self) -> Result<u32, Mc6809Error> {
        if self.halted {
            let serviced = self.check_interrupts();
            if serviced > 0 {
                return Ok(serviced);
            }
            return Ok(1);
        }
        if self.waiting_sync {
            if self.nmi_line || self.firq_line || self.irq_line {
                self.waiting_sync = false;
            } else {
                return Ok(1);
            }
        }
        let serviced = self.check_interrupts();
        if serviced > 0 {
            return Ok(serviced);
        }
        let start_pc = self.regs.pc;
        let opcode = self.fetch_byte();
        let cycles = self.execute(opcode, start_pc)?;
        self.cycles += cycles as u64;
        Ok(cycles)
    }

    fn execute(&mut self, opcode: u8, instr_pc: u16) -> Result<u32, Mc6809Error> {
        match opcode {
            0x10 => {
                let op2 = self.fetch_byte();
                self.execute_page2(op2, instr_pc)
            }
            0x11 => {
                let op2 = self.fetch_byte();
                self.execute_page3(op2, instr_pc)
            }
            _ => self.execute_page1(opcode, instr_pc),
        }
    }

    // ---- page 1 ------------------------------------------------------

    fn execute_page1(&mut self, opcode: u8, instr_pc: u16) -> Result<u32, Mc6809Error> {
        use ConditionCodes as CC;
        match opcode {
            0x00 => self.rmw_direct(opcode_alu_neg),
            0x03 => self.rmw_direct(opcode_alu_com),
            0x04 => self.rmw_direct(opcode_alu_lsr),
            0x06 => self.rmw_direct(opcode_alu_ror),
            0x07 => self.rmw_direct(opcode_alu_asr),
            0x08 => self.rmw_direct(opcode_alu_lsl),
            0x09 => self.rmw_direct(opcode_alu_rol),
            0x0a => self.rmw_direct(opcode_alu_dec),
            0x0c => self.rmw_direct(opcode_alu_inc),
            0x0d => self.rmw_direct(opcode_alu_tst),
            0x0e => {
                let addr = self.addr_direct();
                self.regs.pc = addr;
                Ok(3)
            }
            0x0f => self.rmw_direct(opcode_alu_clr),

            0x12 => Ok(2), // NOP
            0x13 => {
                // SYNC
                self.waiting_sync = true;
                Ok(2)
            }
            0x16 => {
                // LBRA
                let addr = self.addr_relative16();
                self.regs.pc = addr;
                Ok(5)
            }
            0x17 => {
                // LBSR
                let addr = self.addr_relative16();
                let ret = self.regs.pc;
                self.push_word_s(ret);
                self.regs.pc = addr;
                Ok(9)
            }
            0x19 => {
                // DAA
                let hc = self.regs.cc.contains(CC::HALF_CARRY);
                let c = self.regs.cc.contains(CC::CARRY);
                let r = alu::daa(self.regs.a, hc, c);
                self.regs.a = r.result;
                self.merge_flags(r.flags, CC::NEGATIVE | CC::ZERO | CC::CARRY);
                Ok(2)
            }
            0x1a => {
                // ORCC
                let mask = self.fetch_byte();
                self.regs.cc = ConditionCodes::from_bits_truncate(self.regs.cc.bits() | mask);
                Ok(3)
            }
            0x1c => {
                // ANDCC
                let mask = self.fetch_byte();
                self.regs.cc = ConditionCodes::from_bits_truncate(self.regs.cc.bits() & mask);
                Ok(3)
            }
            0x1d => {
                // SEX
                let (d, n, z) = alu::sex(self.regs.b);
                self.regs.set_d(d);
                self.regs.cc.set_flag(CC::NEGATIVE, n);
                self.regs.cc.set_flag(CC::ZERO, z);
                Ok(2)
            }
            0x1e => {
                // EXG
                let postbyte = self.fetch_byte();
                self.exchange(postbyte)?;
                Ok(8)
            }
            0x1f => {
                // TFR
                let postbyte = self.fetch_byte();
                self.transfer(postbyte)?;
                Ok(6)
            }

            0x20..=0x2f => {
                let taken = self.branch_condition(opcode & 0x0f);
                let addr = self.addr_relative8();
                if taken {
                    self.regs.pc = addr;
                }
                Ok(3)
            }

            0x30 => {
                let (addr, extra) = self.addr_indexed()?;
                self.regs.x = addr;
                self.regs.cc.set_flag(CC::ZERO, addr == 0);
                Ok(4 + extra)
            }
            0x31 => {
                let (addr, extra) = self.addr_indexed()?;
                self.regs.y = addr;
                self.regs.cc.set_flag(CC::ZERO, addr == 0);
                Ok(4 + extra)
            }
            0x32 => {
                let (addr, extra) = self.addr_indexed()?;
                self.regs.s = addr;
                Ok(4 + extra)
            }
            0x33 => {
                let (addr, extra) = self.addr_indexed()?;
                self.regs.u = addr;
                Ok(4 + extra)
            }
            0x34 => {
                // PSHS
                let mask = self.fetch_byte();
                self.push_registers_s(mask);
                Ok(5 + Self::psh_pul_cycles(mask))
            }
            0x35 => {
                // PULS
                let mask = self.fetch_byte();
                self.pull_registers_s(mask);
                Ok(5 + Self::psh_pul_cycles(mask))
            }
            0x36 => {
                // PSHU
                let mask = self.fetch_byte();
                self.push_registers_u(mask);
                Ok(5 + Self::psh_pul_cycles(mask))
            }
            0x37 => {
                // PULU
                let mask = self.fetch_byte();
                self.pull_registers_u(mask);
                Ok(5 + Self::psh_pul_cycles(mask))
            }
            0x39 => {
                // RTS
                self.regs.pc = self.pull_word_s();
                Ok(5)
            }
            0x3a => {
                // ABX
                self.regs.x = self.regs.x.wrapping_add(self.regs.b as u16);
                Ok(3)
            }
            0x3b => {
                // RTI
                self.regs.cc = ConditionCodes::from_bits_truncate(self.pull_byte_s());
                if self.regs.cc.contains(CC::ENTIRE) {
                    self.regs.a = self.pull_byte_s();
                    self.regs.b = self.pull_byte_s();
                    self.regs.dp = self.pull_byte_s();
                    self.regs.x = self.pull_word_s();
                    self.regs.y = self.pull_word_s();
                    self.regs.u = self.pull_word_s();
                    self.regs.pc = self.pull_word_s();
                    Ok(15)
                } else {
                    self.regs.pc = self.pull_word_s();
                    Ok(6)
                }
            }
            0x3c => {
                // CWAI
                let mask = self.fetch_byte();
                self.regs.cc = ConditionCodes::from_bits_truncate(self.regs.cc.bits() & mask);
                self.push_entire_state();
                self.halted = true;
                Ok(21)
            }
            0x3d => {
                // MUL
                let (d, z, c) = alu::mul(self.regs.a, self.regs.b);
                self.regs.set_d(d);
                self.regs.cc.set_flag(CC::ZERO, z);
                self.regs.cc.set_flag(CC::CARRY, c);
                Ok(11)
            }
            0x3f => {
                // SWI
                self.push_entire_state();
                self.regs.cc.insert(CC::IRQ_MASK | CC::FIRQ_MASK);
                self.regs.pc = self.read_word(VEC_SWI);
                Ok(19)
            }

            0x40 => self.inherent_a(opcode_alu_neg),
            0x43 => self.inherent_a(opcode_alu_com),
            0x44 => self.inherent_a(opcode_alu_lsr),
            0x46 => self.inherent_a(opcode_alu_ror),
            0x47 => self.inherent_a(opcode_alu_asr),
            0x48 => self.inherent_a(opcode_alu_lsl),
            0x49 => self.inherent_a(opcode_alu_rol),
            0x4a => self.inherent_a(opcode_alu_dec),
            0x4c => self.inherent_a(opcode_alu_inc),
            0x4d => self.inherent_a(opcode_alu_tst),
            0x4f => self.inherent_a(opcode_alu_clr),

            0x50 => self.inherent_b(opcode_alu_neg),
            0x53 => self.inherent_b(opcode_alu_com),
            0x54 => self.inherent_b(opcode_alu_lsr),
            0x56 => self.inherent_b(opcode_alu_ror),
            0x57 => self.inherent_b(opcode_alu_asr),
            0x58 => self.inherent_b(opcode_alu_lsl),
            0x59 => self.inherent_b(opcode_alu_rol),
            0x5a => self.inherent_b(opcode_alu_dec),
            0x5c => self.inherent_b(opcode_alu_inc),
            0x5d => self.inherent_b(opcode_alu_tst),
            0x5f => self.inherent_b(opcode_alu_clr),

            0x60 => self.rmw_indexed(opcode_alu_neg),
            0x63 => self.rmw_indexed(opcode_alu_com),
            0x64 => self.rmw_indexed(opcode_alu_lsr),
            0x66 => self.rmw_indexed(opcode_alu_ror),
            0x67 => self.rmw_indexed(opcode_alu_asr),
            0x68 => self.rmw_indexed(opcode_alu_lsl),
            0x69 => self.rmw_indexed(opcode_alu_rol),
            0x6a => self.rmw_indexed(opcode_alu_dec),
            0x6c => self.rmw_indexed(opcode_alu_inc),
            0x6d => self.rmw_indexed(opcode_alu_tst),
            0x6e => {
                let (addr, extra) = self.addr_indexed()?;
                self.regs.pc = addr;
                Ok(3 + extra)
            }
            0x6f => self.rmw_indexed(opcode_alu_clr),

            0x70 => self.rmw_extended(opcode_alu_neg),
            0x73 => self.rmw_extended(opcode_alu_com),
            0x74 => self.rmw_extended(opcode_alu_lsr),
            0x76 => self.rmw_extended(opcode_alu_ror),
            0x77 => self.rmw_extended(opcode_alu_asr),
            0x78 => self.rmw_extended(opcode_alu_lsl),
            0x79 => self.rmw_extended(opcode_alu_rol),
            0x7a => self.rmw_extended(opcode_alu_dec),
            0x7c => self.rmw_extended(opcode_alu_inc),
            0x7d => self.rmw_extended(opcode_alu_tst),
            0x7e => {
                let addr = self.addr_extended();
                self.regs.pc = addr;
                Ok(3)
            }
            0x7f => self.rmw_extended(opcode_alu_clr),

            0x80 => self.alu8_immediate(RegSelect::A, alu_op_sub),
            0x81 => self.alu8_immediate(RegSelect::A, alu_op_cmp),
            0x82 => self.alu8_immediate(RegSelect::A, alu_op_sbc),
            0x83 => self.alu16_immediate_d_or_index(Index16::D, alu_op16_sub),
            0x84 => self.alu8_immediate(RegSelect::A, alu_op_and),
            0x85 => self.alu8_immediate(RegSelect::A, alu_op_bit),
            0x86 => self.alu8_immediate(RegSelect::A, alu_op_ld),
            0x88 => self.alu8_immediate(RegSelect::A, alu_op_eor),
            0x89 => self.alu8_immediate(RegSelect::A, alu_op_adc),
            0x8a => self.alu8_immediate(RegSelect::A, alu_op_or),
            0x8b => self.alu8_immediate(RegSelect::A, alu_op_add),
            0x8c => self.alu16_immediate_d_or_index(Index16::X, alu_op16_cmp),
            0x8d => {
                // BSR
                let addr = self.addr_relative8();
                let ret = self.regs.pc;
                self.push_word_s(ret);
                self.regs.pc = addr;
                Ok(7)
            }
            0x8e => self.alu16_immediate_d_or_index(Index16::X, alu_op16_ld),
            0x8f => {
                // STX imm is illegal; treated as illegal
                self.illegal(opcode, instr_pc)
            }

            0x90 => self.alu8_direct(RegSelect::A, alu_op_sub),
            0x91 => self.alu8_direct(RegSelect::A, alu_op_cmp),
            0x92 => self.alu8_direct(RegSelect::A, alu_op_sbc),
            0x93 => self.alu16_direct(Index16::D, alu_op16_sub),
            0x94 => self.alu8_direct(RegSelect::A, alu_op_and),
            0x95 => self.alu8_direct(RegSelect::A, alu_op_bit),
            0x96 => self.alu8_direct(RegSelect::A, alu_op_ld),
            0x97 => self.store8_direct(RegSelect::A),
            0x98 => self.alu8_direct(RegSelect::A, alu_op_eor),
            0x99 => self.alu8_direct(RegSelect::A, alu_op_adc),
            0x9a => self.alu8_direct(RegSelect::A, alu_op_or),
            0x9b => self.alu8_direct(RegSelect::A, alu_op_add),
            0x9c => self.alu16_direct(Index16::X, alu_op16_cmp),
            0x9d => {
                let addr = self.addr_direct();
                let ret = self.regs.pc;
                self.push_word_s(ret);
                self.regs.pc = addr;
                Ok(7)
            }
            0x9e => self.alu16_direct(Index16::X, alu_op16_ld),
            0x9f => self.store16_direct(Index16::X),

            0xa0 => self.alu8_indexed(RegSelect::A, alu_op_sub),
            0xa1 => self.alu8_indexed(RegSelect::A, alu_op_cmp),
            0xa2 => self.alu8_indexed(RegSelect::A, alu_op_sbc),
            0xa3 => self.alu16_indexed(Index16::D, alu_op16_sub),
            0xa4 => self.alu8_indexed(RegSelect::A, alu_op_and),
            0xa5 => self.alu8_indexed(RegSelect::A, alu_op_bit),
            0xa6 => self.alu8_indexed(RegSelect::A, alu_op_ld),
            0xa7 => self.store8_indexed(RegSelect::A),
            0xa8 => self.alu8_indexed(RegSelect::A, alu_op_eor),
            0xa9 => self.alu8_indexed(RegSelect::A, alu_op_adc),
            0xaa => self.alu8_indexed(RegSelect::A, alu_op_or),
            0xab => self.alu8_indexed(RegSelect::A, alu_op_add),
            0xac => self.alu16_indexed(Index16::X, alu_op16_cmp),
            0xad => {
                let (addr, extra) = self.addr_indexed()?;
                let ret = self.regs.pc;
                self.push_word_s(ret);
                self.regs.pc = addr;
                Ok(7 + extra)
            }
            0xae => self.alu16_indexed(Index16::X, alu_op16_ld),
            0xaf => self.store16_indexed(Index16::X),

            0xb0 => self.alu8_extended(RegSelect::A, alu_op_sub),
            0xb1 => self.alu8_extended(RegSelect::A, alu_op_cmp),
            0xb2 => self.alu8_extended(RegSelect::A, alu_op_sbc),
            0xb3 => self.alu16_extended(Index16::D, alu_op16_sub),
            0xb4 => self.alu8_extended(RegSelect::A, alu_op_and),
            0xb5 => self.alu8_extended(RegSelect::A, alu_op_bit),
            0xb6 => self.alu8_extended(RegSelect::A, alu_op_ld),
            0xb7 => self.store8_extended(RegSelect::A),
            0xb8 => self.alu8_extended(RegSelect::A, alu_op_eor),
            0xb9 => self.alu8_extended(RegSelect::A, alu_op_adc),
            0xba => self.alu8_extended(RegSelect::A, alu_op_or),
            0xbb => self.alu8_extended(RegSelect::A, alu_op_add),
            0xbc => self.alu16_extended(Index16::X, alu_op16_cmp),
            0xbd => {
                let addr = self.addr_extended();
                let ret = self.regs.pc;
                self.push_word_s(ret);
                self.regs.pc = addr;
                Ok(8)
            }
            0xbe => self.alu16_extended(Index16::X, alu_op16_ld),
            0xbf => self.store16_extended(Index16::X),

            0xc0 => self.alu8_immediate(RegSelect::B, alu_op_sub),
            0xc1 => self.alu8_immediate(RegSelect::B, alu_op_cmp),
            0xc2 => self.alu8_immediate(RegSelect::B, alu_op_sbc),
            0xc3 => self.alu16_immediate_d_or_index(Index16::D, alu_op16_add),
            0xc4 => self.alu8_immediate(RegSelect::B, alu_op_and),
            0xc5 => self.alu8_immediate(RegSelect::B, alu_op_bit),
            0xc6 => self.alu8_immediate(RegSelect::B, alu_op_ld),
            0xc8 => self.alu8_immediate(RegSelect::B, alu_op_eor),
            0xc9 => self.alu8_immediate(RegSelect::B, alu_op_adc),
            0xca => self.alu8_immediate(RegSelect::B, alu_op_or),
            0xcb => self.alu8_immediate(RegSelect::B, alu_op_add),
            0xcc => self.alu16_immediate_d_or_index(Index16::D, alu_op16_ld),
            0xce => self.alu16_immediate_d_or_index(Index16::U, alu_op16_ld),

            0xd0 => self.alu8_direct(RegSelect::B, alu_op_sub),
            0xd1 => self.alu8_direct(RegSelect::B, alu_op_cmp),
            0xd2 => self.alu8_direct(RegSelect::B, alu_op_sbc),
            0xd3 => self.alu16_direct(Index16::D, alu_op16_add),
            0xd4 => self.alu8_direct(RegSelect::B, alu_op_and),
            0xd5 => self.alu8_direct(RegSelect::B, alu_op_bit),
            0xd6 => self.alu8_direct(RegSelect::B, alu_op_ld),
            0xd7 => self.store8_direct(RegSelect::B),
            0xd8 => self.alu8_direct(RegSelect::B, alu_op_eor),
            0xd9 => self.alu8_direct(RegSelect::B, alu_op_adc),
            0xda => self.alu8_direct(RegSelect::B, alu_op_or),
            0xdb => self.alu8_direct(RegSelect::B, alu_op_add),
            0xdc => self.alu16_direct(Index16::D, alu_op16_ld),
            0xdd => self.store16_direct(Index16::D),
            0xde => self.alu16_direct(Index16::U, alu_op16_ld),
            0xdf => self.store16_direct(Index16::U),

            0xe0 => self.alu8_indexed(RegSelect::B, alu_op_sub),
            0xe1 => self.alu8_indexed(RegSelect::B, alu_op_cmp),
            0xe2 => self.alu8_indexed(RegSelect::B, alu_op_sbc),
            0xe3 => self.alu16_indexed(Index16::D, alu_op16_add),
            0xe4 => self.alu8_indexed(RegSelect::B, alu_op_and),
            0xe5 => self.alu8_indexed(RegSelect::B, alu_op_bit),
            0xe6 => self.alu8_indexed(RegSelect::B, alu_op_ld),
            0xe7 => self.store8_indexed(RegSelect::B),
            0xe8 => self.alu8_indexed(RegSelect::B, alu_op_eor),
            0xe9 => self.alu8_indexed(RegSelect::B, alu_op_adc),
            0xea => self.alu8_indexed(RegSelect::B, alu_op_or),
            0xeb => self.alu8_indexed(RegSelect::B, alu_op_add),
            0xec => self.alu16_indexed(Index16::D, alu_op16_ld),
            0xed => self.store16_indexed(Index16::D),
            0xee => self.alu16_indexed(Index16::U, alu_op16_ld),
            0xef => self.store16_indexed(Index16::U),

            0xf0 => self.alu8_extended(RegSelect::B, alu_op_sub),
            0xf1 => self.alu8_extended(RegSelect::B, alu_op_cmp),
            0xf2 => self.alu8_extended(RegSelect::B, alu_op_sbc),
            0xf3 => self.alu16_extended(Index16::D, alu_op16_add),
            0xf4 => self.alu8_extended(RegSelect::B, alu_op_and),
            0xf5 => self.alu8_extended(RegSelect::B, alu_op_bit),
            0xf6 => self.alu8_extended(RegSelect::B, alu_op_ld),
            0xf7 => self.store8_extended(RegSelect::B),
            0xf8 => self.alu8_extended(RegSelect::B, alu_op_eor),
            0xf9 => self.alu8_extended(RegSelect::B, alu_op_adc),
            0xfa => self.alu8_extended(RegSelect::B, alu_op_or),
            0xfb => self.alu8_extended(RegSelect::B, alu_op_add),
            0xfc => self.alu16_extended(Index16::D, alu_op16_ld),
            0xfd => self.store16_extended(Index16::D),
            0xfe => self.alu16_extended(Index16::U, alu_op16_ld),
            0xff => self.store16_extended(Index16::U),

            _ => self.illegal(opcode, instr_pc),
        }
    }

    fn illegal(&mut self, opcode: u8, instr_pc: u16) -> Result<u32, Mc6809Error> {
        self.events.set(Event::INVALID);
        Err(Mc6809Error::InvalidInstruction { address: instr_pc, opcode })
    }

    // ---- page 2 (0x10 prefix): long branches, CMP{D,Y,S}, SWI2 --------

    fn execute_page2(&mut self, opcode: u8, instr_pc: u16) -> Result<u32, Mc6809Error> {
        match opcode {
            0x21..=0x2f => {
                let taken = self.branch_condition(opcode & 0x0f);
                let addr = self.addr_relative16();
                if taken {
                    self.regs.pc = addr;
                    Ok(6)
                } else {
                    Ok(5)
                }
            }
            0x83 => self.alu16_immediate_d_or_index(Index16::D, alu_op16_cmp),
            0x8c => self.alu16_immediate_d_or_index(Index16::Y, alu_op16_cmp),
            0x8e => self.alu16_immediate_d_or_index(Index16::Y, alu_op16_ld),
            0x93 => self.alu16_direct(Index16::D, alu_op16_cmp),
            0x9c => self.alu16_direct(Index16::Y, alu_op16_cmp),
            0x9e => self.alu16_direct(Index16::Y, alu_op16_ld),
            0x9f => self.store16_direct(Index16::Y),
            0xa3 => self.alu16_indexed(Index16::D, alu_op16_cmp),
            0xac => self.alu16_indexed(Index16::Y, alu_op16_cmp),
            0xae => self.alu16_indexed(Index16::Y, alu_op16_ld),
            0xaf => self.store16_indexed(Index16::Y),
            0xb3 => self.alu16_extended(Index16::D, alu_op16_cmp),
            0xbc => self.alu16_extended(Index16::Y, alu_op16_cmp),
            0xbe => self.alu16_extended(Index16::Y, alu_op16_ld),
            0xbf => self.store16_extended(Index16::Y),
            0xce => self.alu16_immediate_d_or_index(Index16::S, alu_op16_ld),
            0xde => self.alu16_direct(Index16::S, alu_op16_ld),
            0xdf => self.store16_direct(Index16::S),
            0xee => self.alu16_indexed(Index16::S, alu_op16_ld),
            0xef => self.store16_indexed(Index16::S),
            0xfe => self.alu16_extended(Index16::S, alu_op16_ld),
            0xff => self.store16_extended(Index16::S),
            0x3f => {
                // SWI2
                self.push_entire_state();
                self.regs.pc = self.read_word(VEC_SWI2);
                Ok(20)
            }
            _ => self.illegal(opcode, instr_pc),
        }
    }

    // ---- page 3 (0x11 prefix): CMP{U,S}, SWI3 --------------------------

    fn execute_page3(&mut self, opcode: u8, instr_pc: u16) -> Result<u32, Mc6809Error> {
        match opcode {
            0x83 => self.alu16_immediate_d_or_index(Index16::U, alu_op16_cmp),
            0x8c => self.alu16_immediate_d_or_index(Index16::S, alu_op16_cmp),
            0x93 => self.alu16_direct(Index16::U, alu_op16_cmp),
            0x9c => self.alu16_direct(Index16::S, alu_op16_cmp),
            0xa3 => self.alu16_indexed(Index16::U, alu_op16_cmp),
            0xac => self.alu16_indexed(Index16::S, alu_op16_cmp),
            0xb3 => self.alu16_extended(Index16::U, alu_op16_cmp),
            0xbc => self.alu16_extended(Index16::S, alu_op16_cmp),
            0x3f => {
                // SWI3
                self.push_entire_state();
                self.regs.pc = self.read_word(VEC_SWI3);
                Ok(20)
            }
            _ => self.illegal(opcode, instr_pc),
        }
    }

    // ---- branch condition table ----------------------------------------

    fn branch_condition(&self, condition: u8) -> bool {
        use ConditionCodes as CC;
        let cc = &self.regs.cc;
        let n = cc.contains(CC::NEGATIVE);
        let z = cc.contains(CC::ZERO);
        let v = cc.contains(CC::OVERFLOW);
        let c = cc.contains(CC::CARRY);
        match condition {
            0x0 => true,            // BRA
            0x1 => false,           // BRN
            0x2 => !c && !z,        // BHI
            0x3 => c || z,          // BLS
            0x4 => !c,              // BCC/BHS
            0x5 => c,               // BCS/BLO
            0x6 => !z,              // BNE
            0x7 => z,               // BEQ
            0x8 => !v,              // BVC
            0x9 => v,               // BVS
            0xa => !n,              // BPL
            0xb => n,               // BMI
            0xc => n == v,          // BGE
            0xd => n != v,          // BLT
            0xe => !z && (n == v),  // BGT
            0xf => z || (n != v),   // BLE
            _ => false,
        }
    }

    fn merge_flags(&mut self, new_flags: ConditionCodes, mask: ConditionCodes) {
        let kept = self.regs.cc.bits() & !mask.bits();
        let incoming = new_flags.bits() & mask.bits();
        self.regs.cc = ConditionCodes::from_bits_truncate(kept | incoming);
    }

    fn exchange(&mut self, postbyte: u8) -> Result<(), Mc6809Error> {
        let hi = RegisterCode::from_nibble(postbyte >> 4);
        let lo = RegisterCode::from_nibble(postbyte & 0x0f);
        match (hi, lo) {
            (Some(a), Some(b)) => {
                // Width mismatches are legal on real silicon: read_register
                // already zero-extends an 8-bit source with 0xFF in the high
                // byte, and write_register truncates a 16-bit value into an
                // 8-bit destination.
                let va = self.read_register(a);
                let vb = self.read_register(b);
                self.write_register(a, vb);
                self.write_register(b, va);
                Ok(())
            }
            _ => {
                self.events.set(Event::INVALID);
                Err(Mc6809Error::InvalidExchangeTransferRegister { address: self.regs.pc.wrapping_sub(1), register: postbyte })
            }
        }
    }

    fn transfer(&mut self, postbyte: u8) -> Result<(), Mc6809Error> {
        let src = RegisterCode::from_nibble(postbyte >> 4);
        let dst = RegisterCode::from_nibble(postbyte & 0x0f);
        match (src, dst) {
            (Some(s), Some(d)) => {
                let value = self.read_register(s);
                self.write_register(d, value);
                Ok(())
            }
            _ => {
                self.events.set(Event::INVALID);
                Err(Mc6809Error::InvalidExchangeTransferRegister { address: self.regs.pc.wrapping_sub(1), register: postbyte })
            }
        }
    }

    /// Extra cycles a PSHS/PULS/PSHU/PULU mask costs on top of the base 5:
    /// 1 cycle per 8-bit register, 2 per 16-bit register pushed or pulled.
    fn psh_pul_cycles(mask: u8) -> u32 {
        const WORD_BITS: u8 = 0x80 | 0x40 | 0x20 | 0x10;
        const BYTE_BITS: u8 = 0x08 | 0x04 | 0x02 | 0x01;
        2 * (mask & WORD_BITS).count_ones() + (mask & BYTE_BITS).count_ones()
    }

    fn push_registers_s(&mut self, mask: u8) {
        if mask & 0x80 != 0 {
            let pc = self.regs.pc;
            self.push_word_s(pc);
        }
        if mask & 0x40 != 0 {
            let u = self.regs.u;
            self.push_word_s(u);
        }
        if mask & 0x20 != 0 {
            let y = self.regs.y;
            self.push_word_s(y);
        }
        if mask & 0x10 != 0 {
            let x = self.regs.x;
            self.push_word_s(x);
        }
        if mask & 0x08 != 0 {
            let dp = self.regs.dp;
            self.push_byte_s(dp);
        }
        if mask & 0x04 != 0 {
            let b = self.regs.b;
            self.push_byte_s(b);
        }
        if mask & 0x02 != 0 {
            let a = self.regs.a;
            self.push_byte_s(a);
        }
        if mask & 0x01 != 0 {
            let cc = self.regs.cc.bits();
            self.push_byte_s(cc);
        }
    }

    fn pull_registers_s(&mut self, mask: u8) {
        if mask & 0x01 != 0 {
            self.regs.cc = ConditionCodes::from_bits_truncate(self.pull_byte_s());
        }
        if mask & 0x02 != 0 {
            self.regs.a = self.pull_byte_s();
        }
        if mask & 0x04 != 0 {
            self.regs.b = self.pull_byte_s();
        }
        if mask & 0x08 != 0 {
            self.regs.dp = self.pull_byte_s();
        }
        if mask & 0x10 != 0 {
            self.regs.x = self.pull_word_s();
        }
        if mask & 0x20 != 0 {
            self.regs.y = self.pull_word_s();
        }
        if mask & 0x40 != 0 {
            self.regs.u = self.pull_word_s();
        }
        if mask & 0x80 != 0 {
            self.regs.pc = self.pull_word_s();
        }
    }

    fn push_registers_u(&mut self, mask: u8) {
        if mask & 0x80 != 0 {
            let pc = self.regs.pc;
            self.push_word_u(pc);
        }
        if mask & 0x40 != 0 {
            let s = self.regs.s;
            self.push_word_u(s);
        }
        if mask & 0x20 != 0 {
            let y = self.regs.y;
            self.push_word_u(y);
        }
        if mask & 0x10 != 0 {
            let x = self.regs.x;
            self.push_word_u(x);
        }
        if mask & 0x08 != 0 {
            let dp = self.regs.dp;
            self.push_byte_u(dp);
        }
        if mask & 0x04 != 0 {
            let b = self.regs.b;
            self.push_byte_u(b);
        }
        if mask & 0x02 != 0 {
            let a = self.regs.a;
            self.push_byte_u(a);
        }
        if mask & 0x01 != 0 {
            let cc = self.regs.cc.bits();
            self.push_byte_u(cc);
        }
    }

    fn pull_registers_u(&mut self, mask: u8) {
        if mask & 0x01 != 0 {
            self.regs.cc = ConditionCodes::from_bits_truncate(self.pull_byte_u());
        }
        if mask & 0x02 != 0 {
            self.regs.a = self.pull_byte_u();
        }
        if mask & 0x04 != 0 {
            self.regs.b = self.pull_byte_u();
        }
        if mask & 0x08 != 0 {
            self.regs.dp = self.pull_byte_u();
        }
        if mask & 0x10 != 0 {
            self.regs.x = self.pull_word_u();
        }
        if mask & 0x20 != 0 {
            self.regs.y = self.pull_word_u();
        }
        if mask & 0x40 != 0 {
            self.regs.u = self.pull_word_u();
        }
        if mask & 0x80 != 0 {
            self.regs.pc = self.pull_word_u();
        }
    }

    // ---- ALU dispatch helpers -------------------------------------------

    fn alu8_immediate(&mut self, reg: RegSelect, op: Alu8Op) -> Result<u32, Mc6809Error> {
        let operand = self.fetch_byte();
        self.apply_alu8(reg, operand, op);
        Ok(2)
    }
    fn alu8_direct(&mut self, reg: RegSelect, op: Alu8Op) -> Result<u32, Mc6809Error> {
        let addr = self.addr_direct();
        let operand = self.read_byte(addr);
        self.apply_alu8(reg, operand, op);
        Ok(4)
    }
    fn alu8_indexed(&mut self, reg: RegSelect, op: Alu8Op) -> Result<u32, Mc6809Error> {
        let (addr, extra) = self.addr_indexed()?;
        let operand = self.read_byte(addr);
        self.apply_alu8(reg, operand, op);
        Ok(4 + extra)
    }
    fn alu8_extended(&mut self, reg: RegSelect, op: Alu8Op) -> Result<u32, Mc6809Error> {
        let addr = self.addr_extended();
        let operand = self.read_byte(addr);
        self.apply_alu8(reg, operand, op);
        Ok(5)
    }

    fn apply_alu8(&mut self, reg: RegSelect, operand: u8, op: Alu8Op) {
        let current = match reg {
            RegSelect::A => self.regs.a,
            RegSelect::B => self.regs.b,
        };
        let carry = self.regs.cc.contains(ConditionCodes::CARRY);
        let (result, flags, mask, store) = op(current, operand, carry);
        if store {
            match reg {
                RegSelect::A => self.regs.a = result,
                RegSelect::B => self.regs.b = result,
            }
        }
        self.merge_flags(flags, mask);
    }

    fn store8_direct(&mut self, reg: RegSelect) -> Result<u32, Mc6809Error> {
        let addr = self.addr_direct();
        self.store8(reg, addr);
        Ok(4)
    }
    fn store8_indexed(&mut self, reg: RegSelect) -> Result<u32, Mc6809Error> {
        let (addr, extra) = self.addr_indexed()?;
        self.store8(reg, addr);
        Ok(4 + extra)
    }
    fn store8_extended(&mut self, reg: RegSelect) -> Result<u32, Mc6809Error> {
        let addr = self.addr_extended();
        self.store8(reg, addr);
        Ok(5)
    }
    fn store8(&mut self, reg: RegSelect, addr: u16) {
        let value = match reg {
            RegSelect::A => self.regs.a,
            RegSelect::B => self.regs.b,
        };
        self.write_byte(addr, value);
        self.regs.cc.set_nz8(value);
        self.regs.cc.remove(ConditionCodes::OVERFLOW);
    }

    fn alu16_immediate_d_or_index(&mut self, which: Index16, op: Alu16Op) -> Result<u32, Mc6809Error> {
        let operand = self.fetch_word();
        self.apply_alu16(which, operand, op);
        Ok(4)
    }
    fn alu16_direct(&mut self, which: Index16, op: Alu16Op) -> Result<u32, Mc6809Error> {
        let addr = self.addr_direct();
        let operand = self.read_word(addr);
        self.apply_alu16(which, operand, op);
        Ok(6)
    }
    fn alu16_indexed(&mut self, which: Index16, op: Alu16Op) -> Result<u32, Mc6809Error> {
        let (addr, extra) = self.addr_indexed()?;
        let operand = self.read_word(addr);
        self.apply_alu16(which, operand, op);
        Ok(6 + extra)
    }
    fn alu16_extended(&mut self, which: Index16, op: Alu16Op) -> Result<u32, Mc6809Error> {
        let addr = self.addr_extended();
        let operand = self.read_word(addr);
        self.apply_alu16(which, operand, op);
        Ok(7)
    }

    fn apply_alu16(&mut self, which: Index16, operand: u16, op: Alu16Op) {
        let current = self.read_index16(which);
        let (result, flags, mask, store) = op(current, operand);
        if store {
            self.write_index16(which, result);
        }
        self.merge_flags(flags, mask);
    }

    fn read_index16(&self, which: Index16) -> u16 {
        match which {
            Index16::D => self.regs.d(),
            Index16::X => self.regs.x,
            Index16::Y => self.regs.y,
            Index16::U => self.regs.u,
            Index16::S => self.regs.s,
        }
    }
    fn write_index16(&mut self, which: Index16, value: u16) {
        match which {
            Index16::D => self.regs.set_d(value),
            Index16::X => self.regs.x = value,
            Index16::Y => self.regs.y = value,
            Index16::U => self.regs.u = value,
            Index16::S => self.regs.s = value,
        }
    }

    fn store16_direct(&mut self, which: Index16) -> Result<u32, Mc6809Error> {
        let addr = self.addr_direct();
        self.store16(which, addr);
        Ok(6)
    }
    fn store16_indexed(&mut self, which: Index16) -> Result<u32, Mc6809Error> {
        let (addr, extra) = self.addr_indexed()?;
        self.store16(which, addr);
        Ok(6 + extra)
    }
    fn store16_extended(&mut self, which: Index16) -> Result<u32, Mc6809Error> {
        let addr = self.addr_extended();
        self.store16(which, addr);
        Ok(7)
    }
    fn store16(&mut self, which: Index16, addr: u16) {
        let value = self.read_index16(which);
        self.write_word(addr, value);
        self.regs.cc.set_nz16(value);
        self.regs.cc.remove(ConditionCodes::OVERFLOW);
    }

    // ---- read-modify-write group (NEG/COM/LSR/ROR/ASR/LSL/ROL/DEC/INC/TST/CLR) --

    fn rmw_direct(&mut self, op: RmwOp) -> Result<u32, Mc6809Error> {
        let addr = self.addr_direct();
        self.rmw(addr, op);
        Ok(6)
    }
    fn rmw_indexed(&mut self, op: RmwOp) -> Result<u32, Mc6809Error> {
        let (addr, extra) = self.addr_indexed()?;
        self.rmw(addr, op);
        Ok(6 + extra)
    }
    fn rmw_extended(&mut self, op: RmwOp) -> Result<u32, Mc6809Error> {
        let addr = self.addr_extended();
        self.rmw(addr, op);
        Ok(7)
    }
    fn rmw(&mut self, addr: u16, op: RmwOp) {
        let value = self.read_byte(addr);
        let carry = self.regs.cc.contains(ConditionCodes::CARRY);
        let (result, flags, mask, store) = op(value, carry);
        if store {
            self.write_byte(addr, result);
        }
        self.merge_flags(flags, mask);
    }

    fn inherent_a(&mut self, op: RmwOp) -> Result<u32, Mc6809Error> {
        let value = self.regs.a;
        let carry = self.regs.cc.contains(ConditionCodes::CARRY);
        let (result, flags, mask, store) = op(value, carry);
        if store {
            self.regs.a = result;
        }
        self.merge_flags(flags, mask);
        Ok(2)
    }
    fn inherent_b(&mut self, op: RmwOp) -> Result<u32, Mc6809Error> {
        let value = self.regs.b;
        let carry = self.regs.cc.contains(ConditionCodes::CARRY);
        let (result, flags, mask, store) = op(value, carry);
        if store {
            self.regs.b = result;
        }
        self.merge_flags(flags, mask);
        Ok(2)
    }
}

#[derive(Clone, Copy)]
enum RegSelect {
    A,
    B,
}

#[derive(Clone, Copy)]
enum Index16 {
    D,
    X,
    Y,
    U,
    S,
}

type Alu8Op = fn(u8, u8, bool) -> (u8, ConditionCodes, ConditionCodes, bool);
type Alu16Op = fn(u16, u16) -> (u16, ConditionCodes, ConditionCodes, bool);
type RmwOp = fn(u8, bool) -> (u8, ConditionCodes, ConditionCodes, bool);

const NZVC: ConditionCodes = ConditionCodes::from_bits_truncate(
    ConditionCodes::NEGATIVE.bits() | ConditionCodes::ZERO.bits() | ConditionCodes::OVERFLOW.bits() | ConditionCodes::CARRY.bits(),
);
const NZVCH: ConditionCodes = ConditionCodes::from_bits_truncate(NZVC.bits() | ConditionCodes::HALF_CARRY.bits());
const NZV: ConditionCodes = ConditionCodes::from_bits_truncate(
    ConditionCodes::NEGATIVE.bits() | ConditionCodes::ZERO.bits() | ConditionCodes::OVERFLOW.bits(),
);
const NZ: ConditionCodes = ConditionCodes::from_bits_truncate(ConditionCodes::NEGATIVE.bits() | ConditionCodes::ZERO.bits());

fn alu_op_add(a: u8, b: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::add8(a, b, false);
    (r.result, r.flags, NZVCH, true)
}
fn alu_op_adc(a: u8, b: u8, c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::add8(a, b, c);
    (r.result, r.flags, NZVCH, true)
}
fn alu_op_sub(a: u8, b: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::sub8(a, b, false);
    (r.result, r.flags, NZVC, true)
}
fn alu_op_sbc(a: u8, b: u8, c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::sub8(a, b, c);
    (r.result, r.flags, NZVC, true)
}
fn alu_op_cmp(a: u8, b: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::sub8(a, b, false);
    (r.result, r.flags, NZVC, false)
}
fn alu_op_and(a: u8, b: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::and8(a, b);
    (r.result, r.flags, NZV, true)
}
fn alu_op_or(a: u8, b: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::or8(a, b);
    (r.result, r.flags, NZV, true)
}
fn alu_op_eor(a: u8, b: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::eor8(a, b);
    (r.result, r.flags, NZV, true)
}
fn alu_op_bit(a: u8, b: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::and8(a, b);
    (r.result, r.flags, NZV, false)
}
fn alu_op_ld(_a: u8, b: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let mut flags = ConditionCodes::empty();
    flags.set_nz8(b);
    (b, flags, NZV, true)
}

fn alu_op16_add(a: u16, b: u16) -> (u16, ConditionCodes, ConditionCodes, bool) {
    let r = alu::add16(a, b);
    (r.result, r.flags, NZVC, true)
}
fn alu_op16_sub(a: u16, b: u16) -> (u16, ConditionCodes, ConditionCodes, bool) {
    let r = alu::sub16(a, b);
    (r.result, r.flags, NZVC, true)
}
fn alu_op16_cmp(a: u16, b: u16) -> (u16, ConditionCodes, ConditionCodes, bool) {
    let r = alu::sub16(a, b);
    (r.result, r.flags, NZVC, false)
}
fn alu_op16_ld(_a: u16, b: u16) -> (u16, ConditionCodes, ConditionCodes, bool) {
    let mut flags = ConditionCodes::empty();
    flags.set_nz16(b);
    (b, flags, NZV, true)
}

fn opcode_alu_neg(a: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::neg8(a);
    (r.result, r.flags, NZVC, true)
}
fn opcode_alu_com(a: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::com8(a);
    (r.result, r.flags, NZVC, true)
}
fn opcode_alu_lsr(a: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::lsr8(a);
    (r.result, r.flags, ConditionCodes::from_bits_truncate(NZ.bits() | ConditionCodes::CARRY.bits()), true)
}
fn opcode_alu_ror(a: u8, c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::ror8(a, c);
    (r.result, r.flags, ConditionCodes::from_bits_truncate(NZ.bits() | ConditionCodes::CARRY.bits()), true)
}
fn opcode_alu_asr(a: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::asr8(a);
    (r.result, r.flags, ConditionCodes::from_bits_truncate(NZ.bits() | ConditionCodes::CARRY.bits()), true)
}
fn opcode_alu_lsl(a: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::lsl8(a);
    (r.result, r.flags, NZVC, true)
}
fn opcode_alu_rol(a: u8, c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::rol8(a, c);
    (r.result, r.flags, NZVC, true)
}
fn opcode_alu_dec(a: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::dec8(a);
    (r.result, r.flags, NZV, true)
}
fn opcode_alu_inc(a: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::inc8(a);
    (r.result, r.flags, NZV, true)
}
fn opcode_alu_tst(a: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let mut flags = ConditionCodes::empty();
    flags.set_nz8(a);
    (a, flags, NZV, false)
}
fn opcode_alu_clr(_a: u8, _c: bool) -> (u8, ConditionCodes, ConditionCodes, bool) {
    let r = alu::clr8();
    (r.result, r.flags, NZVC, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Ram;

    fn new_cpu() -> Cpu {
        let mut bus = Bus::new();
        bus.attach(Ram::new(), 0x0000, 0xffff);
        let bus = Arc::new(Mutex::new(bus));
        let mut cpu = Cpu::new(bus);
        cpu.bus.lock().unwrap().write_word(VEC_RESET, 0x0200);
        cpu.reset();
        cpu
    }

    #[test]
    fn reset_loads_pc_from_vector_and_masks_interrupts() {
        let cpu = new_cpu();
        assert_eq!(cpu.regs.pc, 0x0200);
        assert!(cpu.regs.cc.contains(ConditionCodes::IRQ_MASK));
        assert!(cpu.regs.cc.contains(ConditionCodes::FIRQ_MASK));
    }

    #[test]
    fn lda_immediate_sets_negative_and_zero() {
        let mut cpu = new_cpu();
        cpu.bus.lock().unwrap().write_byte(0x0200, 0x86); // LDA #$80
        cpu.bus.lock().unwrap().write_byte(0x0201, 0x80);
        let cycles = cpu.step().unwrap();
        assert_eq!(cpu.regs.a, 0x80);
        assert!(cpu.regs.cc.contains(ConditionCodes::NEGATIVE));
        assert!(!cpu.regs.cc.contains(ConditionCodes::ZERO));
        assert_eq!(cycles, 2);
    }

    #[test]
    fn adda_immediate_sets_carry_and_half_carry() {
        let mut cpu = new_cpu();
        cpu.regs.a = 0xff;
        cpu.bus.lock().unwrap().write_byte(0x0200, 0x8b); // ADDA #$01
        cpu.bus.lock().unwrap().write_byte(0x0201, 0x01);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.a, 0x00);
        assert!(cpu.regs.cc.contains(ConditionCodes::CARRY));
        assert!(cpu.regs.cc.contains(ConditionCodes::HALF_CARRY));
        assert!(cpu.regs.cc.contains(ConditionCodes::ZERO));
    }

    #[test]
    fn bra_always_branches_via_relative8() {
        let mut cpu = new_cpu();
        cpu.bus.lock().unwrap().write_byte(0x0200, 0x20); // BRA +2
        cpu.bus.lock().unwrap().write_byte(0x0201, 0x02);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 0x0204);
    }

    #[test]
    fn jsr_extended_pushes_return_and_jumps() {
        let mut cpu = new_cpu();
        cpu.regs.s = 0x8000;
        cpu.bus.lock().unwrap().write_byte(0x0200, 0xbd); // JSR $3000
        cpu.bus.lock().unwrap().write_word(0x0201, 0x3000);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 0x3000);
        assert_eq!(cpu.regs.s, 0x7ffe);
        assert_eq!(cpu.bus.lock().unwrap().read_word(0x7ffe), 0x0203);
    }

    #[test]
    fn rts_pulls_return_address() {
        let mut cpu = new_cpu();
        cpu.regs.s = 0x7ffe;
        cpu.bus.lock().unwrap().write_word(0x7ffe, 0x0203);
        cpu.bus.lock().unwrap().write_byte(0x0200, 0x39); // RTS
        cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 0x0203);
        assert_eq!(cpu.regs.s, 0x8000);
    }

    #[test]
    fn swi_pushes_entire_state_and_sets_masks() {
        let mut cpu = new_cpu();
        cpu.regs.s = 0x8000;
        cpu.regs.a = 0x11;
        cpu.regs.b = 0x22;
        cpu.bus.lock().unwrap().write_word(VEC_SWI, 0x4000);
        cpu.bus.lock().unwrap().write_byte(0x0200, 0x3f); // SWI
        cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 0x4000);
        assert!(cpu.regs.cc.contains(ConditionCodes::IRQ_MASK));
        assert!(cpu.regs.cc.contains(ConditionCodes::FIRQ_MASK));
        assert_eq!(cpu.regs.s, 0x8000 - 12);
    }

    #[test]
    fn irq_is_masked_after_reset() {
        let mut cpu = new_cpu();
        cpu.regs.s = 0x8000;
        cpu.set_irq(true);
        cpu.bus.lock().unwrap().write_byte(0x0200, 0x12); // NOP
        let cycles = cpu.step().unwrap();
        // masked IRQ must not divert control flow
        assert_eq!(cpu.regs.pc, 0x0201);
        assert_eq!(cycles, 2);
    }

    #[test]
    fn irq_services_when_unmasked() {
        let mut cpu = new_cpu();
        cpu.regs.s = 0x8000;
        cpu.regs.cc.remove(ConditionCodes::IRQ_MASK);
        cpu.bus.lock().unwrap().write_word(VEC_IRQ, 0x5000);
        cpu.set_irq(true);
        let cycles = cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, 0x5000);
        assert_eq!(cycles, 19);
        assert!(cpu.regs.cc.contains(ConditionCodes::IRQ_MASK));
    }

    #[test]
    fn nmi_is_ignored_until_armed_by_first_stack_write() {
        let mut cpu = new_cpu();
        cpu.regs.s = 0x8000;
        cpu.trigger_nmi();
        assert!(!cpu.events.contains(Event::NMI));
        cpu.bus.lock().unwrap().write_byte(0x0200, 0x34); // PSHS
        cpu.bus.lock().unwrap().write_byte(0x0201, 0x01); // push CC, arms NMI
        cpu.step().unwrap();
        cpu.trigger_nmi();
        assert!(cpu.events.contains(Event::NMI));
    }

    #[test]
    fn rti_with_entire_flag_restores_full_state() {
        let mut cpu = new_cpu();
        cpu.regs.s = 0x8000;
        cpu.regs.a = 0x11;
        cpu.regs.b = 0x22;
        cpu.regs.x = 0x3344;
        cpu.bus.lock().unwrap().write_byte(0x0200, 0x3f); // SWI
        cpu.step().unwrap();
        cpu.regs.a = 0;
        cpu.regs.b = 0;
        cpu.regs.x = 0;
        cpu.bus.lock().unwrap().write_byte(cpu.regs.pc, 0x3b); // RTI
        cpu.step().unwrap();
        assert_eq!(cpu.regs.a, 0x11);
        assert_eq!(cpu.regs.b, 0x22);
        assert_eq!(cpu.regs.x, 0x3344);
    }

    #[test]
    fn exg_allows_mismatched_register_widths() {
        // X (word) <-> A (byte): legal on real silicon. A's old value
        // (zero-extended with 0xFF in the high byte) lands in X; X's low
        // byte lands in A.
        let mut cpu = new_cpu();
        cpu.regs.a = 0x42;
        cpu.regs.x = 0x1234;
        cpu.bus.lock().unwrap().write_byte(0x0200, 0x1e); // EXG
        cpu.bus.lock().unwrap().write_byte(0x0201, 0x81); // A <-> X
        cpu.step().unwrap();
        assert_eq!(cpu.regs.x, 0xff42);
        assert_eq!(cpu.regs.a, 0x34);
    }

    #[test]
    fn exg_rejects_unmapped_register_nibble() {
        let mut cpu = new_cpu();
        cpu.bus.lock().unwrap().write_byte(0x0200, 0x1e); // EXG
        cpu.bus.lock().unwrap().write_byte(0x0201, 0x6c); // nibble 0x6 is unmapped
        let result = cpu.step();
        assert!(result.is_err());
        assert!(cpu.events.contains(Event::INVALID));
    }

    #[test]
    fn indexed_post_increment_advances_x() {
        let mut cpu = new_cpu();
        cpu.regs.x = 0x3000;
        cpu.bus.lock().unwrap().write_byte(0x3000, 0x42);
        cpu.bus.lock().unwrap().write_byte(0x0200, 0xa6); // LDA ,X+
        cpu.bus.lock().unwrap().write_byte(0x0201, 0x80);
        cpu.step().unwrap();
        assert_eq!(cpu.regs.a, 0x42);
        assert_eq!(cpu.regs.x, 0x3001);
    }

    #[test]
    fn indexed_illegal_indirect_postbyte_errors_and_rewinds_pc() {
        let mut cpu = new_cpu();
        cpu.regs.x = 0x3000;
        cpu.bus.lock().unwrap().write_byte(0x0200, 0xa6); // LDA ,X+ (indexed)
        cpu.bus.lock().unwrap().write_byte(0x0201, 0x90); // [,X+]: indirect bit set on single inc, illegal
        let result = cpu.step();
        assert!(matches!(result, Err(Mc6809Error::InvalidPostbyte { address: 0x0201, postbyte: 0x90 })));
        assert!(cpu.events.contains(Event::INVALID));
        assert_eq!(cpu.regs.pc, 0x0201);
    }
}

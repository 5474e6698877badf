use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Condition-code register bits, MSB to LSB: E F H I N Z V C.
    pub struct ConditionCodes: u8 {
        const CARRY      = 0b0000_0001;
        const OVERFLOW   = 0b0000_0010;
        const ZERO       = 0b0000_0100;
        const NEGATIVE   = 0b0000_1000;
        const IRQ_MASK   = 0b0001_0000;
        const HALF_CARRY = 0b0010_0000;
        const FIRQ_MASK  = 0b0100_0000;
        const ENTIRE     = 0b1000_0000;
    }
}

impl ConditionCodes {
    pub fn set_flag(&mut self, flag: ConditionCodes, value: bool) {
        self.set(flag, value);
    }

    /// Derives N and Z for an 8-bit result, leaving other bits untouched.
    pub fn set_nz8(&mut self, value: u8) {
        self.set(ConditionCodes::NEGATIVE, value & 0x80 != 0);
        self.set(ConditionCodes::ZERO, value == 0);
    }

    /// Derives N and Z for a 16-bit result, leaving other bits untouched.
    pub fn set_nz16(&mut self, value: u16) {
        self.set(ConditionCodes::NEGATIVE, value & 0x8000 != 0);
        self.set(ConditionCodes::ZERO, value == 0);
    }

    /// Renders the register as an 8-character string, MSB to LSB, using the
    /// register's own letter where the bit is set and `-` where it is clear.
    pub fn as_display_string(&self) -> String {
        const LETTERS: [(ConditionCodes, char); 8] = [
            (ConditionCodes::ENTIRE, 'E'),
            (ConditionCodes::FIRQ_MASK, 'F'),
            (ConditionCodes::HALF_CARRY, 'H'),
            (ConditionCodes::IRQ_MASK, 'I'),
            (ConditionCodes::NEGATIVE, 'N'),
            (ConditionCodes::ZERO, 'Z'),
            (ConditionCodes::OVERFLOW, 'V'),
            (ConditionCodes::CARRY, 'C'),
        ];
        LETTERS
            .iter()
            .map(|(bit, letter)| if self.contains(*bit) { *letter } else { '-' })
            .collect()
    }
}

impl Default for ConditionCodes {
    fn default() -> Self {
        ConditionCodes::empty()
    }
}

/// The MC6809 programmer-visible register file.
///
/// `d()`/`set_d()` provide the 16-bit view over `a`/`b`; there is no
/// separate storage for `D`, so a write through either half is always
/// observable through the other view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub b: u8,
    pub x: u16,
    pub y: u16,
    pub u: u16,
    pub s: u16,
    pub pc: u16,
    pub dp: u8,
    pub cc: ConditionCodes,
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn d(&self) -> u16 {
        ((self.a as u16) << 8) | self.b as u16
    }

    pub fn set_d(&mut self, value: u16) {
        self.a = (value >> 8) as u8;
        self.b = (value & 0xff) as u8;
    }
}

impl fmt::Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PC={:04X} A={:02X} B={:02X} DP={:02X} X={:04X} Y={:04X} U={:04X} S={:04X} CC={}",
            self.pc,
            self.a,
            self.b,
            self.dp,
            self.x,
            self.y,
            self.u,
            self.s,
            self.cc.as_display_string()
        )
    }
}

/// The eight general-purpose registers addressable by `EXG`/`TFR`, in
/// postbyte nibble order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterCode {
    D,
    X,
    Y,
    U,
    S,
    Pc,
    A,
    B,
    Cc,
    Dp,
}

impl RegisterCode {
    /// Decodes a 4-bit EXG/TFR register nibble. Nibbles 8-9 select A/B etc,
    /// nibbles 0xA-0xF beyond CC/DP are undefined and rejected by the caller.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        Some(match nibble {
            0x0 => RegisterCode::D,
            0x1 => RegisterCode::X,
            0x2 => RegisterCode::Y,
            0x3 => RegisterCode::U,
            0x4 => RegisterCode::S,
            0x5 => RegisterCode::Pc,
            0x8 => RegisterCode::A,
            0x9 => RegisterCode::B,
            0xA => RegisterCode::Cc,
            0xB => RegisterCode::Dp,
            _ => return None,
        })
    }

    /// Whether this register is a 16-bit (true) or 8-bit (false) register.
    pub fn is_word(&self) -> bool {
        matches!(
            self,
            RegisterCode::D | RegisterCode::X | RegisterCode::Y | RegisterCode::U | RegisterCode::S | RegisterCode::Pc
        )
    }
}

//! Address breakpoints plus single-step/single-step-over bookkeeping.
//!
//! Grounded on the distilled spec's breakpoint engine description and the
//! teacher's small, fixed-capacity config-like structs (e.g. `devices.rs`'s
//! `ControlMode`): a breakpoint set is two user-visible slots plus one
//! internal slot the "step over" feature plants transparently.

pub const MAX_USER_BREAKPOINTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Address(u16),
}

/// Breakpoint table: up to [`MAX_USER_BREAKPOINTS`] user breakpoints plus a
/// single internal "next" breakpoint used to implement step-over.
pub struct Breakpoints {
    user: [Slot; MAX_USER_BREAKPOINTS],
    next: Slot,
    ignore_once: bool,
}

impl Breakpoints {
    pub fn new() -> Self {
        Breakpoints { user: [Slot::Empty; MAX_USER_BREAKPOINTS], next: Slot::Empty, ignore_once: false }
    }

    /// Sets user breakpoint `index`. Returns false if `index` is out of
    /// range.
    pub fn set(&mut self, index: usize, address: u16) -> bool {
        match self.user.get_mut(index) {
            Some(slot) => {
                *slot = Slot::Address(address);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self, index: usize) -> bool {
        match self.user.get_mut(index) {
            Some(slot) => {
                *slot = Slot::Empty;
                true
            }
            None => false,
        }
    }

    pub fn clear_all(&mut self) {
        for slot in self.user.iter_mut() {
            *slot = Slot::Empty;
        }
        self.next = Slot::Empty;
    }

    pub fn set_next(&mut self, address: u16) {
        self.next = Slot::Address(address);
    }

    pub fn clear_next(&mut self) {
        self.next = Slot::Empty;
    }

    /// Called once per instruction boundary with the about-to-execute PC.
    /// Returns true iff execution should stop here. The one-shot
    /// "ignore breakpoint" flag (set when stepping off a breakpoint the
    /// debugger already stopped on) suppresses exactly one hit.
    pub fn hits(&mut self, pc: u16) -> bool {
        if self.ignore_once {
            self.ignore_once = false;
            return false;
        }
        let user_hit = self.user.iter().any(|slot| *slot == Slot::Address(pc));
        let next_hit = self.next == Slot::Address(pc);
        if next_hit {
            self.next = Slot::Empty;
        }
        user_hit || next_hit
    }

    pub fn ignore_next_hit(&mut self) {
        self.ignore_once = true;
    }

    pub fn addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.user.iter().filter_map(|slot| match slot {
            Slot::Address(addr) => Some(*addr),
            Slot::Empty => None,
        })
    }
}

impl Default for Breakpoints {
    fn default() -> Self {
        Self::new()
    }
}

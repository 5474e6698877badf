//! Lock-free pending-event word shared between the CPU thread and whichever
//! thread (timer, UI) raises asynchronous requests.

use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, Ordering};

bitflags! {
    pub struct Event: u32 {
        const NMI                   = 1 << 0;
        const FIRQ                  = 1 << 1;
        const IRQ                   = 1 << 2;
        const INVALID                = 1 << 3;
        const BREAKPOINT             = 1 << 4;
        const SINGLE_STEP            = 1 << 5;
        const SINGLE_STEP_FINISHED   = 1 << 6;
        const SYNC_EXEC              = 1 << 7;
        const TIMER                  = 1 << 8;
        const SET_STATUS             = 1 << 9;
        const FREQUENCY_CONTROL      = 1 << 10;
        const DO_SCHEDULE            = 1 << 11;
        const CWAI                   = 1 << 12;
        const SYNC                   = 1 << 13;
        const IGNORE_BP              = 1 << 14;
    }
}

/// Atomic holder for [`Event`]. All mutation is read-modify-write under
/// `AcqRel` so any thread observes a consistent set of flags regardless of
/// which other thread last touched it.
pub struct PendingEvents {
    bits: AtomicU32,
}

impl PendingEvents {
    pub fn new() -> Self {
        Self { bits: AtomicU32::new(0) }
    }

    pub fn set(&self, event: Event) {
        self.bits.fetch_or(event.bits(), Ordering::AcqRel);
    }

    pub fn clear(&self, event: Event) {
        self.bits.fetch_and(!event.bits(), Ordering::AcqRel);
    }

    pub fn contains(&self, event: Event) -> bool {
        self.bits.load(Ordering::Acquire) & event.bits() != 0
    }

    pub fn snapshot(&self) -> Event {
        Event::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    /// Atomically takes the current set of flags and clears them.
    pub fn take(&self) -> Event {
        let bits = self.bits.swap(0, Ordering::AcqRel);
        Event::from_bits_truncate(bits)
    }
}

impl Default for PendingEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_are_independent_bits() {
        let events = PendingEvents::new();
        events.set(Event::NMI);
        events.set(Event::TIMER);
        assert!(events.contains(Event::NMI));
        assert!(events.contains(Event::TIMER));
        events.clear(Event::NMI);
        assert!(!events.contains(Event::NMI));
        assert!(events.contains(Event::TIMER));
    }

    #[test]
    fn take_drains_and_resets() {
        let events = PendingEvents::new();
        events.set(Event::IRQ | Event::BREAKPOINT);
        let taken = events.take();
        assert!(taken.contains(Event::IRQ));
        assert!(taken.contains(Event::BREAKPOINT));
        assert!(events.snapshot().is_empty());
    }
}

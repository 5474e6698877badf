//! Run-loop state machine: drives the CPU thread through cycle quanta,
//! throttles to a target frequency against the wall clock, and accepts
//! commands from a UI thread through a mutex-guarded queue.
//!
//! Grounded on `original_source/src/schedule.cpp`'s `Scheduler` class:
//! the `Run/Stop/Step/Next/Reset/ResetRun/Exit` state set, the
//! `process_events`/`idleloop` split, and the 1-second frequency-control
//! tick. The command-queue-of-trait-objects idiom and the CPU-thread /
//! timer-thread split follow this corpus's habit of wrapping shared
//! emulator state in `std::sync::Mutex`/`Condvar` rather than a hand-rolled
//! lock; the periodic tick is a plain `Condvar::wait_timeout` on
//! [`TIME_BASE_MS`] rather than a separate timer dependency, since the
//! teacher's own scheduling loop needs nothing more elaborate.

use crate::breakpoints::Breakpoints;
use crate::cpu::Cpu;
use crate::events::{Event, PendingEvents};
use crate::status::{CpuStatus, RunState};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub const TIME_BASE_MS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    Run,
    Stop,
    Step,
    Next,
    Reset,
    ResetRun,
    Exit,
    Suspend,
    Schedule,
    Invalid,
}

/// A request queued by the UI thread for the scheduler to act on between
/// cycle quanta. Mirrors the original's `Command` base class.
pub trait Command: Send {
    fn execute(&self, cpu: &mut Cpu, breakpoints: &mut Breakpoints);
}

pub struct SetBreakpoint {
    pub index: usize,
    pub address: u16,
}
impl Command for SetBreakpoint {
    fn execute(&self, _cpu: &mut Cpu, breakpoints: &mut Breakpoints) {
        breakpoints.set(self.index, self.address);
    }
}

pub struct ClearBreakpoints;
impl Command for ClearBreakpoints {
    fn execute(&self, _cpu: &mut Cpu, breakpoints: &mut Breakpoints) {
        breakpoints.clear_all();
    }
}

/// Cross-thread handle a periodic timer thread uses to raise `Event::Timer`
/// and wake the CPU thread, without needing access to CPU state itself.
#[derive(Clone)]
pub struct SchedulerHandle {
    events: Arc<PendingEvents>,
    condition: Arc<(Mutex<bool>, Condvar)>,
}

impl SchedulerHandle {
    pub fn fire_timer(&self) {
        self.events.set(Event::TIMER);
        let (lock, cvar) = &*self.condition;
        let mut woken = lock.lock().unwrap();
        *woken = true;
        cvar.notify_all();
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Target instructions-per-second equivalent, expressed as cycles per
    /// second. `0.0` means unthrottled (run as fast as the host allows).
    pub target_frequency: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { target_frequency: 0.0 }
    }
}

/// Owns the run-mode state machine. `state` and `user_state` are separated
/// the way the original keeps `state` (what is actually happening) distinct
/// from `user_state` (what was last requested), so a `Step` request can be
/// downgraded back to `Stop` once the single step completes without losing
/// the fact that the user asked to stop.
pub struct Scheduler {
    pub state: CpuState,
    user_state: CpuState,
    config: SchedulerConfig,
    required_cyclecount: u64,
    total_cycles_at_window_start: u64,
    window_start: Instant,
    pub events: Arc<PendingEvents>,
    pub commands: Arc<Mutex<Vec<Box<dyn Command>>>>,
    pub status: Arc<Mutex<Option<CpuStatus>>>,
    condition: Arc<(Mutex<bool>, Condvar)>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, events: Arc<PendingEvents>) -> Self {
        Scheduler {
            state: CpuState::Run,
            user_state: CpuState::Invalid,
            config,
            required_cyclecount: u64::MAX,
            total_cycles_at_window_start: 0,
            window_start: Instant::now(),
            events,
            commands: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(Mutex::new(None)),
            condition: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == CpuState::Exit
    }

    /// A cheaply-cloned handle to this scheduler's event bitset and resume
    /// condition variable, for the periodic timer thread: it owns no CPU
    /// state, only the two cross-thread primitives §5 names for `Event::Timer`
    /// (set the bit, then wake anything blocked in `idleloop`'s `suspend`).
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle { events: Arc::clone(&self.events), condition: Arc::clone(&self.condition) }
    }

    /// Requests a new run state from the UI thread, matching the original's
    /// `request_new_state`, which also wakes a CPU blocked inside `run()`.
    pub fn request_new_state(&mut self, state: CpuState) {
        self.user_state = state;
        self.wake();
    }

    fn wake(&self) {
        let (lock, cvar) = &*self.condition;
        let mut woken = lock.lock().unwrap();
        *woken = true;
        cvar.notify_all();
    }

    pub fn suspend(&self, timeout: Duration) {
        let (lock, cvar) = &*self.condition;
        let woken = lock.lock().unwrap();
        let (mut woken, _) = cvar.wait_timeout(woken, timeout).unwrap();
        *woken = false;
    }

    /// One iteration of the idle loop: process pending events, then block
    /// until the next tick while state remains Stop/Invalid/None.
    pub fn idleloop(&mut self) {
        while matches!(self.user_state, CpuState::Invalid | CpuState::Stop) {
            self.process_events();
            self.suspend(Duration::from_millis(TIME_BASE_MS));
        }
    }

    /// Services pending events raised by the timer or the command queue.
    /// Grounded on `schedule.cpp`'s `process_events`: the Timer branch
    /// recomputes frequency throttling once per second, the SyncExec
    /// branch drains the command queue.
    pub fn process_events(&mut self) {
        let pending = self.events.take();
        if pending.contains(Event::TIMER) {
            if self.config.target_frequency > 0.0 {
                self.frequency_control();
            }
            self.events.set(Event::SET_STATUS);
        }
        if pending.contains(Event::SYNC_EXEC) {
            // Draining happens in `execute_commands`, called by the CPU
            // thread which owns `cpu`/`breakpoints`.
        }
    }

    pub fn execute_commands(&mut self, cpu: &mut Cpu, breakpoints: &mut Breakpoints) {
        let mut queue = self.commands.lock().unwrap();
        for command in queue.drain(..) {
            command.execute(cpu, breakpoints);
        }
    }

    /// `required_cyclecount = target_Hz * elapsed_us / 1_000_000`, adjusted
    /// once per one-second window, matching the original's frequency
    /// control pass.
    fn frequency_control(&mut self) {
        let elapsed = self.window_start.elapsed();
        let elapsed_us = elapsed.as_micros() as f64;
        if elapsed_us <= 0.0 {
            return;
        }
        self.required_cyclecount = (self.config.target_frequency * elapsed_us / 1_000_000.0) as u64;
        self.window_start = Instant::now();
    }

    /// Cycle budget remaining in the current throttling window; `u64::MAX`
    /// when unthrottled.
    pub fn cycle_budget(&self, total_cycles: u64) -> u64 {
        if self.config.target_frequency <= 0.0 {
            return u64::MAX;
        }
        let spent = total_cycles.saturating_sub(self.total_cycles_at_window_start);
        self.required_cyclecount.saturating_sub(spent)
    }

    pub fn note_cycles(&mut self, total_cycles: u64) {
        self.total_cycles_at_window_start = total_cycles;
    }

    /// Drives the CPU through one run-mode iteration: services the
    /// requested user state transition, steps the CPU if running, and
    /// checks breakpoints at the instruction boundary.
    pub fn run_once(&mut self, cpu: &mut Cpu, breakpoints: &mut Breakpoints) -> CpuState {
        match self.user_state {
            CpuState::Exit => {
                self.state = CpuState::Exit;
                return self.state;
            }
            CpuState::Reset | CpuState::ResetRun => {
                cpu.reset();
                self.user_state = if self.user_state == CpuState::ResetRun { CpuState::Run } else { CpuState::Stop };
            }
            CpuState::Invalid => {}
            other => self.state = other,
        }

        if self.state == CpuState::Stop || self.state == CpuState::Invalid {
            self.idleloop();
            return self.state;
        }

        if breakpoints.hits(cpu.regs.pc) {
            self.events.set(Event::BREAKPOINT);
            self.state = CpuState::Stop;
            self.user_state = CpuState::Stop;
            return self.state;
        }

        // SingleStepOver plants the internal "next" breakpoint at the
        // return address of a subroutine call and keeps running until it
        // hits; every other opcode behaves exactly like a single Step.
        let stepping_over_call = self.state == CpuState::Next && Cpu::is_subroutine_call(cpu.read_byte(cpu.regs.pc));

        match cpu.step() {
            Ok(cycles) => {
                self.note_cycles(cpu.cycles);
                let _ = cycles;
            }
            Err(_) => {
                self.state = CpuState::Stop;
                self.user_state = CpuState::Stop;
            }
        }

        if stepping_over_call {
            let return_address = cpu.read_word(cpu.regs.s);
            breakpoints.set_next(return_address);
            self.state = CpuState::Run;
            self.user_state = CpuState::Run;
        } else if self.state == CpuState::Step || self.state == CpuState::Next {
            self.events.set(Event::SINGLE_STEP_FINISHED);
            self.state = CpuState::Stop;
            self.user_state = CpuState::Stop;
        }

        self.state
    }

    pub fn run_state(&self) -> RunState {
        match self.state {
            CpuState::Run | CpuState::ResetRun => RunState::Run,
            CpuState::Stop | CpuState::Invalid => RunState::Stop,
            CpuState::Step => RunState::Step,
            CpuState::Next => RunState::Next,
            CpuState::Exit => RunState::Exit,
            CpuState::Reset | CpuState::Suspend | CpuState::Schedule => RunState::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, Ram};

    fn new_cpu() -> Cpu {
        let mut bus = Bus::new();
        bus.attach(Ram::new(), 0x0000, 0xffff);
        Cpu::new(Arc::new(Mutex::new(bus)))
    }

    #[test]
    fn request_new_state_is_observed_by_run_once() {
        let events = Arc::new(PendingEvents::new());
        let mut scheduler = Scheduler::new(SchedulerConfig::default(), events);
        let mut cpu = new_cpu();
        let mut bp = Breakpoints::new();
        scheduler.request_new_state(CpuState::Run);
        let state = scheduler.run_once(&mut cpu, &mut bp);
        assert_eq!(state, CpuState::Run);
    }

    #[test]
    fn exit_state_marks_scheduler_finished() {
        let events = Arc::new(PendingEvents::new());
        let mut scheduler = Scheduler::new(SchedulerConfig::default(), events);
        let mut cpu = new_cpu();
        let mut bp = Breakpoints::new();
        scheduler.request_new_state(CpuState::Exit);
        scheduler.run_once(&mut cpu, &mut bp);
        assert!(scheduler.is_finished());
    }

    #[test]
    fn breakpoint_hit_stops_the_scheduler() {
        let events = Arc::new(PendingEvents::new());
        let mut scheduler = Scheduler::new(SchedulerConfig::default(), events);
        let mut cpu = new_cpu();
        let mut bp = Breakpoints::new();
        bp.set(0, cpu.regs.pc);
        scheduler.request_new_state(CpuState::Run);
        let state = scheduler.run_once(&mut cpu, &mut bp);
        assert_eq!(state, CpuState::Stop);
        assert!(scheduler.events.contains(Event::BREAKPOINT));
    }

    #[test]
    fn step_state_downgrades_to_stop_after_one_instruction() {
        let events = Arc::new(PendingEvents::new());
        let mut scheduler = Scheduler::new(SchedulerConfig::default(), events);
        let mut cpu = new_cpu();
        cpu.bus.lock().unwrap().write_byte(cpu.regs.pc, 0x12); // NOP
        let mut bp = Breakpoints::new();
        scheduler.request_new_state(CpuState::Step);
        let state = scheduler.run_once(&mut cpu, &mut bp);
        assert_eq!(state, CpuState::Stop);
    }
}

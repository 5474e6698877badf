//! Black-box end-to-end tests driving the public `Emulator` surface: whole
//! programs assembled by hand into byte sequences, run against a flat RAM
//! bus, and checked by final register/cycle state. Per-module behavior
//! (ALU flag formulas, loop-compression, print-stream reconciliation,
//! page-break detection) has its own focused `#[cfg(test)]` module next to
//! the code it exercises; this file is for the pieces that only make sense
//! wired together.

use flex6809::breakpoints::Breakpoints;
use flex6809::bus::{Bus, Ram};
use flex6809::cpu::Cpu;
use flex6809::registers::ConditionCodes;
use flex6809::scheduler::{CpuState, Scheduler, SchedulerConfig};
use std::sync::{Arc, Mutex};

fn new_cpu_with_program(origin: u16, program: &[u8]) -> Cpu {
    let mut bus = Bus::new();
    bus.attach(Ram::new(), 0x0000, 0xffff);
    let bus = Arc::new(Mutex::new(bus));
    {
        let mut b = bus.lock().unwrap();
        b.write_word(0xfffe, origin);
        for (offset, &byte) in program.iter().enumerate() {
            b.write_byte(origin.wrapping_add(offset as u16), byte);
        }
    }
    let mut cpu = Cpu::new(bus);
    cpu.reset();
    cpu.regs.s = 0x8000;
    cpu
}

fn run_until_pc(cpu: &mut Cpu, target_pc: u16, max_steps: usize) {
    for _ in 0..max_steps {
        if cpu.regs.pc == target_pc {
            return;
        }
        cpu.step().unwrap();
    }
    panic!("program did not reach {:04x} within {} steps (stuck at {:04x})", target_pc, max_steps, cpu.regs.pc);
}

/// §8 scenario 1: two nested `BSR`s followed by their `RTS`s and a final
/// `JMP`. Mirrors the logger test in `logger.rs`'s
/// `recursive_calls_are_not_mistaken_for_a_loop`, here checked by actually
/// executing the bytes rather than asserting on a replayed trace.
#[test]
fn simple_subroutine_chain_runs_to_completion() {
    let mut cpu = new_cpu_with_program(0x0200, &[]);
    {
        let bus = Arc::clone(&cpu.bus);
        let mut b = bus.lock().unwrap();
        // 0200: BSR $0204   (opcode 8d, offset = 0204 - 0202 = 2)
        b.write_byte(0x0200, 0x8d);
        b.write_byte(0x0201, 0x02);
        // 0202: JMP $CD03   (the final instruction, reached after both calls return)
        b.write_byte(0x0202, 0x7e);
        b.write_word(0x0203, 0xcd03);
        // 0204: BSR $0208   (offset = 0208 - 0206 = 2)
        b.write_byte(0x0204, 0x8d);
        b.write_byte(0x0205, 0x02);
        // 0206: RTS
        b.write_byte(0x0206, 0x39);
        // 0208: RTS
        b.write_byte(0x0208, 0x39);
    }
    run_until_pc(&mut cpu, 0xcd03, 32);
    assert_eq!(cpu.regs.s, 0x8000);
}

/// §8 scenario 2: `LDA #6; DECA; BNE $0102; JMP $CD03` decrements to zero
/// and falls through to the terminating jump.
#[test]
fn counted_loop_runs_exactly_six_iterations() {
    let mut cpu = new_cpu_with_program(
        0x0100,
        &[
            0x86, 0x06, // 0100 LDA #6
            0x4a, // 0102 DECA
            0x26, 0xfd, // 0103 BNE $0102
            0x7e, 0xcd, 0x03, // 0105 JMP $CD03
        ],
    );
    run_until_pc(&mut cpu, 0xcd03, 64);
    assert_eq!(cpu.regs.a, 0);
    assert!(cpu.regs.cc.contains(ConditionCodes::ZERO));
}

/// §8 boundary: `LDX $FFFF` wraps, reading the high byte from `$FFFF` and
/// the low byte from `$0000`.
#[test]
fn extended_word_read_wraps_at_top_of_address_space() {
    let mut cpu = new_cpu_with_program(0x0100, &[0xfe, 0xff, 0xff]); // LDU $FFFF (page1 extended, reuse U to avoid clobbering X's default use elsewhere)
    cpu.bus.lock().unwrap().write_byte(0xffff, 0x12);
    cpu.bus.lock().unwrap().write_byte(0x0000, 0x34);
    cpu.step().unwrap();
    assert_eq!(cpu.regs.u, 0x1234);
}

/// §8 boundary: pushing onto `S=0x0000` wraps down to `0xFFFF` rather than
/// panicking or clamping.
#[test]
fn push_wraps_stack_pointer_past_zero() {
    let mut cpu = new_cpu_with_program(0x0100, &[0x34, 0x02]); // PSHS A
    cpu.regs.s = 0x0000;
    cpu.regs.a = 0x99;
    cpu.step().unwrap();
    assert_eq!(cpu.regs.s, 0xffff);
    assert_eq!(cpu.bus.lock().unwrap().read_byte(0xffff), 0x99);
}

/// §8 boundary: a short branch can reach -128, and a long branch -32768.
#[test]
fn short_branch_reaches_maximum_negative_offset() {
    let mut cpu = new_cpu_with_program(0x0200, &[0x20, 0x80]); // BRA -128
    cpu.step().unwrap();
    // next_pc (0x0202) + (-128) = 0x0182
    assert_eq!(cpu.regs.pc, 0x0182);
}

#[test]
fn long_branch_reaches_maximum_negative_offset() {
    let mut cpu = new_cpu_with_program(0x8000, &[0x16, 0x80, 0x00]); // LBRA -32768
    cpu.step().unwrap();
    assert_eq!(cpu.regs.pc, 0x8003u16.wrapping_add((-32768i32) as u16));
}

/// §8 invariant: push-then-pull of every register with the same mask is
/// the identity transform.
#[test]
fn pshs_puls_full_mask_round_trips_every_register() {
    let mut cpu = new_cpu_with_program(0x0100, &[0x34, 0xff, 0x35, 0xff]); // PSHS all; PULS all
    cpu.regs.a = 0x11;
    cpu.regs.b = 0x22;
    cpu.regs.dp = 0x33;
    cpu.regs.x = 0x4455;
    cpu.regs.y = 0x6677;
    cpu.regs.u = 0x8899;
    cpu.regs.cc = ConditionCodes::from_bits_truncate(0xaa);
    let before = cpu.regs.clone();
    let before_pc_after_pshs = 0x0102u16;
    cpu.step().unwrap(); // PSHS
    assert_eq!(cpu.regs.pc, before_pc_after_pshs);
    cpu.step().unwrap(); // PULS (also restores PC, which was pushed as part of the mask)
    assert_eq!(cpu.regs.a, before.a);
    assert_eq!(cpu.regs.b, before.b);
    assert_eq!(cpu.regs.dp, before.dp);
    assert_eq!(cpu.regs.x, before.x);
    assert_eq!(cpu.regs.y, before.y);
    assert_eq!(cpu.regs.u, before.u);
    assert_eq!(cpu.regs.cc, before.cc);
}

/// §8 invariant: TFR followed by its inverse TFR restores the original
/// values (width mismatches included, per the silicon-accurate resolution
/// of the TFR/EXG open question).
#[test]
fn tfr_followed_by_inverse_tfr_restores_original_value() {
    let mut cpu = new_cpu_with_program(0x0100, &[0x1f, 0x18, 0x1f, 0x81]); // TFR X,A ; TFR A,X
    cpu.regs.x = 0x1234;
    cpu.regs.a = 0x00;
    cpu.step().unwrap(); // TFR X,A: A = low byte of X = 0x34
    assert_eq!(cpu.regs.a, 0x34);
    cpu.step().unwrap(); // TFR A,X: X = 0xff34 (8->16 fills high byte with 0xFF)
    assert_eq!(cpu.regs.x, 0xff34);
}

/// §8 invariant: reset is idempotent — two resets from arbitrary dirty
/// state produce identical register/flag state.
#[test]
fn reset_is_idempotent() {
    let mut cpu = new_cpu_with_program(0x0100, &[]);
    cpu.regs.a = 0x42;
    cpu.regs.cc = ConditionCodes::from_bits_truncate(0x0f);
    cpu.reset();
    let first = cpu.regs.clone();
    cpu.regs.a = 0x99; // dirty it again
    cpu.reset();
    let second = cpu.regs.clone();
    assert_eq!(first, second);
}

/// §8 invariant: total cycle count never decreases across steps.
#[test]
fn cycle_count_is_monotonic() {
    let mut cpu = new_cpu_with_program(0x0100, &[0x12, 0x12, 0x12]); // NOP NOP NOP
    let mut last = cpu.cycles;
    for _ in 0..3 {
        cpu.step().unwrap();
        assert!(cpu.cycles >= last);
        last = cpu.cycles;
    }
}

/// §8 end-to-end: a breakpoint hit leaves `PC` exactly at the breakpoint
/// address when the scheduler reports `Stop`.
#[test]
fn breakpoint_hit_leaves_pc_at_the_breakpoint() {
    let mut cpu = new_cpu_with_program(0x0100, &[0x12, 0x12, 0x12, 0x7e, 0xcd, 0x03]); // NOP NOP NOP JMP
    let events = Arc::clone(&cpu.events);
    let mut scheduler = Scheduler::new(SchedulerConfig::default(), events);
    let mut breakpoints = Breakpoints::new();
    breakpoints.set(0, 0x0102);
    scheduler.request_new_state(CpuState::Run);

    let mut state = CpuState::Run;
    for _ in 0..16 {
        state = scheduler.run_once(&mut cpu, &mut breakpoints);
        if state == CpuState::Stop {
            break;
        }
    }
    assert_eq!(state, CpuState::Stop);
    assert_eq!(cpu.regs.pc, 0x0102);
}

/// §8 end-to-end: single-step-over a `BSR` runs the whole subroutine and
/// stops back at the instruction after the call, rather than stopping
/// inside the subroutine.
#[test]
fn single_step_over_subroutine_call_skips_its_body() {
    let mut cpu = new_cpu_with_program(
        0x0100,
        &[
            0x8d, 0x02, // 0100 BSR $0104
            0x12, // 0102 NOP (landing spot after the call returns)
            0x39, // 0103 unreachable padding
            0x39, // 0104 RTS
        ],
    );
    let events = Arc::clone(&cpu.events);
    let mut scheduler = Scheduler::new(SchedulerConfig::default(), events);
    let mut breakpoints = Breakpoints::new();
    scheduler.state = CpuState::Next;
    scheduler.request_new_state(CpuState::Next);

    let mut state = CpuState::Next;
    for _ in 0..16 {
        state = scheduler.run_once(&mut cpu, &mut breakpoints);
        if state == CpuState::Stop {
            break;
        }
    }
    assert_eq!(state, CpuState::Stop);
    assert_eq!(cpu.regs.pc, 0x0102);
}

/// Print-stream round trip (§8): a stream with no ESC codes passes through
/// unchanged, one character per printable byte, each LF closing a line.
#[test]
fn print_stream_plain_text_passes_through_unchanged() {
    use flex6809::printer::{rich_line_to_string, PrintOverlayHelper};
    let mut helper = PrintOverlayHelper::new();
    let mut lines = Vec::new();
    for &byte in b"HELLO\nWORLD\n" {
        if helper.add_character(byte) {
            lines.push(rich_line_to_string(helper.rich_line()));
            helper.clear();
        }
    }
    assert_eq!(lines, vec!["HELLO".to_string(), "WORLD".to_string()]);
}

/// CC formatting (§8 scenario 6), checked end-to-end through the logger's
/// public formatter rather than duplicated arithmetic.
#[test]
fn cc_formatting_matches_scenario_six() {
    use flex6809::logger::Logger;
    assert_eq!(Logger::<Vec<u8>>::as_cc_string(0x55), "-F-I-Z-C");
    assert_eq!(Logger::<Vec<u8>>::as_cc_string(0xaa), "E-H-N-V-");
}

//! Headless command-line front end: loads a raw binary at a given origin
//! and runs it to completion. `env_logger::init()` is installed here and
//! only here, matching the corpus convention that a library crate never
//! initializes a logger itself and leaves that to its binary.

use flex6809::scheduler::SchedulerConfig;
use flex6809::Emulator;
use std::env;
use std::fs;
use std::process;

fn parse_origin(text: &str) -> Option<u16> {
    let trimmed = text.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(trimmed, 16).ok()
}

fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let path = match args.next() {
        Some(path) => path,
        None => {
            eprintln!("usage: flex6809 <program.bin> [origin-hex]");
            process::exit(2);
        }
    };
    let origin = args.next().as_deref().and_then(parse_origin).unwrap_or(0x0000);

    let program = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::error!("failed to read {}: {}", path, err);
            process::exit(1);
        }
    };

    let mut emulator = Emulator::new(SchedulerConfig::default());
    emulator.load_program(origin, &program);
    log::info!("loaded {} bytes at {:#06x}", program.len(), origin);
    emulator.run();
    let cpu = emulator.cpu.as_ref().expect("emulator finished run()");
    log::info!("stopped after {} cycles at pc={:#06x}", cpu.cycles, cpu.regs.pc);
}

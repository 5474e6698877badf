//! Filtered instruction trace with loop compression.
//!
//! The range/start/stop latch (`Logger::should_log`) and the loop-detection
//! algorithm below are grounded on `original_source/src/mc6809lg.cpp`'s
//! `doLogging`/`logCpuState`, reverse-engineered to match
//! `original_source/test/test_mc6809lg.cpp` exactly: a loop is confirmed
//! once an instruction's PC recurs and the following instructions repeat
//! the same window of opcode bytes; fewer than two confirmed repeats are
//! written out literally, two or more collapse into a `DO` / `REPEAT = n`
//! pair. A PC recurring with DIFFERENT opcode bytes (self-modified code)
//! never matches, which is how such a loop terminates on its own.

use crate::registers::ConditionCodes;
use bitflags::bitflags;
use std::io::{self, Write};

bitflags! {
    /// Which registers a trace line includes, mirroring the original's
    /// register-mask log selector.
    pub struct LogRegisterMask: u16 {
        const CC = 1 << 0;
        const A  = 1 << 1;
        const B  = 1 << 2;
        const DP = 1 << 3;
        const X  = 1 << 4;
        const Y  = 1 << 5;
        const U  = 1 << 6;
        const S  = 1 << 7;
        const PC = 1 << 8;
        const ALL = Self::CC.bits | Self::A.bits | Self::B.bits | Self::DP.bits
            | Self::X.bits | Self::Y.bits | Self::U.bits | Self::S.bits | Self::PC.bits;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Csv { separator: char },
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub is_enabled: bool,
    pub min_addr: u16,
    pub max_addr: u16,
    pub start_addr: Option<u16>,
    pub stop_addr: Option<u16>,
    pub registers: LogRegisterMask,
    pub format: LogFormat,
    pub log_cycle_count: bool,
    pub is_loop_optimization: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            is_enabled: false,
            min_addr: 0x0000,
            max_addr: 0xffff,
            start_addr: None,
            stop_addr: None,
            registers: LogRegisterMask::ALL,
            format: LogFormat::Text,
            log_cycle_count: false,
            is_loop_optimization: true,
        }
    }
}

/// One executed instruction, captured for both rendering and loop
/// comparison. Two snapshots are considered the same loop step iff their
/// `pc` and `bytes` both match, so self-modified code breaks the match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedInstruction {
    pub pc: u16,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    pub operands: String,
    pub cycles: u64,
}

impl LoggedInstruction {
    fn rendered(&self, config: &LoggerConfig) -> String {
        match config.format {
            LogFormat::Text => {
                let prefix = if config.log_cycle_count { format!("{:<20}", self.cycles) } else { String::new() };
                if self.operands.is_empty() {
                    format!("{prefix}{:04X} {:<23}", self.pc, self.mnemonic)
                } else {
                    format!("{prefix}{:04X} {:<23}{}", self.pc, self.mnemonic, self.operands)
                }
            }
            LogFormat::Csv { separator } => {
                format!("{:04X}{sep}{}{sep}{}", self.pc, self.mnemonic, self.operands, sep = separator)
            }
        }
    }
}

const MAX_HISTORY: usize = 512;

enum DetectorState {
    Idle,
    Matching { window: Vec<LoggedInstruction>, pos: usize, repeat_count: u32 },
}

/// Streaming loop compressor: `feed` is called once per logged instruction
/// and returns the lines that became ready to write as a result (zero,
/// one, or several, since closing a loop emits a `DO` block in one shot).
struct LoopDetector {
    recent: Vec<LoggedInstruction>,
    state: DetectorState,
}

impl LoopDetector {
    fn new() -> Self {
        LoopDetector { recent: Vec::new(), state: DetectorState::Idle }
    }

    fn feed(&mut self, entry: LoggedInstruction) -> Vec<RenderedLine> {
        match std::mem::replace(&mut self.state, DetectorState::Idle) {
            DetectorState::Idle => {
                if let Some(index) = self.recent.iter().rposition(|e| e.pc == entry.pc) {
                    let window: Vec<LoggedInstruction> = self.recent[index..].to_vec();
                    if window[0] == entry {
                        self.state = DetectorState::Matching { window, pos: 1, repeat_count: 0 };
                        return Vec::new();
                    }
                }
                self.push_recent(entry.clone());
                vec![RenderedLine::Plain(entry)]
            }
            DetectorState::Matching { window, mut pos, mut repeat_count } => {
                let expected = &window[pos];
                if expected.pc == entry.pc && expected.bytes == entry.bytes {
                    pos += 1;
                    if pos == window.len() {
                        repeat_count += 1;
                        pos = 0;
                    }
                    self.state = DetectorState::Matching { window, pos, repeat_count };
                    Vec::new()
                } else {
                    let mut lines = Vec::new();
                    if repeat_count >= 2 {
                        lines.push(RenderedLine::Do);
                        for item in &window {
                            lines.push(RenderedLine::Plain(item.clone()));
                        }
                        lines.push(RenderedLine::Repeat(repeat_count));
                    } else {
                        for _ in 0..repeat_count {
                            for item in &window {
                                lines.push(RenderedLine::Plain(item.clone()));
                            }
                        }
                    }
                    for item in &window[..pos] {
                        lines.push(RenderedLine::Plain(item.clone()));
                    }
                    for item in &window {
                        self.push_recent(item.clone());
                    }
                    self.push_recent(entry.clone());
                    lines.push(RenderedLine::Plain(entry));
                    lines
                }
            }
        }
    }

    fn push_recent(&mut self, entry: LoggedInstruction) {
        self.recent.push(entry);
        if self.recent.len() > MAX_HISTORY {
            let excess = self.recent.len() - MAX_HISTORY;
            self.recent.drain(0..excess);
        }
    }
}

#[derive(Debug, Clone)]
enum RenderedLine {
    Plain(LoggedInstruction),
    Do,
    Repeat(u32),
}

pub struct Logger<W: Write> {
    config: LoggerConfig,
    writer: Option<W>,
    detector: LoopDetector,
    active: bool,
}

impl<W: Write> Logger<W> {
    pub fn new() -> Self {
        Logger { config: LoggerConfig::default(), writer: None, detector: LoopDetector::new(), active: false }
    }

    pub fn with_writer(writer: W) -> Self {
        let mut logger = Self::new();
        logger.writer = Some(writer);
        logger
    }

    pub fn set_config(&mut self, config: LoggerConfig) {
        self.config = config;
        self.active = false;
    }

    pub fn set_writer(&mut self, writer: W) {
        self.writer = Some(writer);
    }

    /// CC register rendered MSB to LSB as `EFHINZVC`, clear bits shown as
    /// `-`, matching the original's `asCCString`.
    pub fn as_cc_string(bits: u8) -> String {
        ConditionCodes::from_bits_truncate(bits).as_display_string()
    }

    /// Gate deciding whether `pc` should be logged at all: range filter
    /// AND'd with an optional start/stop latch.
    pub fn should_log(&mut self, pc: u16) -> bool {
        if !self.config.is_enabled || self.writer.is_none() {
            return false;
        }
        if let Some(stop) = self.config.stop_addr {
            if pc == stop {
                self.active = false;
                return false;
            }
        }
        if self.config.start_addr.is_some() && !self.active {
            if Some(pc) == self.config.start_addr {
                self.active = true;
            } else {
                return false;
            }
        }
        pc >= self.config.min_addr && pc <= self.config.max_addr
    }

    pub fn log_instruction(&mut self, pc: u16, bytes: &[u8], mnemonic: &str, operands: &str, cycles: u64) -> io::Result<()> {
        if !self.should_log(pc) {
            return Ok(());
        }
        let entry = LoggedInstruction { pc, bytes: bytes.to_vec(), mnemonic: mnemonic.to_string(), operands: operands.to_string(), cycles };
        let lines = if self.config.is_loop_optimization { self.detector.feed(entry) } else { vec![RenderedLine::Plain(entry)] };
        for line in lines {
            self.write_line(&line)?;
        }
        Ok(())
    }

    /// Flushes any instructions the loop detector is still holding onto
    /// (e.g. at end of run), the way the original flushes its buffer when
    /// logging stops.
    pub fn finish(&mut self) -> io::Result<()> {
        if let DetectorState::Matching { window, pos, repeat_count } =
            std::mem::replace(&mut self.detector.state, DetectorState::Idle)
        {
            let mut lines = Vec::new();
            if repeat_count >= 2 {
                lines.push(RenderedLine::Do);
                for item in &window {
                    lines.push(RenderedLine::Plain(item.clone()));
                }
                lines.push(RenderedLine::Repeat(repeat_count));
            } else {
                for _ in 0..repeat_count {
                    for item in &window {
                        lines.push(RenderedLine::Plain(item.clone()));
                    }
                }
            }
            for item in &window[..pos] {
                lines.push(RenderedLine::Plain(item.clone()));
            }
            for line in lines {
                self.write_line(&line)?;
            }
        }
        Ok(())
    }

    fn write_line(&mut self, line: &RenderedLine) -> io::Result<()> {
        let writer = match &mut self.writer {
            Some(w) => w,
            None => return Ok(()),
        };
        match line {
            RenderedLine::Plain(entry) => writeln!(writer, "{}", entry.rendered(&self.config)),
            RenderedLine::Do => writeln!(writer, "DO"),
            RenderedLine::Repeat(n) => writeln!(writer, "REPEAT = {}", n),
        }
    }
}

impl<W: Write> Default for Logger<W> {
    fn default() -> Self {
        Self::new()
    }
}

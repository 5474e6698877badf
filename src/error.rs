use thiserror::Error;

/// Error conditions raised by the CPU core, the instruction logger and the
/// memory finder. CPU decode failures are also reflected as pending events
/// (see [`crate::events`]); the variants here are the ones that cross a
/// `Result`-returning boundary (file I/O, search pattern parsing).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Mc6809Error {
    #[error("invalid instruction opcode {opcode:02x} at {address:04x}")]
    InvalidInstruction { address: u16, opcode: u8 },

    #[error("invalid indexed addressing postbyte {postbyte:02x} at {address:04x}")]
    InvalidPostbyte { address: u16, postbyte: u8 },

    #[error("invalid register number {register:02x} in exchange/transfer at {address:04x}")]
    InvalidExchangeTransferRegister { address: u16, register: u8 },

    #[error("could not open log file {path}: {reason}")]
    LogFileOpenFailure { path: String, reason: String },

    #[error("invalid search regular expression: {0}")]
    InvalidRegex(String),

    #[error("invalid hex byte sequence: {0}")]
    InvalidHexBytes(String),

    #[error("invalid ascii search string: {0}")]
    InvalidAsciiString(String),
}

pub type Result<T> = std::result::Result<T, Mc6809Error>;

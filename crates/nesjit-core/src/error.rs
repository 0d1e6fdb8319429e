//! Error types
//!
//! Every failure names the address or value it is about so a log line is
//! enough to find the offending bytes in the cartridge image.

use thiserror::Error;

use crate::opcodes::Mnemonic;

/// Failure while decoding instructions for one function
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("address ${address:04X} is not inside any code region")]
    UnmappedAddress { address: u16 },

    #[error("unknown opcode ${opcode:02X} at ${address:04X}")]
    UnknownOpcode { address: u16, opcode: u8 },

    #[error("{mnemonic} at ${address:04X} needs {required} bytes but only {available} remain")]
    Truncated {
        address: u16,
        mnemonic: Mnemonic,
        required: usize,
        available: usize,
    },
}

/// Failure while turning IR into a callable unit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("jump to undefined label {label}")]
    UnknownLabel { label: String },

    #[error("label {label} is defined more than once")]
    DuplicateLabel { label: String },

    #[error("{value} cannot be used as a write target")]
    InvalidTarget { value: String },

    #[error("custom generator for {kind} failed: {message}")]
    Custom { kind: String, message: String },
}

/// Failure raised while a compiled unit runs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("variable {index} read before it was written")]
    UndefinedVariable { index: u8 },

    #[error("hook {tag} failed: {message}")]
    Hook { tag: u32, message: String },

    #[error("unit for ${entry:04X} ran past its last instruction")]
    RanOffEnd { entry: u16 },
}

/// Errors surfaced by the compiler and its dispatch layer
#[derive(Error, Debug)]
pub enum JitError {
    #[error("failed to decompile function at ${entry:04X}: {source}")]
    Decode {
        entry: u16,
        #[source]
        source: DecodeError,
    },

    #[error("function at ${0:04X} decompiled to zero instructions")]
    EmptyFunction(u16),

    #[error("failed to generate code for ${address:04X}: {source}")]
    Generation {
        address: u16,
        #[source]
        source: GenerationError,
    },

    #[error("compiled function at ${address:04X} failed: {source}")]
    Execution {
        address: u16,
        #[source]
        source: ExecutionError,
    },

    #[error("cache i/o error: {0}")]
    CacheIo(#[from] std::io::Error),

    #[error("cache format error: {0}")]
    CacheFormat(#[from] bincode::Error),

    #[error("cache artifact does not match: {0}")]
    CacheMismatch(String),
}

/// iNES loading errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CartridgeError {
    #[error("invalid iNES header: {0}")]
    InvalidHeader(&'static str),

    #[error("image truncated: {section} needs {required} bytes, {available} available")]
    Truncated {
        section: &'static str,
        required: usize,
        available: usize,
    },

    #[error("cartridge has no PRG ROM")]
    NoProgram,
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Errors from the frame driver
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error(transparent)]
    Jit(#[from] JitError),

    #[error(transparent)]
    Cartridge(#[from] CartridgeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("emulator is not running")]
    NotRunning,

    #[error("failed to spawn driver thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Result alias for compiler operations
pub type Result<T, E = JitError> = std::result::Result<T, E>;

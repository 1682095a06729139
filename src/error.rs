//! Error types for pseudo console operations

use std::io;
use thiserror::Error;

use crate::config::ConfigError;

/// Pseudo console error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error on one of the console pipes
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Console dimensions outside `1..=i16::MAX`
    #[error("Invalid console size {cols}x{rows}: both dimensions must be between 1 and 32767")]
    InvalidSize { cols: u16, rows: u16 },

    /// Failed to create one of the anonymous pipes
    #[error("Failed to create pipe: {0}")]
    CreatePipe(#[source] io::Error),

    /// CreatePseudoConsole returned a failure HRESULT
    #[error("CreatePseudoConsole failed: 0x{0:08X}")]
    CreatePseudoConsole(i32),

    /// ResizePseudoConsole returned a failure HRESULT
    #[error("ResizePseudoConsole failed: 0x{0:08X}")]
    ResizePseudoConsole(i32),

    /// Operation on a console that has already been closed
    #[error("Pseudo console is closed")]
    Closed,

    /// Command line or environment that cannot be handed to the OS
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Failed to start a process attached to the console
    #[error("Failed to spawn child: {0}")]
    Spawn(#[source] io::Error),

    /// Failed to wait on or terminate a child
    #[error("Child process error: {0}")]
    Child(#[source] io::Error),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The platform has no pseudo console facility
    #[error("Pseudo consoles are only available on Windows 10 1809 or later")]
    Unsupported,
}

/// Result type for pseudo console operations
pub type Result<T> = std::result::Result<T, Error>;

//! ConPTY - Windows pseudo console sessions
//!
//! This crate exposes a Windows pseudo console as a pair of plain byte
//! streams and lets the caller resize the virtual terminal.
//!
//! Key features:
//! - Pseudo console creation, resize and close (`ConPty`)
//! - Input and output pipes as `Write`/`Read` streams
//! - Child processes attached to a console (`Child`)
//! - Command line and environment block encoding for `CreateProcessW`
//! - TOML configuration for console sessions
//!
//! Pseudo consoles require Windows 10 1809 or later. On other platforms the
//! crate builds, and anything that needs a live console returns
//! [`Error::Unsupported`].
//!
//! Reference: https://learn.microsoft.com/en-us/windows/console/pseudoconsoles

mod child;
mod command;
pub mod config;
mod error;
mod pipe;
mod pty;
mod size;

#[cfg(windows)]
#[path = "sys/windows.rs"]
mod sys;

#[cfg(not(windows))]
#[path = "sys/unsupported.rs"]
mod sys;

pub use child::{Child, ExitStatus};
pub use command::CommandBuilder;
pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use pipe::{PipeReader, PipeWriter};
pub use pty::ConPty;
pub use size::{ConsoleSize, MAX_DIMENSION};

//! Stand-ins for platforms without a pseudo console.
//!
//! The types are uninhabited: `create` is the only way to obtain a console
//! and it always fails, so every other method is statically unreachable.

use std::fs::File;
use std::io;
use std::time::Duration;

use crate::command::CommandBuilder;
use crate::error::{Error, Result};
use crate::size::ConsoleSize;

#[derive(Debug)]
pub(crate) enum PseudoConsole {}

impl PseudoConsole {
    pub(crate) fn create(_size: ConsoleSize) -> Result<(Self, File, File)> {
        Err(Error::Unsupported)
    }

    pub(crate) fn resize(&self, _size: ConsoleSize) -> Result<()> {
        match *self {}
    }
}

#[derive(Debug)]
pub(crate) enum Process {}

impl Process {
    pub(crate) fn pid(&self) -> u32 {
        match *self {}
    }

    pub(crate) fn wait(&self, _timeout: Option<Duration>) -> io::Result<Option<u32>> {
        match *self {}
    }

    pub(crate) fn terminate(&self, _exit_code: u32) -> io::Result<()> {
        match *self {}
    }
}

pub(crate) fn spawn(console: &PseudoConsole, _cmd: &CommandBuilder) -> Result<Process> {
    match *console {}
}

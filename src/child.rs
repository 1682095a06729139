//! Child process management
//!
//! Spawns processes attached to a pseudo console and tracks their exit.

use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::command::CommandBuilder;
use crate::error::{Error, Result};
use crate::pty::ConPty;
use crate::size::ConsoleSize;
use crate::sys::{self, Process};

/// Exit code used by [`Child::kill`]
const KILLED_EXIT_CODE: u32 = 1;

/// Exit status of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    code: u32,
}

impl ExitStatus {
    pub fn from_code(code: u32) -> Self {
        Self { code }
    }

    /// The process exit code
    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code: {}", self.code)
    }
}

/// A child process attached to a pseudo console
#[derive(Debug)]
pub struct Child {
    /// Declared first so the console closes before the process handle is released
    pty: ConPty,
    /// The process
    process: Process,
    /// Exit status once observed
    status: Option<ExitStatus>,
}

impl Child {
    /// Spawn `cmd` on a new pseudo console of the given size
    pub fn spawn(cmd: &CommandBuilder, size: ConsoleSize) -> Result<Self> {
        let pty = ConPty::new(size)?;
        let process = sys::spawn(pty.console()?, cmd)?;
        tracing::debug!(
            pid = process.pid(),
            program = ?cmd.program(),
            "spawned child on pseudo console"
        );

        Ok(Self {
            pty,
            process,
            status: None,
        })
    }

    /// Spawn the default shell (`%COMSPEC%` or `cmd.exe`)
    pub fn spawn_shell(size: ConsoleSize) -> Result<Self> {
        Self::spawn(&CommandBuilder::default_shell(), size)
    }

    /// Get the child process ID
    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Get the pseudo console
    pub fn pty(&self) -> &ConPty {
        &self.pty
    }

    /// Get mutable access to the pseudo console
    pub fn pty_mut(&mut self) -> &mut ConPty {
        &mut self.pty
    }

    /// Resize the console. Clients see the change as a buffer resize event.
    pub fn resize(&mut self, size: ConsoleSize) -> Result<()> {
        self.pty.resize(size)
    }

    /// Close the console.
    ///
    /// The output pipe only reports EOF after this, even if the child has
    /// already exited.
    pub fn close_pty(&mut self) {
        self.pty.close();
    }

    /// Check for exit without blocking
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        self.poll(Some(Duration::ZERO))
    }

    /// Wait up to `timeout` for the child to exit
    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        self.poll(Some(timeout))
    }

    /// Block until the child exits
    pub fn wait(&mut self) -> Result<ExitStatus> {
        self.poll(None)?.ok_or_else(|| {
            Error::Child(io::Error::new(
                io::ErrorKind::Other,
                "wait returned before the child exited",
            ))
        })
    }

    /// Terminate the child. A no-op if it has already exited.
    pub fn kill(&mut self) -> Result<()> {
        if self.try_wait()?.is_some() {
            return Ok(());
        }

        if let Err(e) = self.process.terminate(KILLED_EXIT_CODE) {
            // It may have exited between the check and the terminate call
            if self.try_wait()?.is_some() {
                return Ok(());
            }
            return Err(Error::Child(e));
        }

        tracing::debug!(pid = self.pid(), "terminated child");
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }

        let status = self
            .process
            .wait(timeout)
            .map_err(Error::Child)?
            .map(ExitStatus::from_code);
        if let Some(status) = status {
            tracing::debug!(pid = self.pid(), code = status.code(), "child exited");
            self.status = Some(status);
        }
        Ok(status)
    }
}

impl Read for Child {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pty.read(buf)
    }
}

impl Write for Child {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pty.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.pty.flush()
    }
}

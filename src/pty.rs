//! Pseudo console management
//!
//! A `ConPty` owns an HPCON together with the caller's ends of its two
//! pipes. Input written to the console reaches attached clients as keyboard
//! and VT input; their rendering comes back on the output pipe as a VT stream.
//!
//! Reference: https://learn.microsoft.com/en-us/windows/console/creating-a-pseudoconsole-session

use std::io::{self, Read, Write};

use crate::error::{Error, Result};
use crate::pipe::{PipeReader, PipeWriter};
use crate::size::ConsoleSize;
use crate::sys::PseudoConsole;

/// A Windows pseudo console
#[derive(Debug)]
pub struct ConPty {
    /// The console itself, `None` once closed
    console: Option<PseudoConsole>,
    /// Our end of the input pipe
    input: Option<PipeWriter>,
    /// Our end of the output pipe
    output: Option<PipeReader>,
    /// Last size successfully applied
    size: ConsoleSize,
}

impl ConPty {
    /// Create a new pseudo console of the given size
    pub fn new(size: ConsoleSize) -> Result<Self> {
        size.validate()?;
        let (console, input, output) = PseudoConsole::create(size)?;
        tracing::debug!(cols = size.cols, rows = size.rows, "created pseudo console");

        Ok(Self {
            console: Some(console),
            input: Some(PipeWriter::new(input)),
            output: Some(PipeReader::new(output)),
            size,
        })
    }

    /// Current console size
    pub fn size(&self) -> ConsoleSize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.console.is_none()
    }

    /// The input pipe.
    ///
    /// Prefer [`ConPty::write_sequence`] for VT sequences: a short write on
    /// the raw pipe can split a sequence and corrupt the terminal state.
    pub fn input(&mut self) -> Result<&mut PipeWriter> {
        self.input.as_mut().ok_or(Error::Closed)
    }

    /// The output pipe
    pub fn output(&mut self) -> Result<&mut PipeReader> {
        self.output.as_mut().ok_or(Error::Closed)
    }

    /// Duplicate the input pipe for use on another thread
    pub fn try_clone_input(&self) -> Result<PipeWriter> {
        let input = self.input.as_ref().ok_or(Error::Closed)?;
        Ok(input.try_clone()?)
    }

    /// Duplicate the output pipe for use on another thread.
    ///
    /// A clone must be drained until EOF: the console may hold `close` until
    /// its final frame has been read.
    pub fn try_clone_output(&self) -> Result<PipeReader> {
        let output = self.output.as_ref().ok_or(Error::Closed)?;
        Ok(output.try_clone()?)
    }

    /// Write a complete input sequence and flush it
    pub fn write_sequence(&mut self, seq: &[u8]) -> Result<()> {
        let input = self.input()?;
        input.write_all(seq)?;
        input.flush()?;
        tracing::trace!(len = seq.len(), "wrote input sequence");
        Ok(())
    }

    /// Resize the console
    pub fn resize(&mut self, size: ConsoleSize) -> Result<()> {
        let console = self.console.as_ref().ok_or(Error::Closed)?;
        size.validate()?;
        console.resize(size)?;

        tracing::debug!(
            from_cols = self.size.cols,
            from_rows = self.size.rows,
            cols = size.cols,
            rows = size.rows,
            "resized pseudo console"
        );
        self.size = size;
        Ok(())
    }

    /// Close the console and both pipes. Attached clients are terminated.
    ///
    /// Calling this more than once is a no-op.
    pub fn close(&mut self) {
        let Some(console) = self.console.take() else {
            return;
        };

        // Our output end must go before ClosePseudoConsole, which can stall
        // on an undrained pipe.
        self.input = None;
        self.output = None;
        drop(console);
        tracing::debug!("closed pseudo console");
    }

    pub(crate) fn console(&self) -> Result<&PseudoConsole> {
        self.console.as_ref().ok_or(Error::Closed)
    }
}

impl Read for ConPty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.output.as_mut() {
            Some(output) => output.read(buf),
            None => Ok(0),
        }
    }
}

impl Write for ConPty {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.input.as_mut() {
            Some(input) => input.write(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, Error::Closed)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.input.as_mut() {
            Some(input) => input.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ConPty {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_size_rejected_before_creation() {
        let err = ConPty::new(ConsoleSize::new(0, 24)).unwrap_err();
        assert!(matches!(err, Error::InvalidSize { cols: 0, rows: 24 }));

        let err = ConPty::new(ConsoleSize::new(80, 40_000)).unwrap_err();
        assert!(matches!(err, Error::InvalidSize { .. }));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_unsupported_platform() {
        let err = ConPty::new(ConsoleSize::default()).unwrap_err();
        assert!(matches!(err, Error::Unsupported));
    }

    #[cfg(windows)]
    #[test]
    fn test_conpty_creation() {
        let pty = ConPty::new(ConsoleSize::new(100, 30)).unwrap();
        assert_eq!(pty.size(), ConsoleSize::new(100, 30));
        assert!(!pty.is_closed());
    }

    #[cfg(windows)]
    #[test]
    fn test_conpty_resize() {
        let mut pty = ConPty::new(ConsoleSize::default()).unwrap();
        pty.resize(ConsoleSize::new(120, 40)).unwrap();
        assert_eq!(pty.size(), ConsoleSize::new(120, 40));

        // A rejected size leaves the recorded size untouched
        assert!(pty.resize(ConsoleSize::new(0, 0)).is_err());
        assert_eq!(pty.size(), ConsoleSize::new(120, 40));
    }

    #[cfg(windows)]
    #[test]
    fn test_conpty_write_sequence() {
        let mut pty = ConPty::new(ConsoleSize::default()).unwrap();
        pty.write_sequence(b"\x1b[1;5A").unwrap();
    }

    #[cfg(windows)]
    #[test]
    fn test_conpty_close_is_idempotent() {
        let mut pty = ConPty::new(ConsoleSize::default()).unwrap();
        let _clone = pty.try_clone_input().unwrap();
        pty.close();
        pty.close();
        assert!(pty.is_closed());

        assert!(matches!(pty.input(), Err(Error::Closed)));
        assert!(matches!(pty.output(), Err(Error::Closed)));
        assert!(matches!(pty.try_clone_output(), Err(Error::Closed)));
        assert!(matches!(
            pty.resize(ConsoleSize::default()),
            Err(Error::Closed)
        ));

        let mut buf = [0u8; 16];
        assert_eq!(pty.read(&mut buf).unwrap(), 0);
        let err = pty.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}

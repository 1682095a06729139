//! Caller-side ends of the console pipes

use std::fs::File;
use std::io::{self, Read, Write};

#[cfg(windows)]
use std::os::windows::io::{AsRawHandle, RawHandle};

/// Write end of the console input pipe.
///
/// Bytes written here reach the console as keyboard and VT input.
#[derive(Debug)]
pub struct PipeWriter {
    file: File,
}

/// Read end of the console output pipe.
///
/// Yields the VT-encoded rendering of the console. EOF only arrives once the
/// console itself is closed, not when the attached client exits.
#[derive(Debug)]
pub struct PipeReader {
    file: File,
}

impl PipeWriter {
    pub(crate) fn new(file: File) -> Self {
        Self { file }
    }

    /// Duplicate the underlying handle
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self::new(self.file.try_clone()?))
    }
}

impl PipeReader {
    pub(crate) fn new(file: File) -> Self {
        Self { file }
    }

    /// Duplicate the underlying handle
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self::new(self.file.try_clone()?))
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

#[cfg(windows)]
impl AsRawHandle for PipeWriter {
    fn as_raw_handle(&self) -> RawHandle {
        self.file.as_raw_handle()
    }
}

#[cfg(windows)]
impl AsRawHandle for PipeReader {
    fn as_raw_handle(&self) -> RawHandle {
        self.file.as_raw_handle()
    }
}

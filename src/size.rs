//! Console size for the pseudo console

use crate::error::{Error, Result};

/// Largest dimension a `COORD` can carry
pub const MAX_DIMENSION: u16 = i16::MAX as u16;

/// Console size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsoleSize {
    /// Number of columns
    pub cols: u16,
    /// Number of rows
    pub rows: u16,
}

impl ConsoleSize {
    /// Create a new console size
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Pack into the single machine word the OS receives for a by-value
    /// `COORD`: columns in the low 16 bits, rows in the high 16 bits.
    pub fn pack(&self) -> u32 {
        u32::from(self.cols) | (u32::from(self.rows) << 16)
    }

    /// Inverse of [`ConsoleSize::pack`]
    pub fn unpack(word: u32) -> Self {
        Self {
            cols: (word & 0xFFFF) as u16,
            rows: (word >> 16) as u16,
        }
    }

    /// Check that both dimensions fit a `COORD` and are non-zero
    pub fn validate(&self) -> Result<()> {
        let in_range = |d: u16| (1..=MAX_DIMENSION).contains(&d);
        if in_range(self.cols) && in_range(self.rows) {
            Ok(())
        } else {
            Err(Error::InvalidSize {
                cols: self.cols,
                rows: self.rows,
            })
        }
    }

    /// Convert to a Win32 `COORD`. Callers validate first.
    #[cfg(windows)]
    pub(crate) fn to_coord(self) -> windows_sys::Win32::System::Console::COORD {
        windows_sys::Win32::System::Console::COORD {
            X: self.cols as i16,
            Y: self.rows as i16,
        }
    }
}

impl Default for ConsoleSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl From<(u16, u16)> for ConsoleSize {
    fn from((cols, rows): (u16, u16)) -> Self {
        Self::new(cols, rows)
    }
}

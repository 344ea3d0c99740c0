#![cfg_attr(not(test), no_std)]

use core::fmt::{self, Write};
use tinyvec::ArrayVec;

pub mod error;
pub mod gps;
pub mod hooks;
pub mod nmea;
pub mod time;
pub mod transport;
pub mod ubx;

pub use error::GpsError;
pub use gps::{
    config::GpsConfig,
    status::{GpsStatus, StatusSink},
    ChipModelInfo, GnssModel, Gps, PowerPhase, PreSuspend,
};
pub use hooks::ChipHooks;
pub use time::{Clock, Duration, Instant};
pub use transport::Transport;

/// Fixed-capacity text that truncates instead of overflowing, and remembers that it did.
#[derive(Default, Copy, Clone, PartialEq, Eq, Debug)]
pub struct FixedStr<const N: usize> {
    buf: ArrayVec<[u8; N]>,
    truncated: bool,
}

impl<const N: usize> Write for FixedStr<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s);
        Ok(())
    }
}

impl<const N: usize> FixedStr<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes bytes up to the first NUL, as found in fixed-width wire fields.
    /// Non-ASCII bytes are replaced with `?`.
    pub fn from_nul_padded(bytes: &[u8]) -> Self {
        let mut s = Self::new();
        for &b in bytes.iter().take_while(|&&b| b != 0) {
            s.push_byte(if b.is_ascii() { b } else { b'?' });
        }
        s
    }

    pub fn push_str(&mut self, s: &str) {
        for b in s.bytes() {
            self.push_byte(b);
        }
    }

    fn push_byte(&mut self, b: u8) {
        if self.buf.try_push(b).is_some() {
            self.truncated = true;
        }
    }

    pub fn as_str(&self) -> &str {
        // `push_str` can cut a multi-byte character at capacity
        match core::str::from_utf8(self.buf.as_slice()) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.buf[..e.valid_up_to()]).unwrap_or_default(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// True if some input did not fit.
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<const N: usize> defmt::Format for FixedStr<N> {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{=str}", self.as_str())
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, defmt::Format)]
pub struct Position {
    pub lat: f32,
    pub lon: f32,
}

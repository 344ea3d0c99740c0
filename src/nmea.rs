//! Line-level handling of the text side of the serial stream: splitting it into sentences
//! and framing outgoing `$...*CS` commands. No sentence grammar lives here.

use core::fmt::Write;

use tinyvec::ArrayVec;

use crate::{error::GpsError, transport::Transport, FixedStr};

/// NMEA caps sentences at 82 characters; vendor sentences run a little longer.
pub const LINE_MAX: usize = 100;

pub struct LineReader {
    buf: ArrayVec<[u8; LINE_MAX]>,
    overflowed: bool,
    complete: bool,
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            buf: ArrayVec::new(),
            overflowed: false,
            complete: false,
        }
    }

    /// Feed one byte. Returns the finished line, without its line ending, when `byte`
    /// completes one. Lines longer than `LINE_MAX` are dropped whole.
    pub fn process_byte(&mut self, byte: u8) -> Option<&[u8]> {
        if self.complete {
            self.buf.clear();
            self.complete = false;
        }

        match byte {
            b'\n' => {
                self.complete = true;
                if core::mem::take(&mut self.overflowed) {
                    return None;
                }
                let line = self.buf.as_slice();
                Some(line.strip_suffix(b"\r").unwrap_or(line))
            }
            b'$' => {
                // start of sentence, anything before it is noise
                self.buf.clear();
                self.overflowed = false;
                self.buf.push(byte);
                None
            }
            _ => {
                if self.buf.try_push(byte).is_some() {
                    self.overflowed = true;
                }
                None
            }
        }
    }
}

/// XOR of every byte between `$` and `*`.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// `$<body>*<checksum>\r\n`
pub fn sentence(body: &str) -> FixedStr<LINE_MAX> {
    let mut s = FixedStr::new();
    let _ = write!(s, "${}*{:02X}\r\n", body, checksum(body));
    s
}

/// Frame `body` and write it out. Nothing is written if the sentence does not fit.
pub fn write_sentence<T: Transport>(transport: &mut T, body: &str) -> Result<(), GpsError> {
    let s = sentence(body);
    if s.truncated() {
        defmt::warn!("nmea: sentence too long, not sent: {=str}", body);
        return Err(GpsError::PacketTooLarge(body.len()));
    }
    defmt::trace!("nmea: -> {}", s);
    transport
        .write_all(s.as_str().as_bytes())
        .and_then(|_| transport.flush())
        .map_err(|e| {
            defmt::error!("nmea: write failed: {}", defmt::Debug2Format(&e));
            GpsError::Transport
        })
}

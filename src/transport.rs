use core::fmt::Debug;

/// Serial byte stream to the GNSS chip.
///
/// `read` is non-blocking in the `nb` sense; callers impose their own deadline and spin on
/// `WouldBlock`.
pub trait Transport {
    type Error: Debug;

    fn read(&mut self) -> nb::Result<u8, Self::Error>;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    fn flush(&mut self) -> Result<(), Self::Error>;

    /// Reopen the line at a new rate. Pending input is discarded.
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), Self::Error>;
}

/// Drain everything the chip has already sent. Returns the number of bytes dropped.
pub fn clear_buffer<T: Transport>(transport: &mut T) -> usize {
    let mut dropped = 0;
    loop {
        match transport.read() {
            Ok(_) => dropped += 1,
            Err(nb::Error::WouldBlock) => break,
            Err(nb::Error::Other(e)) => {
                defmt::error!("gps: error draining uart: {}", defmt::Debug2Format(&e));
                break;
            }
        }
    }
    if dropped > 0 {
        defmt::trace!("gps: dropped {=usize} stale bytes", dropped);
    }
    dropped
}

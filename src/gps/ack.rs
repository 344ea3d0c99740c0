//! Command/acknowledgement exchange with the chip.
//!
//! Every wait has a deadline fixed when it starts. Unrelated traffic arriving in the meantime
//! is consumed and ignored, so a chip streaming NMEA at us cannot extend or end a wait.

use defmt::{debug, error, trace};

use crate::{
    error::GpsError,
    nmea::LineReader,
    time::{elapsed, Clock, Duration},
    transport::Transport,
    ubx::{ParsedPacket, SendablePacket, UbxBuf, UbxParser, UbxScratch},
};

#[derive(defmt::Format, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Nothing relevant arrived before the deadline.
    None,
    NegativeAck,
    /// Corrupt or truncated frames were seen and no ack made it through.
    FrameError,
    PositiveAck,
}

impl ResponseOutcome {
    pub fn into_result(self, class: u8, id: u8) -> Result<(), GpsError> {
        match self {
            ResponseOutcome::PositiveAck => Ok(()),
            ResponseOutcome::NegativeAck => Err(GpsError::NegativeAcknowledgment { class, id }),
            ResponseOutcome::FrameError => Err(GpsError::FrameCorruption),
            ResponseOutcome::None => Err(GpsError::NoResponse),
        }
    }
}

pub struct Arbiter {
    scratch: UbxScratch,
    parser: UbxParser,
    lines: LineReader,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Arbiter {
    pub fn new() -> Self {
        Self {
            scratch: UbxScratch::new(),
            parser: UbxParser::new(),
            lines: LineReader::new(),
        }
    }

    /// Frame `packet` and write it out. Nothing is written if it does not fit.
    pub fn send<T, P>(&mut self, transport: &mut T, packet: P) -> Result<(), GpsError>
    where
        T: Transport,
        P: SendablePacket,
    {
        let len = packet.packet_len();
        let (class, id) = (packet.class(), packet.id());
        if packet.write_into(&mut self.scratch) == 0 {
            return Err(GpsError::PacketTooLarge(len));
        }
        trace!("ubx: -> {=u8:#x}/{=u8:#x} ({=usize} bytes)", class, id, len);
        transport
            .write_all(&self.scratch)
            .and_then(|_| transport.flush())
            .map_err(|e| {
                error!("ubx: write failed: {}", defmt::Debug2Format(&e));
                GpsError::Transport
            })
    }

    /// Send `packet` and wait for the chip to ack or nak it.
    pub fn exchange<T, C, P>(
        &mut self,
        transport: &mut T,
        clock: &C,
        packet: P,
        timeout: Duration,
    ) -> ResponseOutcome
    where
        T: Transport,
        C: Clock,
        P: SendablePacket,
    {
        let (class, id) = (packet.class(), packet.id());
        if self.send(transport, packet).is_err() {
            return ResponseOutcome::None;
        }
        self.await_ack_for(transport, clock, class, id, timeout)
    }

    /// Wait for ACK-ACK or ACK-NAK naming `class`/`id`. Acks for other packets are ignored.
    pub fn await_ack_for<T, C>(
        &mut self,
        transport: &mut T,
        clock: &C,
        class: u8,
        id: u8,
        timeout: Duration,
    ) -> ResponseOutcome
    where
        T: Transport,
        C: Clock,
    {
        let start = clock.now();
        let mut saw_frame_error = false;
        self.parser.reset();

        while elapsed(clock, start) < timeout {
            let Some(b) = read_byte(transport) else {
                continue;
            };
            match self.parser.process_byte(b) {
                Some(Ok(ParsedPacket::AckAck { class: c, id: i })) if (c, i) == (class, id) => {
                    trace!("ubx: ack {=u8:#x}/{=u8:#x}", class, id);
                    return ResponseOutcome::PositiveAck;
                }
                Some(Ok(ParsedPacket::AckNak { class: c, id: i })) if (c, i) == (class, id) => {
                    debug!("ubx: nak {=u8:#x}/{=u8:#x}", class, id);
                    return ResponseOutcome::NegativeAck;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("ubx: bad frame while awaiting ack: {}", e);
                    saw_frame_error = true;
                }
                None => {}
            }
        }

        if saw_frame_error || self.parser.in_frame() {
            ResponseOutcome::FrameError
        } else {
            ResponseOutcome::None
        }
    }

    /// Wait for a frame of `class`/`id` and return its payload. Only for messages the parser
    /// does not decode itself, i.e. not ACK or NAV-PVT.
    pub fn await_message<T, C>(
        &mut self,
        transport: &mut T,
        clock: &C,
        class: u8,
        id: u8,
        timeout: Duration,
    ) -> Option<UbxBuf>
    where
        T: Transport,
        C: Clock,
    {
        let start = clock.now();
        self.parser.reset();

        while elapsed(clock, start) < timeout {
            let Some(b) = read_byte(transport) else {
                continue;
            };
            match self.parser.process_byte(b) {
                Some(Ok(ParsedPacket::Other { class: c, id: i })) if (c, i) == (class, id) => {
                    let mut buf = UbxBuf::default();
                    buf.extend_from_slice(self.parser.payload());
                    return Some(buf);
                }
                Some(Err(e)) => debug!("ubx: bad frame while awaiting message: {}", e),
                _ => {}
            }
        }
        debug!("ubx: no {=u8:#x}/{=u8:#x} within {}", class, id, timeout);
        None
    }

    /// Feed incoming text lines to `f` until it returns something or `timeout` passes.
    pub fn await_line<T, C, R>(
        &mut self,
        transport: &mut T,
        clock: &C,
        timeout: Duration,
        mut f: impl FnMut(&[u8]) -> Option<R>,
    ) -> Option<R>
    where
        T: Transport,
        C: Clock,
    {
        let start = clock.now();
        self.lines = LineReader::new();

        while elapsed(clock, start) < timeout {
            let Some(b) = read_byte(transport) else {
                continue;
            };
            if let Some(line) = self.lines.process_byte(b) {
                trace!("nmea: <- {=[u8]:a}", line);
                if let Some(r) = f(line) {
                    return Some(r);
                }
            }
        }
        None
    }

    /// Text-protocol counterpart of `await_ack_for`: any line containing `sentinel` counts
    /// as a positive ack. An empty `sentinel` is satisfied by the first complete line.
    pub fn await_ack_for_text<T, C>(
        &mut self,
        transport: &mut T,
        clock: &C,
        sentinel: &str,
        timeout: Duration,
    ) -> ResponseOutcome
    where
        T: Transport,
        C: Clock,
    {
        let needle = sentinel.as_bytes();
        let found = self.await_line(transport, clock, timeout, |line| {
            (needle.is_empty() || line.windows(needle.len()).any(|w| w == needle)).then_some(())
        });
        match found {
            Some(()) => ResponseOutcome::PositiveAck,
            None => ResponseOutcome::None,
        }
    }
}

fn read_byte<T: Transport>(transport: &mut T) -> Option<u8> {
    match transport.read() {
        Ok(b) => Some(b),
        Err(nb::Error::WouldBlock) => None,
        Err(nb::Error::Other(e)) => {
            error!("gps: uart read error: {}", defmt::Debug2Format(&e));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gps::sim::{SimChip, SimClock};
    use crate::ubx::{make_packet, packets::CfgRate, CLASS_ACK, CLASS_CFG, ID_ACK_ACK};
    use fugit::ExtU32;

    #[test]
    fn ack_for_sent_packet() {
        let clock = SimClock::new();
        let mut chip = SimChip::ublox(&clock, 9600);
        chip.set_baud_rate(9600).unwrap();
        let mut arbiter = Arbiter::new();

        let outcome = arbiter.exchange(
            &mut chip,
            &clock,
            CfgRate {
                meas_rate_ms: 1000,
                nav_rate: 1,
                time_ref: 1,
            },
            750.millis(),
        );
        assert_eq!(outcome, ResponseOutcome::PositiveAck);
        assert!(clock.now_ms() < 750);
    }

    #[test]
    fn nak_is_reported() {
        let clock = SimClock::new();
        let mut chip = SimChip::ublox(&clock, 9600).nak(CLASS_CFG, 0x08);
        chip.set_baud_rate(9600).unwrap();
        let mut arbiter = Arbiter::new();

        let outcome = arbiter.exchange(
            &mut chip,
            &clock,
            CfgRate {
                meas_rate_ms: 1000,
                nav_rate: 1,
                time_ref: 1,
            },
            750.millis(),
        );
        assert_eq!(outcome, ResponseOutcome::NegativeAck);
        assert_eq!(
            outcome.into_result(CLASS_CFG, 0x08),
            Err(GpsError::NegativeAcknowledgment {
                class: CLASS_CFG,
                id: 0x08
            })
        );
    }

    #[test]
    fn silence_waits_out_the_deadline() {
        let clock = SimClock::new();
        let mut chip = SimChip::silent(&clock);
        let mut arbiter = Arbiter::new();

        let outcome = arbiter.await_ack_for(&mut chip, &clock, CLASS_CFG, 0x08, 750.millis());
        assert_eq!(outcome, ResponseOutcome::None);
        assert!(clock.now_ms() >= 750);
    }

    #[test]
    fn unrelated_acks_are_ignored() {
        let clock = SimClock::new();
        let mut chip = SimChip::silent(&clock);
        let mut scratch = UbxScratch::new();
        make_packet(CLASS_ACK, ID_ACK_ACK, &[CLASS_CFG, 0x24], &mut scratch);
        chip.inject(&scratch);
        chip.inject(b"$GNGGA,,,,,,0,00,99.99,,,,,,*56\r\n");

        let mut arbiter = Arbiter::new();
        let outcome = arbiter.await_ack_for(&mut chip, &clock, CLASS_CFG, 0x08, 500.millis());
        assert_eq!(outcome, ResponseOutcome::None);
        assert!(clock.now_ms() >= 500);
    }

    #[test]
    fn corrupted_ack_is_a_frame_error() {
        let clock = SimClock::new();
        let mut chip = SimChip::silent(&clock);
        let mut scratch = UbxScratch::new();
        let n = make_packet(CLASS_ACK, ID_ACK_ACK, &[CLASS_CFG, 0x08], &mut scratch);
        scratch[n - 1] ^= 0x5a;
        chip.inject(&scratch);

        let mut arbiter = Arbiter::new();
        let outcome = arbiter.await_ack_for(&mut chip, &clock, CLASS_CFG, 0x08, 300.millis());
        assert_eq!(outcome, ResponseOutcome::FrameError);
        assert_eq!(outcome.into_result(CLASS_CFG, 0x08), Err(GpsError::FrameCorruption));
    }

    #[test]
    fn truncated_frame_at_deadline_is_a_frame_error() {
        let clock = SimClock::new();
        let mut chip = SimChip::silent(&clock);
        let mut scratch = UbxScratch::new();
        make_packet(CLASS_ACK, ID_ACK_ACK, &[CLASS_CFG, 0x08], &mut scratch);
        chip.inject(&scratch[..5]);

        let mut arbiter = Arbiter::new();
        let outcome = arbiter.await_ack_for(&mut chip, &clock, CLASS_CFG, 0x08, 300.millis());
        assert_eq!(outcome, ResponseOutcome::FrameError);
    }

    #[test]
    fn text_sentinel_acks() {
        let clock = SimClock::new();
        let mut chip = SimChip::silent(&clock);
        chip.inject(b"$GNGGA,,,,,,0,00,99.99,,,,,,*56\r\n$command,CFGSYS,response=OK*4C\r\n");

        let mut arbiter = Arbiter::new();
        let outcome = arbiter.await_ack_for_text(&mut chip, &clock, "response=OK", 300.millis());
        assert_eq!(outcome, ResponseOutcome::PositiveAck);
    }

    #[test]
    fn empty_text_sentinel_takes_any_line() {
        let clock = SimClock::new();
        let mut chip = SimChip::silent(&clock);
        let mut arbiter = Arbiter::new();

        let outcome = arbiter.await_ack_for_text(&mut chip, &clock, "", 100.millis());
        assert_eq!(outcome, ResponseOutcome::None);

        chip.inject(b"$GNGGA,,,,,,0,00,99.99,,,,,,*56\r\n");
        let outcome = arbiter.await_ack_for_text(&mut chip, &clock, "", 100.millis());
        assert_eq!(outcome, ResponseOutcome::PositiveAck);
    }
}

//! Simulated chip and clock for host tests.
//!
//! The clock only moves when the driver polls an empty receive buffer, one millisecond per
//! poll, so every deadline in the driver is reached deterministically and without sleeping.

use std::{
    cell::Cell,
    collections::VecDeque,
    rc::Rc,
    string::{String, ToString},
    vec::Vec,
};

use crate::{
    hooks::ChipHooks,
    nmea::LineReader,
    time::{Clock, Instant},
    transport::Transport,
    ubx::{make_packet, ParsedPacket, UbxParser, UbxScratch, CLASS_ACK, CLASS_CFG, CLASS_MON},
    ubx::{ID_ACK_ACK, ID_ACK_NAK},
};

#[derive(Clone, Default)]
pub struct SimClock(Rc<Cell<u32>>);

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u32) {
        self.0.set(self.0.get() + ms);
    }

    pub fn now_ms(&self) -> u32 {
        self.0.get()
    }
}

impl Clock for SimClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.0.get())
    }
}

#[derive(Debug)]
pub struct SimError;

#[derive(Copy, Clone, PartialEq, Eq)]
enum Personality {
    Silent,
    Ublox,
    Mtk,
    Uc6850,
}

pub struct SimChip {
    clock: SimClock,
    personality: Personality,
    answer_baud: u32,
    baud: u32,
    rx: VecDeque<u8>,
    parser: UbxParser,
    lines: LineReader,
    naks: Vec<(u8, u8)>,
    /// Acks after this many good ones are sent with a broken checksum.
    corrupt_after: Option<usize>,
    acks_sent: usize,
    protver: &'static str,
    hw_version: &'static str,

    /// Empty-payload CFG-RATE polls received, at any baud.
    pub probes: usize,
    pub baud_changes: Vec<u32>,
    /// Class/id of every well-formed UBX frame written to the chip.
    pub frames: Vec<(u8, u8)>,
    /// Id and payload of every CFG frame written to the chip.
    pub cfg_frames: Vec<(u8, Vec<u8>)>,
    /// Every text line written to the chip.
    pub sentences: Vec<String>,
    /// 0xff bytes written outside a UBX frame.
    pub wake_bytes: usize,
}

impl SimChip {
    fn with(clock: &SimClock, personality: Personality, answer_baud: u32) -> Self {
        Self {
            clock: clock.clone(),
            personality,
            answer_baud,
            baud: 9600,
            rx: VecDeque::new(),
            parser: UbxParser::new(),
            lines: LineReader::new(),
            naks: Vec::new(),
            corrupt_after: None,
            acks_sent: 0,
            protver: "18.00",
            hw_version: "00080000",
            probes: 0,
            baud_changes: Vec::new(),
            frames: Vec::new(),
            cfg_frames: Vec::new(),
            sentences: Vec::new(),
            wake_bytes: 0,
        }
    }

    /// Never says anything on its own; bytes can still be injected.
    pub fn silent(clock: &SimClock) -> Self {
        Self::with(clock, Personality::Silent, 0)
    }

    pub fn ublox(clock: &SimClock, answer_baud: u32) -> Self {
        Self::with(clock, Personality::Ublox, answer_baud)
    }

    pub fn mtk(clock: &SimClock, answer_baud: u32) -> Self {
        Self::with(clock, Personality::Mtk, answer_baud)
    }

    pub fn uc6850(clock: &SimClock, answer_baud: u32) -> Self {
        Self::with(clock, Personality::Uc6850, answer_baud)
    }

    pub fn nak(mut self, class: u8, id: u8) -> Self {
        self.naks.push((class, id));
        self
    }

    pub fn corrupt_acks(self) -> Self {
        self.corrupt_acks_after(0)
    }

    pub fn corrupt_acks_after(mut self, good: usize) -> Self {
        self.corrupt_after = Some(good);
        self
    }

    pub fn protver(mut self, protver: &'static str) -> Self {
        self.protver = protver;
        self
    }

    pub fn hw_version(mut self, hw_version: &'static str) -> Self {
        self.hw_version = hw_version;
        self
    }

    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    pub fn frames_of(&self, class: u8, id: u8) -> usize {
        self.frames.iter().filter(|&&f| f == (class, id)).count()
    }

    pub fn cfg_payloads(&self, id: u8) -> impl Iterator<Item = &[u8]> + '_ {
        self.cfg_frames
            .iter()
            .filter(move |(i, _)| *i == id)
            .map(|(_, p)| p.as_slice())
    }

    fn answering(&self) -> bool {
        self.personality != Personality::Silent && self.baud == self.answer_baud
    }

    fn on_frame(&mut self, class: u8, id: u8) {
        self.frames.push((class, id));
        if class == CLASS_CFG {
            self.cfg_frames.push((id, self.parser.payload().to_vec()));
        }
        if (class, id) == (CLASS_CFG, 0x08) && self.parser.payload().is_empty() {
            self.probes += 1;
        }
        if !self.answering() || self.personality != Personality::Ublox {
            return;
        }

        let mut scratch = UbxScratch::new();
        if class == CLASS_CFG {
            let ack_id = if self.naks.contains(&(class, id)) {
                ID_ACK_NAK
            } else {
                ID_ACK_ACK
            };
            let n = make_packet(CLASS_ACK, ack_id, &[class, id], &mut scratch);
            if self.corrupt_after.map_or(false, |good| self.acks_sent >= good) {
                scratch[n - 1] ^= 0x5a;
            }
            self.acks_sent += 1;
            self.inject(&scratch);
        } else if (class, id) == (CLASS_MON, 0x04) {
            let payload = self.mon_ver_payload();
            make_packet(CLASS_MON, 0x04, &payload, &mut scratch);
            self.inject(&scratch);
        }
    }

    fn mon_ver_payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        for (text, width) in [
            ("ROM SPG 5.10 (7b202e)", 30),
            (self.hw_version, 10),
            ("FWVER=SPG 5.10", 30),
            (&*std::format!("PROTVER={}", self.protver), 30),
        ] {
            let mut field = std::vec![0u8; width];
            field[..text.len()].copy_from_slice(text.as_bytes());
            payload.extend_from_slice(&field);
        }
        payload
    }

    fn on_sentence(&mut self, line: String) {
        if !line.starts_with('$') {
            return;
        }
        let answering = self.answering();
        let reply: Option<String> = match self.personality {
            Personality::Mtk if answering && line.starts_with("$PCAS06") => {
                Some("$GPTXT,01,01,02,SW=URANUS5,V5.3.0.0*1D\r\n".to_string())
            }
            Personality::Uc6850 if answering && line.starts_with("$PDTINFO") => {
                Some("$PDTINFO,UC6850,R3.4.0.0*2F\r\n".to_string())
            }
            Personality::Uc6850 if answering && line.starts_with("$CFG") => {
                Some(std::format!("$command,{},response=OK*00\r\n", &line[1..]))
            }
            _ => None,
        };
        self.sentences.push(line);
        if let Some(reply) = reply {
            self.inject(reply.as_bytes());
        }
    }
}

impl Transport for SimChip {
    type Error = SimError;

    fn read(&mut self) -> nb::Result<u8, SimError> {
        match self.rx.pop_front() {
            Some(b) => Ok(b),
            None => {
                self.clock.advance(1);
                Err(nb::Error::WouldBlock)
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), SimError> {
        for &b in bytes {
            if b == 0xff && !self.parser.in_frame() {
                self.wake_bytes += 1;
            }
            if let Some(Ok(packet)) = self.parser.process_byte(b) {
                match packet {
                    ParsedPacket::Other { class, id } => self.on_frame(class, id),
                    ParsedPacket::AckAck { .. }
                    | ParsedPacket::AckNak { .. }
                    | ParsedPacket::NavPvt(_) => {}
                }
            }
            let line = self
                .lines
                .process_byte(b)
                .map(|l| String::from_utf8_lossy(l).into_owned());
            if let Some(line) = line {
                self.on_sentence(line);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SimError> {
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), SimError> {
        self.baud = baud;
        self.baud_changes.push(baud);
        self.rx.clear();
        Ok(())
    }
}

/// Hooks whose answers are set by the test.
#[derive(Default)]
pub struct ScriptedHooks {
    pub time: bool,
    pub location: bool,
    pub satellites: Option<u8>,
    pub traffic: bool,
    pub idle_calls: usize,
    pub active_calls: usize,
}

impl ChipHooks for ScriptedHooks {
    fn while_idle<T: Transport>(&mut self, _transport: &mut T) -> bool {
        self.idle_calls += 1;
        self.traffic
    }

    fn while_active<T: Transport>(&mut self, _transport: &mut T) {
        self.active_calls += 1;
    }

    fn look_for_time(&mut self) -> bool {
        self.time
    }

    fn look_for_location(&mut self) -> bool {
        self.location
    }

    fn satellites(&self) -> Option<u8> {
        self.satellites
    }
}

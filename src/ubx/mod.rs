use tinyvec::ArrayVec;

pub mod cfg;
pub mod generator;
pub mod packets;
pub mod parser;

pub use generator::{make_packet, RawPacket, SendablePacket};
pub use parser::{ParsedPacket, UbxParser};

pub const SYNC_1: u8 = 0xb5;
pub const SYNC_2: u8 = 0x62;

/// Sync, class, id, and length before the payload; checksum after.
pub const HEADER_LEN: usize = 6;
pub const FRAME_OVERHEAD: usize = HEADER_LEN + 2;

pub const CLASS_NAV: u8 = 0x01;
pub const CLASS_RXM: u8 = 0x02;
pub const CLASS_ACK: u8 = 0x05;
pub const CLASS_CFG: u8 = 0x06;
pub const CLASS_MON: u8 = 0x0a;

pub const ID_ACK_NAK: u8 = 0x00;
pub const ID_ACK_ACK: u8 = 0x01;
pub const ID_NAV_PVT: u8 = 0x07;

/// Largest payload the parser will buffer. MON-VER with ten extensions is 340 bytes.
pub const UBX_BUF_SIZE: usize = 512;

/// Outgoing packets are assembled here before being written to the uart.
pub const UBX_SCRATCH_SIZE: usize = 250;
pub const MAX_PAYLOAD: usize = UBX_SCRATCH_SIZE - FRAME_OVERHEAD;

pub type UbxScratch = ArrayVec<[u8; UBX_SCRATCH_SIZE]>;

#[derive(Default, Debug, Copy, Clone)]
pub struct UbxBuf(pub ArrayVec<[u8; UBX_BUF_SIZE]>);

impl defmt::Format for UbxBuf {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{}", self.0.as_slice())
    }
}

impl core::ops::Deref for UbxBuf {
    type Target = ArrayVec<[u8; UBX_BUF_SIZE]>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::ops::DerefMut for UbxBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// 8-bit Fletcher sum over class, id, length and payload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UbxChecksum(pub u8, pub u8);
impl UbxChecksum {
    pub fn new() -> Self {
        Self(0, 0)
    }

    pub fn next(self, byte: u8) -> Self {
        let Self(a, b) = self;
        let a = a.wrapping_add(byte);
        Self(a, b.wrapping_add(a))
    }

    pub fn over(bytes: &[u8]) -> Self {
        bytes.iter().fold(Self::new(), |ck, &b| ck.next(b))
    }
}

impl Default for UbxChecksum {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq<(u8, u8)> for UbxChecksum {
    fn eq(&self, (other_a, other_b): &(u8, u8)) -> bool {
        let Self(a, b) = self;
        a == other_a && b == other_b
    }
}

#[derive(defmt::Format, Debug, Copy, Clone, PartialEq, Eq)]
pub enum UbxError {
    BadChecksum { expect: (u8, u8), saw: (u8, u8) },
    BadPayload,
    TooLarge(u16),
}

#[cfg(test)]
mod tests {
    use super::UbxChecksum;

    #[test]
    fn checksum_matches_known_frame() {
        // NAV-PVT poll: B5 62 01 07 00 00 08 19
        assert_eq!(UbxChecksum::over(&[0x01, 0x07, 0x00, 0x00]), (0x08, 0x19));
    }

    #[test]
    fn checksum_wraps_modulo_256() {
        let ck = UbxChecksum::over(&[0xff, 0xff]);
        assert_eq!(ck, (0xfe, 0xfd));
    }
}

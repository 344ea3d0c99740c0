use super::{
    packets::NavPvt, UbxBuf, UbxChecksum, UbxError, CLASS_ACK, CLASS_NAV, ID_ACK_ACK, ID_ACK_NAK,
    ID_NAV_PVT, SYNC_1, SYNC_2, UBX_BUF_SIZE,
};

// States are named for the portion of the packet which was *last received*
#[derive(Copy, Clone)]
enum ParserState {
    Start,
    Sync1,
    Sync2,
    Class {
        class: u8,
        checksum: UbxChecksum,
    },
    Id {
        class: u8,
        id: u8,
        checksum: UbxChecksum,
    },
    Len1 {
        class: u8,
        id: u8,
        len1: u8,
        checksum: UbxChecksum,
    },
    Len2 {
        class: u8,
        id: u8,
        len: u16,
        checksum: UbxChecksum,
    },
    Payload {
        class: u8,
        id: u8,
        len: u16,
        checksum: UbxChecksum,
    },
    Checksum1 {
        class: u8,
        id: u8,
        expect: UbxChecksum,
        found: u8,
    },
}
use ParserState::*;

pub struct UbxParser {
    state: ParserState,
    buf: UbxBuf,
}

impl Default for UbxParser {
    fn default() -> Self {
        Self::new()
    }
}

impl UbxParser {
    pub fn new() -> Self {
        Self {
            state: Start,
            buf: UbxBuf::default(),
        }
    }

    /// True once a sync pair has been seen and the frame has not yet completed.
    pub fn in_frame(&self) -> bool {
        !matches!(self.state, Start | Sync1)
    }

    pub fn reset(&mut self) {
        self.state = Start;
        self.buf.clear();
    }

    /// Payload of the most recently completed frame.
    pub fn payload(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Class and id echoed in an ACK-ACK / ACK-NAK payload.
    fn acked(&self) -> Result<(u8, u8), UbxError> {
        match self.buf.as_slice() {
            [class, id, ..] => Ok((*class, *id)),
            _ => Err(UbxError::BadPayload),
        }
    }

    fn feed(&mut self, b: u8) -> Option<Result<(u8, u8), UbxError>> {
        match self.state {
            Start => {
                if b == SYNC_1 {
                    self.state = Sync1;
                }
                None
            }
            Sync1 => {
                if b == SYNC_2 {
                    self.state = Sync2;
                } else if b != SYNC_1 {
                    self.state = Start;
                }
                None
            }
            Sync2 => {
                self.state = Class {
                    class: b,
                    checksum: UbxChecksum::new().next(b),
                };
                None
            }
            Class { class, checksum } => {
                self.state = Id {
                    class,
                    id: b,
                    checksum: checksum.next(b),
                };
                None
            }
            Id {
                class,
                id,
                checksum,
            } => {
                self.state = Len1 {
                    class,
                    id,
                    len1: b,
                    checksum: checksum.next(b),
                };
                None
            }
            Len1 {
                class,
                id,
                len1,
                checksum,
            } => {
                let len = (b as u16) << 8 | (len1 as u16);
                if len as usize > UBX_BUF_SIZE {
                    self.state = Start;
                    Some(Err(UbxError::TooLarge(len)))
                } else {
                    self.state = Len2 {
                        class,
                        id,
                        len,
                        checksum: checksum.next(b),
                    };
                    None
                }
            }
            Len2 {
                class,
                id,
                len,
                checksum,
            } => {
                self.buf.clear();
                if len > 0 {
                    let _ = self.buf.try_push(b);
                    self.state = Payload {
                        class,
                        id,
                        len,
                        checksum: checksum.next(b),
                    };
                } else {
                    self.state = Checksum1 {
                        class,
                        id,
                        expect: checksum,
                        found: b,
                    };
                }
                None
            }
            Payload {
                class,
                id,
                len,
                checksum,
            } => {
                if self.buf.len() == len as usize {
                    self.state = Checksum1 {
                        class,
                        id,
                        expect: checksum,
                        found: b,
                    };
                } else {
                    let _ = self.buf.try_push(b);
                    self.state = Payload {
                        class,
                        id,
                        len,
                        checksum: checksum.next(b),
                    };
                }
                None
            }
            Checksum1 {
                class,
                id,
                expect,
                found,
            } => {
                self.state = Start;
                if expect == (found, b) {
                    Some(Ok((class, id)))
                } else {
                    Some(Err(UbxError::BadChecksum {
                        expect: (expect.0, expect.1),
                        saw: (found, b),
                    }))
                }
            }
        }
    }

    pub fn process_byte(&mut self, b: u8) -> Option<Result<ParsedPacket, UbxError>> {
        self.feed(b).map(|r| {
            r.and_then(|(class, id)| match (class, id) {
                (CLASS_ACK, ID_ACK_ACK) => self
                    .acked()
                    .map(|(class, id)| ParsedPacket::AckAck { class, id }),
                (CLASS_ACK, ID_ACK_NAK) => self
                    .acked()
                    .map(|(class, id)| ParsedPacket::AckNak { class, id }),
                (CLASS_NAV, ID_NAV_PVT) => bytemuck::try_pod_read_unaligned(&self.buf)
                    .map(ParsedPacket::NavPvt)
                    .map_err(|_| UbxError::BadPayload),
                _ => Ok(ParsedPacket::Other { class, id }),
            })
        })
    }
}

#[derive(defmt::Format, Debug, Copy, Clone, PartialEq)]
pub enum ParsedPacket {
    AckAck { class: u8, id: u8 },
    AckNak { class: u8, id: u8 },

    NavPvt(NavPvt),

    /// Any other well-formed frame; its payload is available from [`UbxParser::payload`].
    Other { class: u8, id: u8 },
}

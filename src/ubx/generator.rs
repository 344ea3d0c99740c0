use super::{UbxChecksum, UbxScratch, FRAME_OVERHEAD, SYNC_1, SYNC_2, UBX_SCRATCH_SIZE};

pub trait SendablePacket: Sized {
    type I: Iterator<Item = u8>;

    fn class(&self) -> u8;
    fn id(&self) -> u8;
    fn payload_len(&self) -> usize;
    fn payload_bytes(self) -> Self::I;

    fn to_bytes(self) -> UbxGenerator<Self, Self::I> {
        UbxGenerator(Some(GeneratorState::Sync1 { packet: self }))
    }

    fn packet_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload_len()
    }

    /// Frame the packet into `scratch`, replacing its contents. Returns the frame length, or
    /// 0 with `scratch` left empty if the frame would not fit.
    fn write_into(self, scratch: &mut UbxScratch) -> usize {
        scratch.clear();
        let len = self.packet_len();
        if len > UBX_SCRATCH_SIZE {
            defmt::warn!(
                "ubx: {=u8:#x}/{=u8:#x} is {=usize} bytes, scratch holds {=usize}",
                self.class(),
                self.id(),
                len,
                UBX_SCRATCH_SIZE
            );
            return 0;
        }
        for b in self.to_bytes() {
            // cannot fail, length checked above
            let _ = scratch.try_push(b);
        }
        scratch.len()
    }
}

/// Any class/id/payload triple.
#[derive(Copy, Clone, Debug)]
pub struct RawPacket<'a> {
    pub class: u8,
    pub id: u8,
    pub payload: &'a [u8],
}

impl<'a> SendablePacket for RawPacket<'a> {
    type I = core::iter::Copied<core::slice::Iter<'a, u8>>;

    fn class(&self) -> u8 {
        self.class
    }

    fn id(&self) -> u8 {
        self.id
    }

    fn payload_len(&self) -> usize {
        self.payload.len()
    }

    fn payload_bytes(self) -> Self::I {
        self.payload.iter().copied()
    }
}

/// Build a complete UBX frame in caller-owned scratch space. Returns the frame length, or 0
/// if the payload does not fit.
pub fn make_packet(class: u8, id: u8, payload: &[u8], scratch: &mut UbxScratch) -> usize {
    RawPacket { class, id, payload }.write_into(scratch)
}

// States are named for the portion of the packet which is *about to be sent*
enum GeneratorState<T, I>
where
    T: SendablePacket<I = I>,
{
    Sync1 { packet: T },
    Sync2 { packet: T },
    Class { packet: T },
    Id { packet: T, checksum: UbxChecksum },
    Len1 { packet: T, checksum: UbxChecksum },
    Len2 { packet: T, checksum: UbxChecksum },
    Payload { iter: I, checksum: UbxChecksum },
    Checksum2 { checksum: UbxChecksum },
    Done,
}
use GeneratorState::*;

pub struct UbxGenerator<T, I>(Option<GeneratorState<T, I>>)
where
    T: SendablePacket<I = I>;

impl<T, I> UbxGenerator<T, I>
where
    T: SendablePacket<I = I>,
{
    pub fn done(&self) -> bool {
        matches!(self.0, Some(Done))
    }
}

impl<T, I> Iterator for UbxGenerator<T, I>
where
    T: SendablePacket<I = I>,
    I: Iterator<Item = u8>,
{
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        match self.0.take()? {
            Sync1 { packet } => {
                self.0 = Some(Sync2 { packet });
                Some(SYNC_1)
            }
            Sync2 { packet } => {
                self.0 = Some(Class { packet });
                Some(SYNC_2)
            }
            Class { packet } => {
                let val = packet.class();
                self.0 = Some(Id {
                    packet,
                    checksum: UbxChecksum::new().next(val),
                });
                Some(val)
            }
            Id { packet, checksum } => {
                let val = packet.id();
                self.0 = Some(Len1 {
                    packet,
                    checksum: checksum.next(val),
                });
                Some(val)
            }
            Len1 { packet, checksum } => {
                let val = (packet.payload_len() as u16).to_le_bytes()[0];
                self.0 = Some(Len2 {
                    packet,
                    checksum: checksum.next(val),
                });
                Some(val)
            }
            Len2 { packet, checksum } => {
                let val = (packet.payload_len() as u16).to_le_bytes()[1];
                self.0 = Some(Payload {
                    iter: packet.payload_bytes(),
                    checksum: checksum.next(val),
                });
                Some(val)
            }
            Payload { mut iter, checksum } => {
                if let Some(val) = iter.next() {
                    self.0 = Some(Payload {
                        iter,
                        checksum: checksum.next(val),
                    });
                    Some(val)
                } else {
                    self.0 = Some(Checksum2 { checksum });
                    Some(checksum.0)
                }
            }
            Checksum2 { checksum } => {
                self.0 = Some(Done);
                Some(checksum.1)
            }
            Done => {
                self.0 = Some(Done);
                None
            }
        }
    }
}

use thiserror::Error;

/// Everything that can go wrong talking to a GNSS chip. None of these are fatal: the driver
/// logs them and folds them into its state.
#[derive(Error, defmt::Format, Debug, Copy, Clone, PartialEq, Eq)]
pub enum GpsError {
    #[error("no response from GNSS chip")]
    NoResponse,
    #[error("GNSS chip rejected command {class:#04x}/{id:#04x}")]
    NegativeAcknowledgment { class: u8, id: u8 },
    #[error("corrupted or truncated UBX frame")]
    FrameCorruption,
    #[error("no GNSS chip answered at any baud rate")]
    ProbingExhausted,
    #[error("no serial transport for the GNSS chip")]
    TransportAbsent,
    #[error("serial transport error")]
    Transport,
    #[error("packet of {0} bytes does not fit the scratch buffer")]
    PacketTooLarge(usize),
}

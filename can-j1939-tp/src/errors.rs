//! Transport-protocol error and abort vocabulary.

/// Connection abort reasons defined by ISO 11783-3 / SAE J1939-21.
///
/// The numeric values are the on-wire byte carried in byte 1 of a connection
/// abort frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionAbortReason {
    /// Node is already engaged in a connection-mode session and cannot
    /// support another.
    AlreadyInCmSession = 1,
    /// System resources were needed for another task.
    SystemResourcesNeeded = 2,
    /// A timeout occurred (no activity within T1/Tr/T2/T3).
    Timeout = 3,
    /// A CTS was received while a data transfer was already in progress.
    ClearToSendReceivedWhileTransferInProgress = 4,
    /// The maximum number of retransmit requests was reached.
    MaximumRetransmitRequestLimitReached = 5,
    /// An unexpected data transfer packet was received.
    UnexpectedDataTransferPacketReceived = 6,
    /// A data transfer packet arrived with a sequence number other than the
    /// expected one.
    BadSequenceNumber = 7,
    /// A data transfer packet repeated the previous sequence number.
    DuplicateSequenceNumber = 8,
    /// Any other error (also used for reserved/unknown wire values).
    AnyOtherError = 250,
}

impl ConnectionAbortReason {
    /// Wire value for byte 1 of an abort frame.
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Interpret a received abort reason byte.
    ///
    /// Reserved and proprietary values collapse to [`AnyOtherError`], which
    /// is how the standard instructs receivers to treat them.
    ///
    /// [`AnyOtherError`]: ConnectionAbortReason::AnyOtherError
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => Self::AlreadyInCmSession,
            2 => Self::SystemResourcesNeeded,
            3 => Self::Timeout,
            4 => Self::ClearToSendReceivedWhileTransferInProgress,
            5 => Self::MaximumRetransmitRequestLimitReached,
            6 => Self::UnexpectedDataTransferPacketReceived,
            7 => Self::BadSequenceNumber,
            8 => Self::DuplicateSequenceNumber,
            _ => Self::AnyOtherError,
        }
    }
}

/// Errors raised while decoding a connection management frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmDecodeError {
    /// Byte 0 does not name a known connection management frame.
    UnknownMultiplexor(u8),
}

//! The message abstraction crossing the engine boundary.
//!
//! A [`CanMessage`] pairs an identifier and payload with the resolved
//! control function handles for its source and (for directed messages)
//! destination. Inbound frames are wrapped in one by the host; completed
//! reassemblies are delivered upstream as one, carrying the full payload.

use alloc::vec::Vec;

use crate::address::ControlFunctionHandle;
use crate::identifier::CanIdentifier;

/// Byte order for multi-byte field accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteFormat {
    /// Least significant byte first (the J1939 default).
    LittleEndian,
    /// Most significant byte first.
    BigEndian,
}

/// A CAN message, possibly longer than 8 data bytes.
pub struct CanMessage {
    identifier: CanIdentifier,
    data: Vec<u8>,
    source: ControlFunctionHandle,
    destination: Option<ControlFunctionHandle>,
}

impl CanMessage {
    /// Assemble a message from resolved parts. `destination` is `None` for
    /// broadcast traffic.
    pub fn new(
        identifier: CanIdentifier,
        data: Vec<u8>,
        source: ControlFunctionHandle,
        destination: Option<ControlFunctionHandle>,
    ) -> Self {
        Self {
            identifier,
            data,
            source,
            destination,
        }
    }

    /// The message identifier.
    pub fn identifier(&self) -> CanIdentifier {
        self.identifier
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes.
    pub fn data_length(&self) -> usize {
        self.data.len()
    }

    /// Handle of the originating control function.
    pub fn source_control_function(&self) -> &ControlFunctionHandle {
        &self.source
    }

    /// Handle of the receiving control function, absent for broadcast.
    pub fn destination_control_function(&self) -> Option<&ControlFunctionHandle> {
        self.destination.as_ref()
    }

    /// Whether the message is addressed to all nodes.
    pub fn is_broadcast(&self) -> bool {
        self.identifier.is_broadcast()
    }

    /// Byte at `index`, if in range.
    pub fn get_u8_at(&self, index: usize) -> Option<u8> {
        self.data.get(index).copied()
    }

    /// 16-bit field starting at `index`.
    pub fn get_u16_at(&self, index: usize, format: ByteFormat) -> Option<u16> {
        let b0 = self.get_u8_at(index)?;
        let b1 = self.get_u8_at(index + 1)?;
        Some(match format {
            ByteFormat::LittleEndian => u16::from(b0) | (u16::from(b1) << 8),
            ByteFormat::BigEndian => (u16::from(b0) << 8) | u16::from(b1),
        })
    }

    /// 24-bit field starting at `index`.
    pub fn get_u24_at(&self, index: usize, format: ByteFormat) -> Option<u32> {
        let b0 = self.get_u8_at(index)?;
        let b1 = self.get_u8_at(index + 1)?;
        let b2 = self.get_u8_at(index + 2)?;
        Some(match format {
            ByteFormat::LittleEndian => {
                u32::from(b0) | (u32::from(b1) << 8) | (u32::from(b2) << 16)
            }
            ByteFormat::BigEndian => (u32::from(b0) << 16) | (u32::from(b1) << 8) | u32::from(b2),
        })
    }
}

//! Encode and decode transport-protocol frames.
//!
//! Two parameter groups carry the protocol: connection management
//! ([`CONNECTION_MANAGEMENT_PGN`]) for the five control frames and data
//! transfer ([`DATA_TRANSFER_PGN`]) for the payload packets. Every frame is
//! exactly 8 bytes; unused bytes are padded with `0xFF`. The PGN named by a
//! control frame sits little-endian in bytes 5..=7.

use crate::errors::{CmDecodeError, ConnectionAbortReason};

/// PGN of the connection management parameter group (TP.CM).
pub const CONNECTION_MANAGEMENT_PGN: u32 = 0x00EC00;
/// PGN of the data transfer parameter group (TP.DT).
pub const DATA_TRANSFER_PGN: u32 = 0x00EB00;

/// CAN frame payload length used by the protocol.
pub const CAN_DATA_LENGTH: usize = 8;
/// Application bytes carried per data transfer frame.
pub const PROTOCOL_BYTES_PER_FRAME: usize = 7;
/// Smallest payload that requires the transport protocol.
pub const MIN_PROTOCOL_DATA_LENGTH: usize = 9;
/// Largest payload the protocol can move (255 packets of 7 bytes).
pub const MAX_PROTOCOL_DATA_LENGTH: usize = 1785;

const REQUEST_TO_SEND_MULTIPLEXOR: u8 = 0x10;
const CLEAR_TO_SEND_MULTIPLEXOR: u8 = 0x11;
const END_OF_MESSAGE_ACKNOWLEDGE_MULTIPLEXOR: u8 = 0x13;
const BROADCAST_ANNOUNCE_MULTIPLEXOR: u8 = 0x20;
const CONNECTION_ABORT_MULTIPLEXOR: u8 = 0xFF;

/// A parsed connection management frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmFrame {
    /// Request To Send: opens a destination-specific session.
    RequestToSend {
        /// Total message size in bytes.
        message_size: u16,
        /// Total number of data packets.
        total_packets: u8,
        /// Largest CTS window the sender supports.
        cts_limit: u8,
        /// PGN of the message being transported.
        pgn: u32,
    },
    /// Clear To Send: grants the sender a window of packets.
    ClearToSend {
        /// Packets the sender may transmit; zero means "hold".
        packets_to_send: u8,
        /// Sequence number the receiver expects next.
        next_packet_number: u8,
        /// PGN of the message being transported.
        pgn: u32,
    },
    /// End Of Message Acknowledgement: the receiver got everything.
    EndOfMessageAcknowledge {
        /// Total message size in bytes.
        message_size: u16,
        /// Total number of data packets.
        total_packets: u8,
        /// PGN of the message being transported.
        pgn: u32,
    },
    /// Broadcast Announce Message: opens a global session.
    BroadcastAnnounce {
        /// Total message size in bytes.
        message_size: u16,
        /// Total number of data packets.
        total_packets: u8,
        /// PGN of the message being transported.
        pgn: u32,
    },
    /// Connection abort.
    Abort {
        /// Why the session is being torn down.
        reason: ConnectionAbortReason,
        /// PGN of the message being transported.
        pgn: u32,
    },
}

fn put_pgn(buffer: &mut [u8; CAN_DATA_LENGTH], pgn: u32) {
    buffer[5] = (pgn & 0xFF) as u8;
    buffer[6] = ((pgn >> 8) & 0xFF) as u8;
    buffer[7] = ((pgn >> 16) & 0xFF) as u8;
}

fn get_pgn(data: &[u8; CAN_DATA_LENGTH]) -> u32 {
    u32::from(data[5]) | (u32::from(data[6]) << 8) | (u32::from(data[7]) << 16)
}

impl CmFrame {
    /// Serialize into an 8-byte connection management frame.
    pub fn encode(&self) -> [u8; CAN_DATA_LENGTH] {
        let mut buffer = [0xFFu8; CAN_DATA_LENGTH];
        match *self {
            Self::RequestToSend {
                message_size,
                total_packets,
                cts_limit,
                pgn,
            } => {
                buffer[0] = REQUEST_TO_SEND_MULTIPLEXOR;
                buffer[1] = (message_size & 0xFF) as u8;
                buffer[2] = (message_size >> 8) as u8;
                buffer[3] = total_packets;
                buffer[4] = cts_limit;
                put_pgn(&mut buffer, pgn);
            }
            Self::ClearToSend {
                packets_to_send,
                next_packet_number,
                pgn,
            } => {
                buffer[0] = CLEAR_TO_SEND_MULTIPLEXOR;
                buffer[1] = packets_to_send;
                buffer[2] = next_packet_number;
                put_pgn(&mut buffer, pgn);
            }
            Self::EndOfMessageAcknowledge {
                message_size,
                total_packets,
                pgn,
            } => {
                buffer[0] = END_OF_MESSAGE_ACKNOWLEDGE_MULTIPLEXOR;
                buffer[1] = (message_size & 0xFF) as u8;
                buffer[2] = (message_size >> 8) as u8;
                buffer[3] = total_packets;
                put_pgn(&mut buffer, pgn);
            }
            Self::BroadcastAnnounce {
                message_size,
                total_packets,
                pgn,
            } => {
                buffer[0] = BROADCAST_ANNOUNCE_MULTIPLEXOR;
                buffer[1] = (message_size & 0xFF) as u8;
                buffer[2] = (message_size >> 8) as u8;
                buffer[3] = total_packets;
                put_pgn(&mut buffer, pgn);
            }
            Self::Abort { reason, pgn } => {
                buffer[0] = CONNECTION_ABORT_MULTIPLEXOR;
                buffer[1] = reason.to_wire();
                put_pgn(&mut buffer, pgn);
            }
        }
        buffer
    }

    /// Parse an 8-byte connection management frame.
    pub fn decode(data: &[u8; CAN_DATA_LENGTH]) -> Result<Self, CmDecodeError> {
        let pgn = get_pgn(data);
        match data[0] {
            REQUEST_TO_SEND_MULTIPLEXOR => Ok(Self::RequestToSend {
                message_size: u16::from(data[1]) | (u16::from(data[2]) << 8),
                total_packets: data[3],
                cts_limit: data[4],
                pgn,
            }),
            CLEAR_TO_SEND_MULTIPLEXOR => Ok(Self::ClearToSend {
                packets_to_send: data[1],
                next_packet_number: data[2],
                pgn,
            }),
            END_OF_MESSAGE_ACKNOWLEDGE_MULTIPLEXOR => Ok(Self::EndOfMessageAcknowledge {
                message_size: u16::from(data[1]) | (u16::from(data[2]) << 8),
                total_packets: data[3],
                pgn,
            }),
            BROADCAST_ANNOUNCE_MULTIPLEXOR => Ok(Self::BroadcastAnnounce {
                message_size: u16::from(data[1]) | (u16::from(data[2]) << 8),
                total_packets: data[3],
                pgn,
            }),
            CONNECTION_ABORT_MULTIPLEXOR => Ok(Self::Abort {
                reason: ConnectionAbortReason::from_wire(data[1]),
                pgn,
            }),
            other => Err(CmDecodeError::UnknownMultiplexor(other)),
        }
    }
}

/// Build a data transfer frame from a sequence number and up to 7 payload
/// bytes; the remainder is padded with `0xFF`.
pub fn encode_data_transfer(sequence_number: u8, payload: &[u8]) -> [u8; CAN_DATA_LENGTH] {
    let mut buffer = [0xFFu8; CAN_DATA_LENGTH];
    buffer[0] = sequence_number;
    let len = payload.len().min(PROTOCOL_BYTES_PER_FRAME);
    buffer[1..1 + len].copy_from_slice(&payload[..len]);
    buffer
}

/// Split a data transfer frame into its sequence number and 7 payload bytes.
pub fn decode_data_transfer(data: &[u8; CAN_DATA_LENGTH]) -> (u8, &[u8]) {
    (data[0], &data[1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_announce_wire_layout() {
        let frame = CmFrame::BroadcastAnnounce {
            message_size: 17,
            total_packets: 3,
            pgn: 0x00FEEC,
        };
        assert_eq!(
            frame.encode(),
            [0x20, 0x11, 0x00, 0x03, 0xFF, 0xEC, 0xFE, 0x00]
        );
        assert_eq!(CmFrame::decode(&frame.encode()), Ok(frame));
    }

    #[test]
    fn request_to_send_wire_layout() {
        let frame = CmFrame::RequestToSend {
            message_size: 23,
            total_packets: 4,
            cts_limit: 16,
            pgn: 0x00FEEB,
        };
        assert_eq!(
            frame.encode(),
            [0x10, 0x17, 0x00, 0x04, 0x10, 0xEB, 0xFE, 0x00]
        );
        assert_eq!(CmFrame::decode(&frame.encode()), Ok(frame));
    }

    #[test]
    fn clear_to_send_wire_layout() {
        let frame = CmFrame::ClearToSend {
            packets_to_send: 2,
            next_packet_number: 3,
            pgn: 0x00FEEB,
        };
        assert_eq!(
            frame.encode(),
            [0x11, 0x02, 0x03, 0xFF, 0xFF, 0xEB, 0xFE, 0x00]
        );
        assert_eq!(CmFrame::decode(&frame.encode()), Ok(frame));
    }

    #[test]
    fn end_of_message_acknowledge_wire_layout() {
        let frame = CmFrame::EndOfMessageAcknowledge {
            message_size: 23,
            total_packets: 4,
            pgn: 0x00FEEB,
        };
        assert_eq!(
            frame.encode(),
            [0x13, 0x17, 0x00, 0x04, 0xFF, 0xEB, 0xFE, 0x00]
        );
        assert_eq!(CmFrame::decode(&frame.encode()), Ok(frame));
    }

    #[test]
    fn abort_wire_layout() {
        let frame = CmFrame::Abort {
            reason: ConnectionAbortReason::DuplicateSequenceNumber,
            pgn: 0x00FEEB,
        };
        assert_eq!(
            frame.encode(),
            [0xFF, 0x08, 0xFF, 0xFF, 0xFF, 0xEB, 0xFE, 0x00]
        );
        assert_eq!(CmFrame::decode(&frame.encode()), Ok(frame));
    }

    #[test]
    fn unknown_multiplexor_is_rejected() {
        let data = [0x21, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            CmFrame::decode(&data),
            Err(crate::errors::CmDecodeError::UnknownMultiplexor(0x21))
        );
    }

    #[test]
    fn short_final_data_frame_is_padded() {
        let frame = encode_data_transfer(3, &[0x0F, 0x10, 0x11]);
        assert_eq!(frame, [3, 0x0F, 0x10, 0x11, 0xFF, 0xFF, 0xFF, 0xFF]);
        let (sequence, payload) = decode_data_transfer(&frame);
        assert_eq!(sequence, 3);
        assert_eq!(payload, &[0x0F, 0x10, 0x11, 0xFF, 0xFF, 0xFF, 0xFF]);
    }
}

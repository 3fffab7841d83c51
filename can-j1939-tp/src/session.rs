//! Per-session state for one in-flight multi-packet transfer.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::address::{same_control_function, ControlFunctionHandle};
use crate::pdu::PROTOCOL_BYTES_PER_FRAME;

fn same_destination(
    a: Option<&ControlFunctionHandle>,
    b: Option<&ControlFunctionHandle>,
) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => same_control_function(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Which side of the transfer this node is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    /// This node is sending the payload.
    Transmit,
    /// This node is reassembling the payload.
    Receive,
}

/// State machine position of a session.
///
/// Closed sessions are removed from the store, so only live states exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// Transmit: the BAM announce frame still has to go out.
    BroadcastAnnounce,
    /// Transmit: the RTS frame still has to go out.
    RequestToSend,
    /// Transmit: RTS sent, waiting for the peer's CTS (T2/T3 applies).
    WaitForClearToSend,
    /// Transmit: emitting data frames.
    TxDataSession,
    /// Transmit: all packets out, waiting for the EOMA (T2/T3 applies).
    WaitForEndOfMessageAcknowledge,
    /// Receive: a CTS still has to go out.
    ClearToSend,
    /// Receive: collecting data frames (T1/Tr applies).
    RxDataSession,
}

/// Outcome handed to a transmit completion callback when its session closes.
pub struct TransmitResult {
    /// PGN of the transported message.
    pub parameter_group_number: u32,
    /// Payload length in bytes.
    pub message_length: u16,
    /// Sending control function.
    pub source: ControlFunctionHandle,
    /// Receiving control function, absent for broadcast.
    pub destination: Option<ControlFunctionHandle>,
    /// Whether the full payload was transferred (and, for connection mode,
    /// acknowledged).
    pub successful: bool,
}

/// Callback fired exactly once when a transmit session closes.
///
/// User context travels by closure capture; the session keeps no reference
/// back to the manager.
pub type TransmitCompleteCallback = Box<dyn FnOnce(TransmitResult)>;

/// Number of data packets needed for a payload.
pub(crate) fn total_packets_for(message_size: u16) -> u8 {
    usize::from(message_size).div_ceil(PROTOCOL_BYTES_PER_FRAME) as u8
}

/// One active transfer, keyed by (source, destination).
pub(crate) struct TransportSession<I> {
    pub direction: Direction,
    pub state: SessionState,
    pub parameter_group_number: u32,
    /// Payload buffer: written during receive, read during transmit. Always
    /// exactly `total_message_size` bytes.
    pub data: Vec<u8>,
    pub total_message_size: u16,
    /// Advertised packet count (receive) or computed packet count (transmit).
    pub total_number_of_packets: u8,
    /// Sequence number of the last packet processed, across the whole
    /// message; 0 before any packet.
    pub last_packet_number: u8,
    /// Packets processed inside the current CTS window.
    pub window_packet_count: u8,
    /// Size of the current CTS window; 0 while no window is open.
    pub cts_packet_count: u8,
    /// Upper bound for CTS windows on this session.
    pub cts_packet_count_max: u8,
    pub last_activity: I,
    pub source: ControlFunctionHandle,
    pub destination: Option<ControlFunctionHandle>,
    pub complete_callback: Option<TransmitCompleteCallback>,
}

impl<I: Copy> TransportSession<I> {
    /// Session installed by an inbound BAM or RTS.
    pub fn create_receive(
        parameter_group_number: u32,
        total_message_size: u16,
        total_number_of_packets: u8,
        cts_packet_count_max: u8,
        source: ControlFunctionHandle,
        destination: Option<ControlFunctionHandle>,
        state: SessionState,
        now: I,
    ) -> Self {
        Self {
            direction: Direction::Receive,
            state,
            parameter_group_number,
            data: alloc::vec![0; usize::from(total_message_size)],
            total_message_size,
            total_number_of_packets,
            last_packet_number: 0,
            window_packet_count: 0,
            cts_packet_count: 0,
            cts_packet_count_max,
            last_activity: now,
            source,
            destination,
            complete_callback: None,
        }
    }

    /// Session installed by a transmit submission. The payload length must
    /// already be validated against the protocol bounds.
    pub fn create_transmit(
        parameter_group_number: u32,
        data: Vec<u8>,
        cts_packet_count_max: u8,
        source: ControlFunctionHandle,
        destination: Option<ControlFunctionHandle>,
        complete_callback: Option<TransmitCompleteCallback>,
        state: SessionState,
        now: I,
    ) -> Self {
        let total_message_size = data.len() as u16;
        Self {
            direction: Direction::Transmit,
            state,
            parameter_group_number,
            data,
            total_message_size,
            total_number_of_packets: total_packets_for(total_message_size),
            last_packet_number: 0,
            window_packet_count: 0,
            cts_packet_count: 0,
            cts_packet_count_max,
            last_activity: now,
            source,
            destination,
            complete_callback,
        }
    }

    /// Whether this session is keyed by the given handles.
    pub fn matches(
        &self,
        source: &ControlFunctionHandle,
        destination: Option<&ControlFunctionHandle>,
    ) -> bool {
        same_control_function(&self.source, source)
            && same_destination(self.destination.as_ref(), destination)
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination.is_none()
    }

    /// Enter `state`, restarting the session's activity timer.
    pub fn set_state(&mut self, state: SessionState, now: I) {
        self.state = state;
        self.last_activity = now;
    }

    /// Restart the activity timer without a state change.
    pub fn touch(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Packets not yet processed.
    pub fn remaining_packets(&self) -> u8 {
        self.total_number_of_packets
            .saturating_sub(self.last_packet_number)
    }

    /// Whether every payload byte has been transferred.
    pub fn is_complete(&self) -> bool {
        usize::from(self.last_packet_number) * PROTOCOL_BYTES_PER_FRAME
            >= usize::from(self.total_message_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ControlFunction;

    #[test]
    fn packet_count_boundaries() {
        assert_eq!(total_packets_for(9), 2);
        assert_eq!(total_packets_for(14), 2);
        assert_eq!(total_packets_for(15), 3);
        assert_eq!(total_packets_for(1785), 255);
    }

    #[test]
    fn completion_is_judged_by_size() {
        let source = ControlFunction::new_external(0x01);
        let mut session = TransportSession::create_receive(
            0x00FEEC,
            17,
            3,
            0xFF,
            source,
            None,
            SessionState::RxDataSession,
            0u64,
        );
        assert_eq!(session.data.len(), 17);
        session.last_packet_number = 2;
        assert!(!session.is_complete());
        session.last_packet_number = 3;
        assert!(session.is_complete());
        assert_eq!(session.remaining_packets(), 0);
    }

    #[test]
    fn matching_uses_handle_identity() {
        let source = ControlFunction::new_internal(0x01);
        let destination = ControlFunction::new_external(0x02);
        let session = TransportSession::create_transmit(
            0x00FEEB,
            alloc::vec![0; 23],
            16,
            source.clone(),
            Some(destination.clone()),
            None,
            SessionState::RequestToSend,
            0u64,
        );
        assert_eq!(session.total_number_of_packets, 4);
        assert!(session.matches(&source, Some(&destination)));
        assert!(!session.matches(&source, None));

        let impostor = ControlFunction::new_external(0x02);
        assert!(!session.matches(&source, Some(&impostor)));
    }
}

//! The transport protocol engine.
//!
//! [`TransportProtocolManager`] owns the session store and drives every
//! state machine from two host-called entry points: [`process_message`] for
//! inbound frames and [`update`] for the periodic tick. Outbound frames go
//! through the host-provided [`FrameSink`]; completed reassemblies are
//! handed to the host's received-message callback.
//!
//! [`process_message`]: TransportProtocolManager::process_message
//! [`update`]: TransportProtocolManager::update

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cmp::min;
use core::time::Duration;

use crate::address::{ControlFunction, ControlFunctionHandle, GLOBAL_ADDRESS};
use crate::config::TransportConfig;
use crate::errors::{CmDecodeError, ConnectionAbortReason};
use crate::fmt::{debug, error, warn};
use crate::identifier::{CanIdentifier, PRIORITY_DEFAULT, PRIORITY_LOWEST};
use crate::message::CanMessage;
use crate::pdu::{
    self, CmFrame, CAN_DATA_LENGTH, CONNECTION_MANAGEMENT_PGN, DATA_TRANSFER_PGN,
    MAX_PROTOCOL_DATA_LENGTH, PROTOCOL_BYTES_PER_FRAME,
};
use crate::session::{
    Direction, SessionState, TransmitCompleteCallback, TransmitResult, TransportSession,
};
use crate::store::SessionStore;
use crate::timer::Clock;
use crate::{FrameSink, ReceivedMessageCallback};

/// Inter-frame timeout for broadcast receive sessions (closed silently).
const T1_TIMEOUT: Duration = Duration::from_millis(750);
/// Inter-frame timeout for destination-specific receive sessions.
const TR_TIMEOUT: Duration = Duration::from_millis(200);
/// Response timeout while waiting for a CTS or EOMA.
const T2_T3_TIMEOUT: Duration = Duration::from_millis(1250);

/// Engine for the ISO 11783 / J1939 multi-packet transport protocol.
///
/// The engine is single-threaded and cooperative: all mutation happens from
/// `process_message` and `update`, and neither blocks. The host must not
/// re-enter the engine from the callbacks it registers.
pub struct TransportProtocolManager<S: FrameSink, C: Clock> {
    sink: S,
    on_message_received: ReceivedMessageCallback,
    config: TransportConfig,
    clock: C,
    sessions: SessionStore<C::Instant>,
}

impl<S: FrameSink, C: Clock> TransportProtocolManager<S, C> {
    /// Create an engine around a frame sink and an upstream delivery
    /// callback.
    pub fn new(
        sink: S,
        on_message_received: impl FnMut(&CanMessage) + 'static,
        config: TransportConfig,
        clock: C,
    ) -> Self {
        let sessions = SessionStore::new(config.max_sessions);
        Self {
            sink,
            on_message_received: Box::new(on_message_received),
            config,
            clock,
            sessions,
        }
    }

    /// Whether a session keyed by (source, destination) is active.
    pub fn has_session(
        &self,
        source: &ControlFunctionHandle,
        destination: Option<&ControlFunctionHandle>,
    ) -> bool {
        self.sessions.has_session(source, destination)
    }

    /// Submit a payload for multi-packet transmission.
    ///
    /// `destination` of `None` selects broadcast (BAM); otherwise a
    /// connection-mode session is opened to the peer. Returns `false` if the
    /// payload length is outside `9..=1785`, the source is not a valid
    /// internal control function, a session for (source, destination)
    /// already exists, or the session store is full. On success the payload
    /// is owned by the session until the completion callback reports the
    /// outcome.
    pub fn protocol_transmit_message(
        &mut self,
        parameter_group_number: u32,
        data: Vec<u8>,
        source: &ControlFunctionHandle,
        destination: Option<&ControlFunctionHandle>,
        on_complete: Option<TransmitCompleteCallback>,
    ) -> bool {
        if data.len() <= CAN_DATA_LENGTH || data.len() > MAX_PROTOCOL_DATA_LENGTH {
            return false;
        }
        if !source.address_valid() || !source.is_internal() {
            return false;
        }
        if self.sessions.has_session(source, destination) {
            return false;
        }

        let now = self.clock.now();
        let state = if destination.is_none() {
            SessionState::BroadcastAnnounce
        } else {
            SessionState::RequestToSend
        };
        let session = TransportSession::create_transmit(
            parameter_group_number,
            data,
            self.config.cts_packet_count_max,
            source.clone(),
            destination.cloned(),
            on_complete,
            state,
            now,
        );
        match self.sessions.insert(session) {
            Ok(()) => {
                debug!(
                    "new tx session for {} from {}",
                    parameter_group_number,
                    source.address()
                );
                true
            }
            Err(_) => {
                warn!(
                    "rejecting transmit for {}, maximum number of sessions reached",
                    parameter_group_number
                );
                false
            }
        }
    }

    /// Borrow-and-clone convenience wrapper around
    /// [`protocol_transmit_message`].
    ///
    /// [`protocol_transmit_message`]: TransportProtocolManager::protocol_transmit_message
    pub fn protocol_transmit_slice(
        &mut self,
        parameter_group_number: u32,
        data: &[u8],
        source: &ControlFunctionHandle,
        destination: Option<&ControlFunctionHandle>,
        on_complete: Option<TransmitCompleteCallback>,
    ) -> bool {
        self.protocol_transmit_message(
            parameter_group_number,
            data.to_vec(),
            source,
            destination,
            on_complete,
        )
    }

    /// Feed an inbound message to the engine.
    ///
    /// Messages whose PGN is neither connection management nor data transfer
    /// are ignored; the host may feed its whole receive stream through here.
    pub fn process_message(&mut self, message: &CanMessage) {
        if message.destination_control_function().is_none() && !message.is_broadcast() {
            return;
        }
        match message.identifier().pgn() {
            CONNECTION_MANAGEMENT_PGN => self.process_connection_management_message(message),
            DATA_TRANSFER_PGN => self.process_data_transfer_message(message),
            _ => {}
        }
    }

    /// Advance every session: validate control functions, check timeouts,
    /// flush pending frames, pace data transfers.
    ///
    /// Call at least every ~25 ms for timely broadcast pacing.
    pub fn update(&mut self) {
        let mut index = 0;
        while index < self.sessions.len() {
            let before = self.sessions.len();
            self.update_session(index);
            // closing swaps the last (still unvisited) session into this
            // slot, so only advance when nothing was removed
            if self.sessions.len() == before {
                index += 1;
            }
        }
    }

    fn update_session(&mut self, index: usize) {
        let (source_valid, destination_valid) = {
            let session = self.sessions.get(index);
            (
                session.source.address_valid(),
                session
                    .destination
                    .as_ref()
                    .map(|destination| destination.address_valid())
                    .unwrap_or(true),
            )
        };
        if !source_valid {
            warn!("closing active session: source control function is no longer valid");
            self.close_session(index, false);
            return;
        }
        if !destination_valid {
            warn!("closing active session: destination control function is no longer valid");
            self.close_session(index, false);
            return;
        }
        self.update_state_machine(index);
    }

    fn update_state_machine(&mut self, index: usize) {
        let state = self.sessions.get(index).state;
        match state {
            SessionState::ClearToSend => {
                let granted = {
                    let session = self.sessions.get(index);
                    min(
                        session.cts_packet_count_max.max(1),
                        session.remaining_packets(),
                    )
                };
                let sent = {
                    let session = self.sessions.get(index);
                    Self::send_clear_to_send(&mut self.sink, session, granted)
                };
                if sent {
                    let now = self.clock.now();
                    let session = self.sessions.get_mut(index);
                    session.cts_packet_count = granted;
                    session.window_packet_count = 0;
                    session.set_state(SessionState::RxDataSession, now);
                }
            }
            SessionState::WaitForClearToSend | SessionState::WaitForEndOfMessageAcknowledge => {
                if self.time_expired(index, T2_T3_TIMEOUT) {
                    error!(
                        "timeout in tx session for {}",
                        self.sessions.get(index).parameter_group_number
                    );
                    self.abort_session(index, ConnectionAbortReason::Timeout);
                }
            }
            SessionState::RequestToSend => {
                let sent = {
                    let session = self.sessions.get(index);
                    Self::send_request_to_send(&mut self.sink, session)
                };
                if sent {
                    let now = self.clock.now();
                    self.sessions
                        .get_mut(index)
                        .set_state(SessionState::WaitForClearToSend, now);
                }
            }
            SessionState::BroadcastAnnounce => {
                let sent = {
                    let session = self.sessions.get(index);
                    Self::send_broadcast_announce(&mut self.sink, session)
                };
                if sent {
                    let now = self.clock.now();
                    self.sessions
                        .get_mut(index)
                        .set_state(SessionState::TxDataSession, now);
                }
            }
            SessionState::TxDataSession => {
                let pacing = {
                    let session = self.sessions.get(index);
                    session.is_broadcast()
                        && self.clock.elapsed(session.last_activity)
                            < self.config.min_bam_frame_interval
                };
                if !pacing {
                    self.send_data_transfer_packets(index);
                }
            }
            SessionState::RxDataSession => {
                if self.sessions.get(index).is_broadcast() {
                    if self.time_expired(index, T1_TIMEOUT) {
                        warn!("broadcast rx session timeout");
                        self.close_session(index, false);
                    }
                } else if self.time_expired(index, TR_TIMEOUT) {
                    error!("destination specific rx session timeout");
                    self.abort_session(index, ConnectionAbortReason::Timeout);
                }
            }
        }
    }

    fn send_data_transfer_packets(&mut self, index: usize) {
        let frames_per_update = self.config.frames_per_update;
        let mut frames_this_update: u8 = 0;

        loop {
            let frame = {
                let session = self.sessions.get(index);
                if session.last_packet_number >= session.total_number_of_packets {
                    break;
                }
                if !session.is_broadcast()
                    && session.window_packet_count >= session.cts_packet_count
                {
                    break;
                }
                let start =
                    usize::from(session.last_packet_number) * PROTOCOL_BYTES_PER_FRAME;
                let end = min(
                    start + PROTOCOL_BYTES_PER_FRAME,
                    usize::from(session.total_message_size),
                );
                pdu::encode_data_transfer(session.last_packet_number + 1, &session.data[start..end])
            };

            let accepted = {
                let session = self.sessions.get(index);
                Self::emit_frame(
                    &mut self.sink,
                    DATA_TRANSFER_PGN,
                    &frame,
                    &session.source,
                    session.destination.as_ref(),
                )
            };
            if !accepted {
                // sink backpressure; resume on the next update
                break;
            }

            let now = self.clock.now();
            let session = self.sessions.get_mut(index);
            session.last_packet_number += 1;
            session.window_packet_count += 1;
            session.touch(now);
            frames_this_update += 1;

            if session.is_broadcast() {
                // one frame per update, then wait out the inter-frame gap
                break;
            }
            if frames_this_update >= frames_per_update {
                break;
            }
        }

        let (complete, broadcast, window_exhausted, parameter_group_number) = {
            let session = self.sessions.get(index);
            (
                session.is_complete(),
                session.is_broadcast(),
                session.window_packet_count >= session.cts_packet_count,
                session.parameter_group_number,
            )
        };
        if complete {
            if broadcast {
                debug!(
                    "completed broadcast tx session for {}",
                    parameter_group_number
                );
                self.close_session(index, true);
            } else {
                let now = self.clock.now();
                self.sessions
                    .get_mut(index)
                    .set_state(SessionState::WaitForEndOfMessageAcknowledge, now);
            }
        } else if !broadcast && window_exhausted {
            let now = self.clock.now();
            self.sessions
                .get_mut(index)
                .set_state(SessionState::WaitForClearToSend, now);
        }
    }

    fn process_connection_management_message(&mut self, message: &CanMessage) {
        let data: &[u8; CAN_DATA_LENGTH] = match message.data().try_into() {
            Ok(data) => data,
            Err(_) => {
                warn!(
                    "received a connection management message of invalid length {}",
                    message.data_length()
                );
                return;
            }
        };
        let frame = match CmFrame::decode(data) {
            Ok(frame) => frame,
            Err(CmDecodeError::UnknownMultiplexor(multiplexor)) => {
                warn!(
                    "bad multiplexor {} in transport protocol connection management message",
                    multiplexor
                );
                return;
            }
        };
        let source = message.source_control_function();

        match frame {
            CmFrame::BroadcastAnnounce {
                message_size,
                total_packets,
                pgn,
            } => {
                if message.is_broadcast() {
                    self.process_broadcast_announce(source, pgn, message_size, total_packets);
                } else {
                    warn!(
                        "received a broadcast announce message with a specific destination, ignoring"
                    );
                }
            }
            CmFrame::RequestToSend {
                message_size,
                total_packets,
                cts_limit,
                pgn,
            } => {
                if message.is_broadcast() {
                    warn!("received a request to send message with a global destination, ignoring");
                    return;
                }
                let Some(destination) = message.destination_control_function() else {
                    return;
                };
                self.process_request_to_send(
                    source,
                    destination,
                    pgn,
                    message_size,
                    total_packets,
                    cts_limit,
                );
            }
            CmFrame::ClearToSend {
                packets_to_send,
                next_packet_number,
                pgn,
            } => {
                if message.is_broadcast() {
                    warn!("received a clear to send message with a global destination, ignoring");
                    return;
                }
                let Some(destination) = message.destination_control_function() else {
                    return;
                };
                self.process_clear_to_send(
                    source,
                    destination,
                    pgn,
                    packets_to_send,
                    next_packet_number,
                );
            }
            CmFrame::EndOfMessageAcknowledge { pgn, .. } => {
                if message.is_broadcast() {
                    warn!(
                        "received an end of message acknowledgement with a global destination, ignoring"
                    );
                    return;
                }
                let Some(destination) = message.destination_control_function() else {
                    return;
                };
                self.process_end_of_message_acknowledgement(source, destination, pgn);
            }
            CmFrame::Abort { reason, pgn } => {
                if message.is_broadcast() {
                    warn!("received an abort message with a global destination, ignoring");
                    return;
                }
                let Some(destination) = message.destination_control_function() else {
                    return;
                };
                self.process_abort(source, destination, pgn, reason);
            }
        }
    }

    fn process_broadcast_announce(
        &mut self,
        source: &ControlFunctionHandle,
        parameter_group_number: u32,
        total_message_size: u16,
        total_number_of_packets: u8,
    ) {
        // the standard forbids aborting to the global address, so an
        // over-capacity announce can only be dropped
        if self.sessions.is_full() {
            warn!(
                "ignoring broadcast announce message for {}, maximum number of sessions reached",
                parameter_group_number
            );
            return;
        }

        if let Some(index) = self.sessions.position(source, None) {
            warn!(
                "received broadcast announce while a session already existed for source {}, overwriting",
                source.address()
            );
            self.close_session(index, false);
        }

        let now = self.clock.now();
        let session = TransportSession::create_receive(
            parameter_group_number,
            total_message_size,
            total_number_of_packets,
            0xFF, // unused for broadcast
            source.clone(),
            None,
            SessionState::RxDataSession,
            now,
        );
        // capacity checked above
        let _ = self.sessions.insert(session);
        debug!(
            "new rx broadcast message session for {} from {}",
            parameter_group_number,
            source.address()
        );
    }

    fn process_request_to_send(
        &mut self,
        source: &ControlFunctionHandle,
        destination: &ControlFunctionHandle,
        parameter_group_number: u32,
        total_message_size: u16,
        total_number_of_packets: u8,
        cts_limit: u8,
    ) {
        if self.sessions.is_full() {
            warn!(
                "replying with abort to request to send for {}, maximum number of sessions reached",
                parameter_group_number
            );
            Self::send_abort_frame(
                &mut self.sink,
                destination,
                source,
                parameter_group_number,
                ConnectionAbortReason::AlreadyInCmSession,
            );
            return;
        }

        if let Some(index) = self.sessions.position(source, Some(destination)) {
            if self.sessions.get(index).parameter_group_number != parameter_group_number {
                error!(
                    "received request to send while a session already existed for this source and destination, aborting for {}",
                    parameter_group_number
                );
                self.abort_session(index, ConnectionAbortReason::AlreadyInCmSession);
                return;
            }
            warn!(
                "received request to send for an already active session, overwriting for {}",
                parameter_group_number
            );
            self.close_session(index, false);
        }

        let now = self.clock.now();
        let session = TransportSession::create_receive(
            parameter_group_number,
            total_message_size,
            total_number_of_packets,
            min(cts_limit, self.config.cts_packet_count_max).max(1),
            source.clone(),
            Some(destination.clone()),
            SessionState::ClearToSend,
            now,
        );
        // capacity checked above
        let _ = self.sessions.insert(session);
        debug!(
            "new rx session for {} from {}",
            parameter_group_number,
            source.address()
        );
    }

    /// A CTS travels from the receiving side back to the sender, so the
    /// matching transmit session is keyed by the *reversed* message
    /// addresses.
    fn process_clear_to_send(
        &mut self,
        source: &ControlFunctionHandle,
        destination: &ControlFunctionHandle,
        parameter_group_number: u32,
        packets_to_send: u8,
        next_packet_number: u8,
    ) {
        let Some(index) = self.sessions.position(destination, Some(source)) else {
            warn!(
                "received clear to send for {} while no session existed, sending abort",
                parameter_group_number
            );
            Self::send_abort_frame(
                &mut self.sink,
                destination,
                source,
                parameter_group_number,
                ConnectionAbortReason::AnyOtherError,
            );
            return;
        };

        let (session_pgn, last_packet_number, state) = {
            let session = self.sessions.get(index);
            (
                session.parameter_group_number,
                session.last_packet_number,
                session.state,
            )
        };
        if session_pgn != parameter_group_number {
            error!(
                "received a clear to send for {} not matching the active session, sending abort for both",
                parameter_group_number
            );
            self.abort_session(index, ConnectionAbortReason::AnyOtherError);
            Self::send_abort_frame(
                &mut self.sink,
                destination,
                source,
                parameter_group_number,
                ConnectionAbortReason::AnyOtherError,
            );
            return;
        }
        if u16::from(next_packet_number) != u16::from(last_packet_number) + 1 {
            error!(
                "received a clear to send for {} with a bad sequence number, aborting",
                parameter_group_number
            );
            self.abort_session(index, ConnectionAbortReason::BadSequenceNumber);
            return;
        }
        if state != SessionState::WaitForClearToSend {
            warn!(
                "received a clear to send for {} while not expecting one, aborting",
                parameter_group_number
            );
            self.abort_session(
                index,
                ConnectionAbortReason::ClearToSendReceivedWhileTransferInProgress,
            );
            return;
        }

        let now = self.clock.now();
        let session = self.sessions.get_mut(index);
        session.cts_packet_count = packets_to_send;
        // a zero packet count is a hold request: stay put, keepalive re-armed
        session.touch(now);
        if packets_to_send != 0 {
            session.window_packet_count = 0;
            session.set_state(SessionState::TxDataSession, now);
        }
    }

    /// Like a CTS, an EOMA flows receiver-to-sender; the lookup is reversed.
    fn process_end_of_message_acknowledgement(
        &mut self,
        source: &ControlFunctionHandle,
        destination: &ControlFunctionHandle,
        parameter_group_number: u32,
    ) {
        match self.sessions.position(destination, Some(source)) {
            Some(index) => {
                if self.sessions.get(index).state
                    == SessionState::WaitForEndOfMessageAcknowledge
                {
                    debug!(
                        "completed tx session for {} to {}",
                        parameter_group_number,
                        source.address()
                    );
                    self.close_session(index, true);
                } else {
                    // the standard mandates ignoring an unexpected EOMA
                    warn!(
                        "received an end of message acknowledgement for {} while not expecting one, ignoring",
                        parameter_group_number
                    );
                }
            }
            None => {
                warn!(
                    "received an end of message acknowledgement for {} while no session existed, sending abort",
                    parameter_group_number
                );
                Self::send_abort_frame(
                    &mut self.sink,
                    destination,
                    source,
                    parameter_group_number,
                    ConnectionAbortReason::AnyOtherError,
                );
            }
        }
    }

    fn process_abort(
        &mut self,
        source: &ControlFunctionHandle,
        destination: &ControlFunctionHandle,
        parameter_group_number: u32,
        reason: ConnectionAbortReason,
    ) {
        let mut found_session = false;

        if let Some(index) = self.sessions.position(source, Some(destination)) {
            if self.sessions.get(index).parameter_group_number == parameter_group_number {
                found_session = true;
                error!(
                    "received an abort (reason {}) for an rx session for {}",
                    reason.to_wire(),
                    parameter_group_number
                );
                self.close_session(index, false);
            }
        }
        if let Some(index) = self.sessions.position(destination, Some(source)) {
            if self.sessions.get(index).parameter_group_number == parameter_group_number {
                found_session = true;
                error!(
                    "received an abort (reason {}) for a tx session for {}",
                    reason.to_wire(),
                    parameter_group_number
                );
                self.close_session(index, false);
            }
        }

        if !found_session {
            warn!(
                "received an abort (reason {}) with no matching session for {}",
                reason.to_wire(),
                parameter_group_number
            );
        }
    }

    fn process_data_transfer_message(&mut self, message: &CanMessage) {
        let data: &[u8; CAN_DATA_LENGTH] = match message.data().try_into() {
            Ok(data) => data,
            Err(_) => {
                warn!(
                    "received a data transfer message of invalid length {}",
                    message.data_length()
                );
                return;
            }
        };

        let source = message.source_control_function();
        let destination = if message.is_broadcast() {
            None
        } else {
            message.destination_control_function()
        };
        let (sequence_number, payload) = pdu::decode_data_transfer(data);

        let Some(index) = self.sessions.position(source, destination) else {
            if !message.is_broadcast() {
                warn!(
                    "received a data transfer message from {} with no matching session, ignoring",
                    source.address()
                );
            }
            return;
        };

        let (state, last_packet_number) = {
            let session = self.sessions.get(index);
            (session.state, session.last_packet_number)
        };
        if state != SessionState::RxDataSession {
            warn!(
                "received a data transfer message from {} while not expecting one, sending abort",
                source.address()
            );
            self.abort_session(
                index,
                ConnectionAbortReason::UnexpectedDataTransferPacketReceived,
            );
            return;
        }
        if sequence_number == last_packet_number {
            error!(
                "aborting rx session for {} due to duplicate sequence number",
                self.sessions.get(index).parameter_group_number
            );
            self.abort_session(index, ConnectionAbortReason::DuplicateSequenceNumber);
            return;
        }
        if u16::from(sequence_number) != u16::from(last_packet_number) + 1 {
            error!(
                "aborting rx session for {} due to bad sequence number",
                self.sessions.get(index).parameter_group_number
            );
            self.abort_session(index, ConnectionAbortReason::BadSequenceNumber);
            return;
        }

        let now = self.clock.now();
        {
            let session = self.sessions.get_mut(index);
            let start = usize::from(session.last_packet_number) * PROTOCOL_BYTES_PER_FRAME;
            let end = min(
                start + PROTOCOL_BYTES_PER_FRAME,
                usize::from(session.total_message_size),
            );
            session.data[start..end].copy_from_slice(&payload[..end - start]);
            session.last_packet_number = sequence_number;
            session.window_packet_count += 1;
            session.touch(now);
        }

        let (complete, window_exhausted) = {
            let session = self.sessions.get(index);
            (
                session.is_complete(),
                !session.is_broadcast()
                    && session.window_packet_count >= session.cts_packet_count,
            )
        };
        if complete {
            if message.is_broadcast() {
                debug!(
                    "completed broadcast rx session for {}",
                    self.sessions.get(index).parameter_group_number
                );
            } else {
                let session = self.sessions.get(index);
                Self::send_end_of_message_acknowledgement(&mut self.sink, session);
            }
            self.deliver_and_close(index);
        } else if window_exhausted {
            // window done, request the next one on the following update
            let session = self.sessions.get_mut(index);
            session.set_state(SessionState::ClearToSend, now);
        }
    }

    /// Hand the reassembled payload upstream, then drop the session.
    fn deliver_and_close(&mut self, index: usize) {
        let mut session = self.sessions.remove_at(index);
        let destination_address = session
            .destination
            .as_ref()
            .map(|destination| destination.address())
            .unwrap_or(GLOBAL_ADDRESS);
        let identifier = CanIdentifier::new(
            PRIORITY_DEFAULT,
            session.parameter_group_number,
            destination_address,
            session.source.address(),
        );
        let data = core::mem::take(&mut session.data);
        let completed =
            CanMessage::new(identifier, data, session.source.clone(), session.destination);
        (self.on_message_received)(&completed);
        debug!("session closed");
    }

    /// Emit an abort towards the peer if our side of the session can send,
    /// then close unconditionally.
    fn abort_session(&mut self, index: usize, reason: ConnectionAbortReason) {
        {
            let session = self.sessions.get(index);
            let (ours, peer) = match session.direction {
                Direction::Transmit => (Some(&session.source), session.destination.as_ref()),
                Direction::Receive => (session.destination.as_ref(), Some(&session.source)),
            };
            if let (Some(ours), Some(peer)) = (ours, peer) {
                Self::send_abort_frame(
                    &mut self.sink,
                    ours,
                    peer,
                    session.parameter_group_number,
                    reason,
                );
            }
        }
        self.close_session(index, false);
    }

    fn close_session(&mut self, index: usize, successful: bool) {
        let mut session = self.sessions.remove_at(index);
        if session.direction == Direction::Transmit {
            if let Some(callback) = session.complete_callback.take() {
                callback(TransmitResult {
                    parameter_group_number: session.parameter_group_number,
                    message_length: session.total_message_size,
                    source: session.source.clone(),
                    destination: session.destination.clone(),
                    successful,
                });
            }
        }
        debug!("session closed");
    }

    fn time_expired(&self, index: usize, timeout: Duration) -> bool {
        self.clock.elapsed(self.sessions.get(index).last_activity) >= timeout
    }

    fn send_broadcast_announce(sink: &mut S, session: &TransportSession<C::Instant>) -> bool {
        let frame = CmFrame::BroadcastAnnounce {
            message_size: session.total_message_size,
            total_packets: session.total_number_of_packets,
            pgn: session.parameter_group_number,
        };
        Self::emit_frame(
            sink,
            CONNECTION_MANAGEMENT_PGN,
            &frame.encode(),
            &session.source,
            None,
        )
    }

    fn send_request_to_send(sink: &mut S, session: &TransportSession<C::Instant>) -> bool {
        let frame = CmFrame::RequestToSend {
            message_size: session.total_message_size,
            total_packets: session.total_number_of_packets,
            cts_limit: session.cts_packet_count_max,
            pgn: session.parameter_group_number,
        };
        Self::emit_frame(
            sink,
            CONNECTION_MANAGEMENT_PGN,
            &frame.encode(),
            &session.source,
            session.destination.as_ref(),
        )
    }

    /// We are the receiving side, so our control function is the session
    /// destination.
    fn send_clear_to_send(
        sink: &mut S,
        session: &TransportSession<C::Instant>,
        packets_to_send: u8,
    ) -> bool {
        let Some(ours) = session.destination.as_ref() else {
            return false;
        };
        let frame = CmFrame::ClearToSend {
            packets_to_send,
            next_packet_number: session.last_packet_number + 1,
            pgn: session.parameter_group_number,
        };
        Self::emit_frame(
            sink,
            CONNECTION_MANAGEMENT_PGN,
            &frame.encode(),
            ours,
            Some(&session.source),
        )
    }

    fn send_end_of_message_acknowledgement(
        sink: &mut S,
        session: &TransportSession<C::Instant>,
    ) -> bool {
        let Some(ours) = session.destination.as_ref() else {
            warn!("attempted to send an end of message acknowledgement with no destination");
            return false;
        };
        let frame = CmFrame::EndOfMessageAcknowledge {
            message_size: session.total_message_size,
            total_packets: session.total_number_of_packets,
            pgn: session.parameter_group_number,
        };
        Self::emit_frame(
            sink,
            CONNECTION_MANAGEMENT_PGN,
            &frame.encode(),
            ours,
            Some(&session.source),
        )
    }

    fn send_abort_frame(
        sink: &mut S,
        sender: &ControlFunctionHandle,
        receiver: &ControlFunctionHandle,
        parameter_group_number: u32,
        reason: ConnectionAbortReason,
    ) -> bool {
        let frame = CmFrame::Abort {
            reason,
            pgn: parameter_group_number,
        };
        Self::emit_frame(
            sink,
            CONNECTION_MANAGEMENT_PGN,
            &frame.encode(),
            sender,
            Some(receiver),
        )
    }

    /// Single choke point for outbound frames: only an internal control
    /// function may appear as the sender.
    fn emit_frame(
        sink: &mut S,
        parameter_group_number: u32,
        data: &[u8; CAN_DATA_LENGTH],
        sender: &ControlFunctionHandle,
        receiver: Option<&ControlFunctionHandle>,
    ) -> bool {
        match sender.as_ref() {
            ControlFunction::Internal(_) => sink.send_frame(
                parameter_group_number,
                data,
                sender,
                receiver,
                PRIORITY_LOWEST,
            ),
            ControlFunction::External(_) => {
                warn!("dropping a frame whose sender is not an internal control function");
                false
            }
        }
    }
}

//! Shared fixtures for the transport protocol scenario tests: a recording
//! frame sink, a manually advanced clock and inbound-frame builders.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use can_j1939_tp::pdu::{CONNECTION_MANAGEMENT_PGN, DATA_TRANSFER_PGN};
use can_j1939_tp::{
    CanIdentifier, CanMessage, Clock, ControlFunctionHandle, FrameSink, TransmitCompleteCallback,
    TransmitResult, TransportConfig, TransportProtocolManager, GLOBAL_ADDRESS, PRIORITY_LOWEST,
};

pub type TpManager = TransportProtocolManager<RecordingSink, TestClock>;

/// Manually advanced millisecond clock shared with the manager under test.
#[derive(Clone, Default)]
pub struct TestClock(Rc<Cell<u64>>);

impl TestClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, millis: u64) {
        self.0.set(self.0.get() + millis);
    }
}

impl Clock for TestClock {
    type Instant = u64;

    fn now(&self) -> u64 {
        self.0.get()
    }

    fn elapsed(&self, earlier: u64) -> Duration {
        Duration::from_millis(self.0.get().saturating_sub(earlier))
    }
}

/// One frame captured from the engine's sink.
#[derive(Clone)]
pub struct SentFrame {
    pub pgn: u32,
    pub data: [u8; 8],
    pub source: ControlFunctionHandle,
    pub destination: Option<ControlFunctionHandle>,
    pub priority: u8,
}

/// Sink that records every accepted frame and can be told to refuse.
#[derive(Clone)]
pub struct RecordingSink {
    pub frames: Rc<RefCell<Vec<SentFrame>>>,
    pub accept: Rc<Cell<bool>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            frames: Rc::new(RefCell::new(Vec::new())),
            accept: Rc::new(Cell::new(true)),
        }
    }

    /// Drain the captured frames.
    pub fn take(&self) -> Vec<SentFrame> {
        self.frames.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.borrow().is_empty()
    }
}

impl FrameSink for RecordingSink {
    fn send_frame(
        &mut self,
        pgn: u32,
        data: &[u8; 8],
        source: &ControlFunctionHandle,
        destination: Option<&ControlFunctionHandle>,
        priority: u8,
    ) -> bool {
        if !self.accept.get() {
            return false;
        }
        self.frames.borrow_mut().push(SentFrame {
            pgn,
            data: *data,
            source: source.clone(),
            destination: destination.cloned(),
            priority,
        });
        true
    }
}

/// A reassembled message captured from the upstream delivery callback.
pub struct Delivered {
    pub pgn: u32,
    pub priority: u8,
    pub source_address: u8,
    pub destination_address: u8,
    pub data: Vec<u8>,
}

pub type Received = Rc<RefCell<Vec<Delivered>>>;

/// (PGN, message length, success) per completed transmit session.
pub type CompletionLog = Rc<RefCell<Vec<(u32, u16, bool)>>>;

pub fn completion_callback(log: &CompletionLog) -> TransmitCompleteCallback {
    let log = log.clone();
    Box::new(move |result: TransmitResult| {
        log.borrow_mut().push((
            result.parameter_group_number,
            result.message_length,
            result.successful,
        ));
    })
}

pub fn manager_with_config(
    config: TransportConfig,
) -> (TpManager, RecordingSink, Received, TestClock) {
    let sink = RecordingSink::new();
    let clock = TestClock::new();
    let received: Received = Rc::new(RefCell::new(Vec::new()));
    let record = received.clone();
    let manager = TransportProtocolManager::new(
        sink.clone(),
        move |message: &CanMessage| {
            record.borrow_mut().push(Delivered {
                pgn: message.identifier().pgn(),
                priority: message.identifier().priority(),
                source_address: message.identifier().source_address(),
                // PDU2 identifiers carry no destination; report the handle
                destination_address: message
                    .destination_control_function()
                    .map(|destination| destination.address())
                    .unwrap_or(GLOBAL_ADDRESS),
                data: message.data().to_vec(),
            });
        },
        config,
        clock.clone(),
    );
    (manager, sink, received, clock)
}

pub fn manager() -> (TpManager, RecordingSink, Received, TestClock) {
    manager_with_config(TransportConfig::default())
}

fn inbound_message(
    pgn: u32,
    data: [u8; 8],
    source: &ControlFunctionHandle,
    destination: Option<&ControlFunctionHandle>,
) -> CanMessage {
    let destination_address = destination
        .map(|destination| destination.address())
        .unwrap_or(GLOBAL_ADDRESS);
    let identifier = CanIdentifier::new(PRIORITY_LOWEST, pgn, destination_address, source.address());
    CanMessage::new(identifier, data.to_vec(), source.clone(), destination.cloned())
}

/// Inbound connection management frame ready for `process_message`.
pub fn cm_message(
    data: [u8; 8],
    source: &ControlFunctionHandle,
    destination: Option<&ControlFunctionHandle>,
) -> CanMessage {
    inbound_message(CONNECTION_MANAGEMENT_PGN, data, source, destination)
}

/// Inbound data transfer frame ready for `process_message`.
pub fn dt_message(
    data: [u8; 8],
    source: &ControlFunctionHandle,
    destination: Option<&ControlFunctionHandle>,
) -> CanMessage {
    inbound_message(DATA_TRANSFER_PGN, data, source, destination)
}

/// Re-inject a captured frame into another manager, as a bus would.
pub fn forward(frame: &SentFrame, to: &mut TpManager) {
    let destination_address = frame
        .destination
        .as_ref()
        .map(|destination| destination.address())
        .unwrap_or(GLOBAL_ADDRESS);
    let identifier = CanIdentifier::new(
        frame.priority,
        frame.pgn,
        destination_address,
        frame.source.address(),
    );
    let message = CanMessage::new(
        identifier,
        frame.data.to_vec(),
        frame.source.clone(),
        frame.destination.clone(),
    );
    to.process_message(&message);
}

/// Drain one manager's sink into another manager's receive path.
pub fn pump(from: &RecordingSink, to: &mut TpManager) {
    for frame in from.take() {
        forward(&frame, to);
    }
}

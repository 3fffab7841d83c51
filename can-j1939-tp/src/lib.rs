//! `can-j1939-tp`: the ISO 11783 / SAE J1939 multi-packet transport protocol.
//!
//! Classic CAN frames carry at most 8 data bytes. The J1939 transport
//! protocol (TP) moves parameter groups of 9..=1785 bytes by fragmenting
//! them into numbered 7-byte packets, in one of two modes:
//! - **BAM** (Broadcast Announce Message): connectionless, addressed to all
//!   nodes, paced by a fixed inter-frame gap;
//! - **Connection Mode**: point-to-point, flow controlled by a
//!   Request To Send / Clear To Send / End Of Message Acknowledge handshake,
//!   torn down by connection abort frames.
//!
//! This crate provides:
//! - The protocol engine ([`TransportProtocolManager`]): session
//!   multiplexing per (source, destination) pair, the dual-mode state
//!   machine, CTS window flow control, duplicate/gap sequence detection and
//!   the protocol timeouts (T1, Tr, T2/T3).
//! - The wire codec for connection management and data transfer frames
//!   ([`pdu`]).
//! - Small supporting building blocks: control function handles
//!   ([`ControlFunction`]), 29-bit identifier packing ([`CanIdentifier`]),
//!   the message container ([`CanMessage`]) and a clock abstraction
//!   ([`Clock`]).
//!
//! The engine is transport-agnostic: it never touches a CAN driver.
//! Outbound frames go through a [`FrameSink`] the host supplies (returning
//! `false` applies backpressure; the engine retries on the next tick), and
//! inbound frames are fed in via
//! [`TransportProtocolManager::process_message`] after the host has resolved
//! the source and destination control functions. [`CanIdentifier`] converts
//! to and from `embedded_can::ExtendedId` for hosts bridging to a real bus.
//!
//! # Concurrency
//!
//! The engine is single-threaded and cooperative. All mutation happens
//! inside `process_message` and `update`; neither blocks, sleeps nor
//! yields. The host serializes calls and must not re-enter the engine from
//! the delivery or completion callbacks.
//!
//! # Quick start
//!
//! ```rust
//! use can_j1939_tp::{
//!     CanMessage, ControlFunction, ControlFunctionHandle, StdClock, TransportConfig,
//!     TransportProtocolManager,
//! };
//!
//! let received = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
//! let delivered = received.clone();
//!
//! let mut manager = TransportProtocolManager::new(
//!     // frame sink: hand frames to the CAN driver, `false` = try again later
//!     |_pgn: u32,
//!      _data: &[u8; 8],
//!      _source: &ControlFunctionHandle,
//!      _destination: Option<&ControlFunctionHandle>,
//!      _priority: u8| true,
//!     // upstream delivery of reassembled messages
//!     move |message: &CanMessage| delivered.borrow_mut().push(message.data().to_vec()),
//!     TransportConfig::default(),
//!     StdClock,
//! );
//!
//! let source = ControlFunction::new_internal(0x01);
//! let accepted = manager.protocol_transmit_message(
//!     0x00FEEC,
//!     vec![0x11; 17],
//!     &source,
//!     None, // broadcast
//!     None,
//! );
//! assert!(accepted);
//!
//! // drive the engine periodically (at least every ~25 ms)
//! manager.update();
//! // the announce frame is out; data frames follow on later ticks
//! assert!(received.borrow().is_empty());
//! ```
//!
//! # Feature flags
//! - `std` (default): enables [`StdClock`].
//! - `defmt`: route engine logging through `defmt` instead of `log`.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod address;
pub mod config;
pub mod errors;
mod fmt;
pub mod identifier;
mod manager;
pub mod message;
pub mod pdu;
mod session;
mod store;
pub mod timer;

pub use address::{
    same_control_function, ControlFunction, ControlFunctionHandle, GLOBAL_ADDRESS, NULL_ADDRESS,
};
pub use config::TransportConfig;
pub use errors::{CmDecodeError, ConnectionAbortReason};
pub use identifier::{CanIdentifier, PRIORITY_DEFAULT, PRIORITY_LOWEST};
pub use manager::TransportProtocolManager;
pub use message::{ByteFormat, CanMessage};
pub use session::{TransmitCompleteCallback, TransmitResult};
pub use timer::Clock;
#[cfg(feature = "std")]
pub use timer::StdClock;

use alloc::boxed::Box;

/// Outbound frame seam between the engine and the host's CAN driver.
///
/// `pgn` is either [`pdu::CONNECTION_MANAGEMENT_PGN`] or
/// [`pdu::DATA_TRANSFER_PGN`]; `data` is always a full 8-byte frame;
/// `destination` of `None` means the frame is addressed to all nodes.
///
/// Return `true` once the frame has been accepted for transmission. Return
/// `false` to apply backpressure: the engine keeps the session state and
/// retries on its next tick.
pub trait FrameSink {
    /// Hand one frame to the transport below.
    fn send_frame(
        &mut self,
        pgn: u32,
        data: &[u8; 8],
        source: &ControlFunctionHandle,
        destination: Option<&ControlFunctionHandle>,
        priority: u8,
    ) -> bool;
}

impl<F> FrameSink for F
where
    F: FnMut(u32, &[u8; 8], &ControlFunctionHandle, Option<&ControlFunctionHandle>, u8) -> bool,
{
    fn send_frame(
        &mut self,
        pgn: u32,
        data: &[u8; 8],
        source: &ControlFunctionHandle,
        destination: Option<&ControlFunctionHandle>,
        priority: u8,
    ) -> bool {
        self(pgn, data, source, destination, priority)
    }
}

/// Callback receiving each fully reassembled message.
///
/// Invoked synchronously from within
/// [`TransportProtocolManager::process_message`] at the moment reassembly
/// completes; the message is only valid for the duration of the call.
pub type ReceivedMessageCallback = Box<dyn FnMut(&CanMessage)>;

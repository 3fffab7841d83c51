//! Two engines wired back-to-back: payload round trips, submission
//! boundaries, and cross-engine abort observation.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use can_j1939_tp::{ControlFunction, TransportConfig};

use common::CompletionLog;

fn patterned_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn run_destination_specific_roundtrip(len: usize) {
    let (mut sender, sender_sink, _sender_received, sender_clock) = common::manager();
    let (mut receiver, receiver_sink, received, receiver_clock) = common::manager();
    let source = ControlFunction::new_internal(0x01);
    let destination = ControlFunction::new_internal(0x02);
    let payload = patterned_payload(len);
    let completions: CompletionLog = Rc::new(RefCell::new(Vec::new()));

    assert!(sender.protocol_transmit_message(
        0xFEEB,
        payload.clone(),
        &source,
        Some(&destination),
        Some(common::completion_callback(&completions)),
    ));

    let mut iterations = 0;
    while received.borrow().is_empty() || completions.borrow().is_empty() {
        iterations += 1;
        assert!(iterations < 2000, "transfer stuck");
        sender.update();
        common::pump(&sender_sink, &mut receiver);
        receiver.update();
        common::pump(&receiver_sink, &mut sender);
        sender_clock.advance(5);
        receiver_clock.advance(5);
    }

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].pgn, 0xFEEB);
    assert_eq!(received[0].data, payload);
    assert_eq!(
        completions.borrow().as_slice(),
        &[(0xFEEB, len as u16, true)]
    );
    assert!(!sender.has_session(&source, Some(&destination)));
    assert!(!receiver.has_session(&source, Some(&destination)));
}

fn run_broadcast_roundtrip(len: usize) {
    let (mut sender, sender_sink, _sender_received, sender_clock) = common::manager();
    let (mut receiver, _receiver_sink, received, receiver_clock) = common::manager();
    let source = ControlFunction::new_internal(0x01);
    let payload = patterned_payload(len);
    let completions: CompletionLog = Rc::new(RefCell::new(Vec::new()));

    assert!(sender.protocol_transmit_message(
        0xFEEC,
        payload.clone(),
        &source,
        None,
        Some(common::completion_callback(&completions)),
    ));

    let mut iterations = 0;
    while received.borrow().is_empty() || completions.borrow().is_empty() {
        iterations += 1;
        assert!(iterations < 2000, "transfer stuck");
        sender.update();
        common::pump(&sender_sink, &mut receiver);
        receiver.update();
        sender_clock.advance(50);
        receiver_clock.advance(50);
    }

    let received = received.borrow();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].pgn, 0xFEEC);
    assert_eq!(received[0].data, payload);
    assert_eq!(
        completions.borrow().as_slice(),
        &[(0xFEEC, len as u16, true)]
    );
}

#[test]
fn smallest_payload_roundtrips() {
    run_destination_specific_roundtrip(9);
    run_broadcast_roundtrip(9);
}

#[test]
fn two_window_payload_roundtrips() {
    run_destination_specific_roundtrip(23);
}

#[test]
fn mid_size_payload_roundtrips() {
    run_destination_specific_roundtrip(120);
    run_broadcast_roundtrip(120);
}

#[test]
fn largest_payload_roundtrips() {
    run_destination_specific_roundtrip(1785);
    run_broadcast_roundtrip(1785);
}

#[test]
fn submission_boundaries_are_enforced() {
    let (mut manager, _sink, _received, _clock) = common::manager();
    let source = ControlFunction::new_internal(0x01);
    let destination = ControlFunction::new_external(0x02);

    // a payload that fits a single frame does not need the protocol
    assert!(!manager.protocol_transmit_message(
        0xFEEB,
        patterned_payload(8),
        &source,
        Some(&destination),
        None,
    ));
    // one byte over the 255-packet limit
    assert!(!manager.protocol_transmit_message(
        0xFEEB,
        patterned_payload(1786),
        &source,
        Some(&destination),
        None,
    ));

    // an external control function cannot originate a transfer
    assert!(!manager.protocol_transmit_message(
        0xFEEB,
        patterned_payload(23),
        &destination,
        Some(&source),
        None,
    ));

    // nor can one whose address claim was lost
    let claimless = ControlFunction::new_internal(0x03);
    claimless.set_address_valid(false);
    assert!(!manager.protocol_transmit_message(
        0xFEEB,
        patterned_payload(23),
        &claimless,
        Some(&destination),
        None,
    ));

    // one session per (source, destination)
    assert!(manager.protocol_transmit_message(
        0xFEEB,
        patterned_payload(23),
        &source,
        Some(&destination),
        None,
    ));
    assert!(!manager.protocol_transmit_message(
        0xFEEB,
        patterned_payload(23),
        &source,
        Some(&destination),
        None,
    ));

    // the slice convenience keeps the caller's buffer and still validates
    let borrowed = patterned_payload(23);
    assert!(manager.protocol_transmit_slice(0xFEEB, &borrowed, &source, None, None));
    assert_eq!(borrowed.len(), 23);
}

#[test]
fn transmit_is_rejected_when_the_store_is_full() {
    let mut config = TransportConfig::default();
    config.max_sessions = 1;
    let (mut manager, _sink, _received, _clock) = common::manager_with_config(config);
    let source = ControlFunction::new_internal(0x01);
    let first = ControlFunction::new_external(0x02);
    let second = ControlFunction::new_external(0x03);

    assert!(manager.protocol_transmit_message(
        0xFEEB,
        patterned_payload(23),
        &source,
        Some(&first),
        None,
    ));
    assert!(!manager.protocol_transmit_message(
        0xFEEB,
        patterned_payload(23),
        &source,
        Some(&second),
        None,
    ));
}

#[test]
fn abort_on_one_side_closes_the_other() {
    let (mut sender, sender_sink, _sender_received, _sender_clock) = common::manager();
    let (mut receiver, receiver_sink, received, _receiver_clock) = common::manager();
    let source = ControlFunction::new_internal(0x01);
    let destination = ControlFunction::new_internal(0x02);
    let completions: CompletionLog = Rc::new(RefCell::new(Vec::new()));

    assert!(sender.protocol_transmit_message(
        0xFEEB,
        patterned_payload(23),
        &source,
        Some(&destination),
        Some(common::completion_callback(&completions)),
    ));

    sender.update(); // RTS
    common::pump(&sender_sink, &mut receiver);
    receiver.update(); // CTS for the whole message
    common::pump(&receiver_sink, &mut sender);
    sender.update(); // all four data frames
    let frames = sender_sink.take();
    assert_eq!(frames.len(), 4);

    // replay the first packet: the receiver must abort with reason 8
    common::forward(&frames[0], &mut receiver);
    common::forward(&frames[0], &mut receiver);
    let aborts = receiver_sink.take();
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].data, [0xFF, 0x08, 0xFF, 0xFF, 0xFF, 0xEB, 0xFE, 0x00]);
    assert!(!receiver.has_session(&source, Some(&destination)));
    assert!(received.borrow().is_empty());

    // and the abort closes the sender's half without an answer
    common::forward(&aborts[0], &mut sender);
    assert!(!sender.has_session(&source, Some(&destination)));
    assert_eq!(completions.borrow().as_slice(), &[(0xFEEB, 23, false)]);
    assert!(sender_sink.is_empty());
}

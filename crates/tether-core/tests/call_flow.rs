//! Integration tests for the tether-core call path.
//!
//! These tests drive complete request frames through the public API
//! (request builder → header decode → dispatch table → method interface →
//! reply encode → reply decode) the way the device server does.

use std::sync::Mutex;

use tether_core::protocol::messages::REQUEST_HEADER_SIZE;
use tether_core::{
    decode_reply, decode_request_header, CallOutcome, DispatchTable, MethodInterface,
    ReplyOutcome, RequestBuilder, StatusCode,
};

/// Records what the handlers saw so tests can assert on it.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(i32, i64, Vec<u8>)>>,
}

fn take_three(mi: &mut MethodInterface<'_>, rec: &Recorder) {
    let a = mi.get_parameter::<i32>();
    let b = mi.get_parameter::<i64>();
    let c = mi.get_parameter_buffer();
    let (Some(a), Some(b), Some(c)) = (a, b, c) else {
        return;
    };
    if !mi.finish_input_parameters() {
        return;
    }
    rec.seen.lock().unwrap().push((a, b, c.to_vec()));
    mi.finish_good(StatusCode::SUCCESS);
}

/// Fills 4096 bytes of capacity but reports only 120 produced.
fn short_read(mi: &mut MethodInterface<'_>, _: &Recorder) {
    if !mi.finish_input_parameters() {
        return;
    }
    let Some(buf) = mi.reserve_result_buffer(0, 4096) else {
        return;
    };
    let produced = 120;
    for (i, byte) in buf[..produced].iter_mut().enumerate() {
        *byte = i as u8;
    }
    mi.resize_last_result_buffer(produced);
    mi.finish_good(StatusCode::SUCCESS);
}

fn table() -> DispatchTable<Recorder> {
    DispatchTable::builder()
        .register("TakeThree", take_three)
        .and_then(|b| b.register("ShortRead", short_read))
        .expect("method names are valid and unique")
        .build()
}

fn call(table: &DispatchTable<Recorder>, rec: &Recorder, frame: &[u8], budget: usize) -> Vec<u8> {
    let header = decode_request_header(frame).expect("header must decode");
    let outcome = table.dispatch(&header, &frame[REQUEST_HEADER_SIZE..], budget, rec);
    outcome.encode(header.request_id)
}

#[test]
fn test_two_scalars_and_trailing_buffer_decode_exactly() {
    // Arrange
    let table = table();
    let rec = Recorder::default();
    let frame = RequestBuilder::new(1, "TakeThree")
        .s32(0x1234_5678)
        .s64(-0x0102_0304_0506_0708)
        .buffer(&[9, 8, 7, 6])
        .encode()
        .unwrap();

    // Act
    let reply = call(&table, &rec, &frame, 1024);

    // Assert
    let (reply, consumed) = decode_reply(&reply).unwrap();
    assert_eq!(consumed, tether_core::protocol::messages::REPLY_HEADER_SIZE);
    assert_eq!(reply.outcome, ReplyOutcome::Success);
    assert_eq!(
        rec.seen.lock().unwrap().as_slice(),
        &[(0x1234_5678, -0x0102_0304_0506_0708, vec![9, 8, 7, 6])]
    );
}

#[test]
fn test_resized_buffer_reply_carries_exactly_produced_bytes() {
    // Arrange
    let table = table();
    let rec = Recorder::default();
    let frame = RequestBuilder::new(2, "ShortRead").encode().unwrap();

    // Act
    let bytes = call(&table, &rec, &frame, 0x10_000);

    // Assert
    let (reply, consumed) = decode_reply(&bytes).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(reply.request_id, 2);
    assert_eq!(reply.buffers.len(), 1);
    assert_eq!(reply.buffers[0].len(), 120);
    assert_eq!(reply.buffers[0][119], 119);
}

#[test]
fn test_unknown_method_then_channel_still_usable() {
    // Arrange
    let table = table();
    let rec = Recorder::default();
    let bogus = RequestBuilder::new(3, "NoSuchMethod").encode().unwrap();
    let good = RequestBuilder::new(4, "ShortRead").encode().unwrap();

    // Act
    let first = call(&table, &rec, &bogus, 0x10_000);
    let second = call(&table, &rec, &good, 0x10_000);

    // Assert
    let (first, _) = decode_reply(&first).unwrap();
    assert_eq!(first.request_id, 3);
    assert_eq!(first.outcome, ReplyOutcome::ProtocolError);
    assert!(first.buffers.is_empty());

    let (second, _) = decode_reply(&second).unwrap();
    assert_eq!(second.outcome, ReplyOutcome::Success);
}

#[test]
fn test_budget_too_small_yields_transmit_budget_exceeded() {
    let table = table();
    let rec = Recorder::default();
    let frame = RequestBuilder::new(5, "ShortRead").encode().unwrap();

    let bytes = call(&table, &rec, &frame, 1024);

    let (reply, _) = decode_reply(&bytes).unwrap();
    assert_eq!(reply.outcome, ReplyOutcome::TransmitBudgetExceeded);
    assert!(reply.buffers.is_empty());
}

#[test]
fn test_truncated_parameter_is_protocol_error() {
    // Arrange – drop the last parameter byte but keep the header consistent
    let table = table();
    let rec = Recorder::default();
    let mut frame = RequestBuilder::new(6, "TakeThree")
        .s32(1)
        .s64(2)
        .buffer(b"abcd")
        .encode()
        .unwrap();
    frame.pop();
    let body_len = (frame.len() - REQUEST_HEADER_SIZE) as u32;
    frame[40..44].copy_from_slice(&body_len.to_le_bytes());

    // Act
    let header = decode_request_header(&frame).unwrap();
    let outcome = table.dispatch(&header, &frame[REQUEST_HEADER_SIZE..], 1024, &rec);

    // Assert
    assert!(matches!(outcome, CallOutcome::ProtocolError(_)));
    assert!(rec.seen.lock().unwrap().is_empty());
}

//! Criterion benchmarks for the Tether request/reply codec.
//!
//! The controller stream sends a packet every 2 ms and file reads move
//! multi-kilobyte buffers, so both paths should stay well under a
//! microsecond per frame.
//!
//! Run with:
//! ```bash
//! cargo bench --package tether-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tether_core::protocol::codec::{encode_reply, ParamReader};
use tether_core::protocol::controller::{ControllerPacket, ControllerState};
use tether_core::protocol::messages::REQUEST_HEADER_SIZE;
use tether_core::{decode_reply, decode_request_header, ReplyOutcome, RequestBuilder};

fn bench_request_decode(c: &mut Criterion) {
    let frame = RequestBuilder::new(1, "FSFILE_Write")
        .s32(3)
        .s64(0x1000)
        .s32(512)
        .s32(0)
        .buffer(&[0xAB; 512])
        .encode()
        .unwrap_or_default();

    c.bench_function("decode_fsfile_write_request", |b| {
        b.iter(|| {
            let header = decode_request_header(black_box(&frame)).unwrap();
            let mut params = ParamReader::new(&frame[REQUEST_HEADER_SIZE..], header.param_count);
            let handle: i32 = params.read_scalar().unwrap();
            let offset: i64 = params.read_scalar().unwrap();
            let size: i32 = params.read_scalar().unwrap();
            let flags: i32 = params.read_scalar().unwrap();
            let data = params.read_buffer().unwrap();
            black_box((handle, offset, size, flags, data.len()))
        })
    });
}

fn bench_reply_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("reply_roundtrip");
    for size in [0usize, 120, 4096, 0x8000] {
        let payload = vec![0x5Au8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                let bytes = encode_reply(7, ReplyOutcome::Success, 0, &[payload.as_slice()]);
                black_box(decode_reply(&bytes).unwrap())
            })
        });
    }
    group.finish();
}

fn bench_controller_packet(c: &mut Criterion) {
    let packet = ControllerPacket::new(1, ControllerState::default());
    c.bench_function("encode_controller_packet", |b| {
        b.iter(|| black_box(black_box(&packet).encode()))
    });
}

criterion_group!(
    benches,
    bench_request_decode,
    bench_reply_roundtrip,
    bench_controller_packet
);
criterion_main!(benches);

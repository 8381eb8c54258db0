//! Codec and reassembly benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use thermo_core::{codec, FrameReassembler, Message, Params, Request};

fn state_response() -> Vec<u8> {
    json!({
        "jsonrpc": "2.0",
        "id": 42,
        "result": {
            "desiredTemp": 24.0,
            "insideTemp": 22.5,
            "insideHumidity": 48.0,
            "systemMode": "heat",
            "fanMode": "auto",
            "pins": {"tempPin1": 6, "tempPin2": 7, "ledPin": 13}
        }
    })
    .to_string()
    .into_bytes()
}

fn encode_benchmark(c: &mut Criterion) {
    let params = json!({"desiredTemp": 25.0}).as_object().cloned().unwrap();
    let request = Request::new("setState", 1).with_params(Params::Object(params));

    c.bench_function("encode_set_state", |b| {
        b.iter(|| black_box(codec::encode_request(&request).unwrap()))
    });
}

fn decode_benchmark(c: &mut Criterion) {
    let bytes = state_response();

    c.bench_function("decode_state_response", |b| {
        b.iter(|| black_box(codec::decode(&bytes).unwrap()))
    });
}

fn reassembly_benchmark(c: &mut Criterion) {
    let bytes = state_response();

    c.bench_function("reassemble_whole", |b| {
        let mut reassembler = FrameReassembler::new();
        b.iter(|| {
            let messages: Vec<Message> = reassembler.feed(&bytes).unwrap();
            black_box(messages)
        })
    });

    c.bench_function("reassemble_16_byte_chunks", |b| {
        let mut reassembler = FrameReassembler::new();
        b.iter(|| {
            let mut count = 0;
            for chunk in bytes.chunks(16) {
                count += reassembler.feed(chunk).unwrap().len();
            }
            black_box(count)
        })
    });
}

criterion_group!(benches, encode_benchmark, decode_benchmark, reassembly_benchmark);
criterion_main!(benches);

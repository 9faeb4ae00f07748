//! Codec benchmarks for tether-protocol.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tether_protocol::{codec, ChatMessage, ServerEvent};

fn bench_decode_chat(c: &mut Criterion) {
    let frame = format!(r#"{{"type":"message","content":"{}"}}"#, "x".repeat(64));

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("chat_64B", |b| b.iter(|| codec::decode(black_box(&frame))));
    group.finish();
}

fn bench_decode_signal(c: &mut Criterion) {
    let sdp = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n".repeat(32);
    let frame = serde_json::json!({
        "type": "webrtc-signal",
        "target_user_id": "alice",
        "signal": { "type": "offer", "sdp": sdp }
    })
    .to_string();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("signal_offer", |b| {
        b.iter(|| codec::decode(black_box(&frame)))
    });
    group.finish();
}

fn bench_encode_message(c: &mut Criterion) {
    let event = ServerEvent::Message(ChatMessage {
        id: "6f1c0a52-8d1e-4a7e-9d5b-0b1c2d3e4f50".into(),
        room_id: "lobby".into(),
        user_id: "alice".into(),
        username: "Alice".into(),
        content: "x".repeat(64),
        avatar: None,
        timestamp: Utc::now(),
    });

    c.bench_function("encode_message_64B", |b| {
        b.iter(|| codec::encode(black_box(&event)).unwrap())
    });
}

criterion_group!(
    benches,
    bench_decode_chat,
    bench_decode_signal,
    bench_encode_message
);
criterion_main!(benches);

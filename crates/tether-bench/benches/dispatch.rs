//! Session dispatch benchmarks for Tether.
//!
//! These benchmarks measure the cost of handling one inbound frame, from
//! decode to delivery.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;
use tether_bench::{chat_frame, drain, populate_room, runtime};
use tether_core::{Hub, Session, SessionParams};

/// Benchmark the main inbound event kinds in a ten-member room.
fn bench_handle_frame(c: &mut Criterion) {
    let Ok(rt) = runtime() else { return };
    let mut group = c.benchmark_group("handle_frame");

    let hub = Arc::new(Hub::new());
    let mut receivers = rt.block_on(populate_room(&hub, "bench", 10));
    let (handle, mut own) = hub.open_channel();
    let mut session = rt.block_on(async {
        let params = SessionParams::new("bench", "sender").display_name("Sender");
        let mut session = Session::connect(Arc::clone(&hub), params, handle).await;
        session.open().await;
        session
    });
    drain(&mut receivers);

    let frames = [
        ("keep_alive", json!({"type": "keep_alive"}).to_string()),
        ("typing_start", json!({"type": "typing_start"}).to_string()),
        ("chat_64B", chat_frame(64)),
        (
            "webrtc_signal",
            json!({"type": "webrtc-signal", "target_user_id": "user-0", "signal": {"sdp": "v=0"}})
                .to_string(),
        ),
        ("invalid", "{not json".to_string()),
    ];

    for (name, frame) in &frames {
        group.bench_function(*name, |b| {
            b.iter(|| {
                let outcome = rt.block_on(session.handle_frame(black_box(frame)));
                drain(&mut receivers);
                while own.try_recv().is_ok() {}
                outcome
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_handle_frame);
criterion_main!(benches);

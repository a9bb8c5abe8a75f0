use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use realtime_ws::core::RealtimeMessage;
use realtime_ws::ws::EventDispatcher;

const FRAMES: usize = 1000;

fn notification_frames() -> Vec<String> {
    (0..FRAMES)
        .map(|i| {
            let kind = match i % 4 {
                0 => "notification",
                1 => "chat",
                2 => "contract_update",
                _ => "payment_update",
            };
            format!(
                r#"{{"type":"{kind}","message":"event {i}","notification_id":{i},"user_id":"u-{}","timestamp":"2024-03-01T10:00:00.000Z","data":{{"amount":{}.5,"tags":["a","b"]}}}}"#,
                i % 17,
                i * 3
            )
        })
        .collect()
}

fn bench_decode_1000_frames(c: &mut Criterion) {
    let frames = notification_frames();
    c.bench_function("decode_1000_realtime_frames", |b| {
        b.iter(|| {
            let mut ok = 0usize;
            for frame in &frames {
                if RealtimeMessage::decode(black_box(frame)).is_ok() {
                    ok += 1;
                }
            }
            black_box(ok);
        })
    });
}

fn bench_decode_and_dispatch_1000_frames(c: &mut Criterion) {
    let frames = notification_frames();
    let dispatcher = EventDispatcher::new();
    let counter = Arc::new(AtomicU64::new(0));

    let mut subscriptions = Vec::new();
    for kind in ["notification", "chat", "contract_update", "*"] {
        for _ in 0..4 {
            let counter = counter.clone();
            subscriptions.push(dispatcher.subscribe_fn(kind, move |msg| {
                counter.fetch_add(msg.kind.len() as u64, Ordering::Relaxed);
            }));
        }
    }

    c.bench_function("decode_dispatch_1000_frames_16_handlers", |b| {
        b.iter(|| {
            let mut delivered = 0usize;
            for frame in &frames {
                if let Ok(msg) = RealtimeMessage::decode(black_box(frame)) {
                    delivered += dispatcher.dispatch(&msg);
                }
            }
            black_box(delivered);
        })
    });

    let decoded: Vec<RealtimeMessage> = frames
        .iter()
        .filter_map(|frame| RealtimeMessage::decode(frame).ok())
        .collect();
    c.bench_function("dispatch_1000_decoded_16_handlers", |b| {
        b.iter(|| {
            let mut delivered = 0usize;
            for msg in &decoded {
                delivered += dispatcher.dispatch(black_box(msg));
            }
            black_box(delivered);
        })
    });

    black_box(counter.load(Ordering::Relaxed));
    drop(subscriptions);
}

criterion_group!(
    benches,
    bench_decode_1000_frames,
    bench_decode_and_dispatch_1000_frames
);
criterion_main!(benches);

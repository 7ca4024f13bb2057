//! Performance benchmarks for the messaging hot paths.
//!
//! Targets (single thread, preallocated, no contention):
//! - messenger send + receive_all + recycle: <100ns
//! - realtime-safe try_send: <50ns
//! - realtime view poll (no traffic): <20ns
//!
//! Run with: cargo bench --bench messaging

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use janus::{Messenger, RealtimeObject};

fn bench_messenger_roundtrip(c: &mut Criterion) {
    let messenger: Messenger<u64> = Messenger::new();
    messenger.preallocate(64);

    c.bench_function("messenger_send_receive_recycle", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            messenger.send(black_box(counter));
            counter += 1;
            let chain = messenger.receive_all();
            messenger.recycle(black_box(chain));
        });
    });
}

fn bench_try_send(c: &mut Criterion) {
    let messenger: Messenger<u64> = Messenger::new();
    messenger.preallocate(64);

    c.bench_function("messenger_try_send_receive_last", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            let _ = messenger.try_send(black_box(counter));
            counter += 1;
            if let Some(node) = messenger.receive_last() {
                messenger.recycle_node(black_box(node));
            }
        });
    });
}

fn bench_realtime_view(c: &mut Criterion) {
    let (object, mut view) = RealtimeObject::new(0u64);

    c.bench_function("realtime_view_poll_idle", |b| {
        b.iter(|| {
            black_box(*view.get());
        });
    });

    c.bench_function("realtime_set_then_get", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            object.set(black_box(counter));
            counter += 1;
            black_box(*view.get());
        });
    });
}

criterion_group!(
    benches,
    bench_messenger_roundtrip,
    bench_try_send,
    bench_realtime_view
);
criterion_main!(benches);

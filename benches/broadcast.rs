use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use venom_broadcast::{BroadcastChannel, ChannelConfig, MessageType};

fn channel(name: &str, process_id: u64) -> BroadcastChannel {
    let mut channel = BroadcastChannel::new(ChannelConfig {
        process_id,
        ..ChannelConfig::default()
    });
    channel.create(name, 256).expect("create broadcast channel");
    channel
}

fn bench_broadcast(c: &mut Criterion) {
    let name = format!("bench_send_{}", std::process::id());
    let mut sender = channel(&name, 1);

    let mut payload_id = 0u64;
    c.bench_function("broadcast", |b| {
        b.iter(|| {
            payload_id += 1;
            sender
                .broadcast(black_box(payload_id), MessageType::Updated)
                .expect("broadcast")
        })
    });
}

fn bench_receive(c: &mut Criterion) {
    let name = format!("bench_recv_{}", std::process::id());
    let mut sender = channel(&name, 1);
    let mut receiver = channel(&name, 2);

    c.bench_function("receive_one", |b| {
        b.iter(|| {
            sender.broadcast(1, MessageType::Created).expect("broadcast");
            black_box(
                receiver
                    .receive_broadcast(Duration::ZERO, false)
                    .expect("receive"),
            )
        })
    });

    c.bench_function("receive_idle", |b| {
        b.iter(|| {
            black_box(
                receiver
                    .receive_broadcast(Duration::ZERO, false)
                    .expect("receive"),
            )
        })
    });
}

criterion_group!(benches, bench_broadcast, bench_receive);
criterion_main!(benches);

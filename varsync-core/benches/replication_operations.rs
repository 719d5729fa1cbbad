use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use varsync_core::core_sync::{Codec, SyncMessage, WireFormat};
use varsync_core::{
    Config, MemoryMatch, Participant, ReplicatedKey, ReplicatedValue, SyncVar, ValidationStatus,
    ValueBatch,
};

fn build_match(players: usize) -> (MemoryMatch, Vec<SyncVar<i64>>) {
    let mut game = MemoryMatch::new(Config::default());
    let mut vars = Vec::with_capacity(players);
    let mut ids = Vec::with_capacity(players);
    for n in 0..players {
        let id = format!("p{}", n);
        let session = game.add_peer(Participant::new(id.clone(), id.clone())).unwrap();
        vars.push(session.register("score", 0i64).unwrap());
        ids.push(id);
    }
    for id in &ids {
        game.join(id).unwrap();
        game.pump();
    }
    (game, vars)
}

fn bench_set_and_pump(c: &mut Criterion) {
    let mut group = c.benchmark_group("replication_set_and_pump");

    for players in [2usize, 4, 8].iter() {
        group.throughput(Throughput::Elements(*players as u64));
        group.bench_with_input(BenchmarkId::new("players", players), players, |b, &n| {
            let (mut game, vars) = build_match(n);
            let mut value = 0i64;
            b.iter(|| {
                value += 1;
                vars[(value as usize) % n].set(value).unwrap();
                black_box(game.pump())
            });
        });
    }

    group.finish();
}

fn batch_of(size: usize) -> SyncMessage {
    let mut batch = ValueBatch::new();
    for i in 0..size {
        batch.push(ReplicatedValue::new(
            ReplicatedKey::shared(format!("var_{}", i)),
            i as i64,
            i as u64,
            ValidationStatus::None,
        ));
    }
    SyncMessage::Data(batch)
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("replication_codec");

    for format in [WireFormat::Json, WireFormat::Bincode] {
        let codec = Codec::new(format);
        for size in [10usize, 100, 1_000].iter() {
            let message = batch_of(*size);
            group.throughput(Throughput::Elements(*size as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("encode_{}", format), size),
                &message,
                |b, message| b.iter(|| black_box(codec.encode(message).unwrap())),
            );

            let bytes = codec.encode(&message).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("decode_{}", format), size),
                &bytes,
                |b, bytes| b.iter(|| black_box(codec.decode::<SyncMessage>(bytes).unwrap())),
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_set_and_pump, bench_codec);
criterion_main!(benches);

//! Benchmarks for building and querying the keyspace index.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use keyscope::{
    FilterConfig, GeneratedKeyspace, IndexConfig, KeyName, Matcher, MemoryStore, PipelineState,
    Session, StoreClient, Trie,
};

const KEY_COUNT: usize = 100_000;
const SEED: u64 = 0x5eed_cafe;

fn generated_names(count: usize) -> Vec<KeyName> {
    let mut store = MemoryStore::generated(&GeneratedKeyspace::new(count, SEED));
    let mut names = Vec::with_capacity(count);
    let mut cursor = 0;
    loop {
        let (next, batch) = store.scan(cursor, None, 10_000).expect("memory scan");
        names.extend(batch.into_iter().map(KeyName::decode_lossy));
        if next == 0 {
            break;
        }
        cursor = next;
    }
    names
}

fn trie_build(c: &mut Criterion) {
    let names = generated_names(KEY_COUNT);
    let mut group = c.benchmark_group("index/trie");
    group.sample_size(20);
    group.throughput(Throughput::Elements(names.len() as u64));

    group.bench_function("insert", |b| {
        b.iter(|| {
            let mut trie = Trie::new(":");
            for name in &names {
                trie.insert(name);
            }
            black_box(trie.len());
        });
    });

    group.bench_function("remove_all", |b| {
        b.iter_batched(
            || {
                let mut trie = Trie::new(":");
                for name in &names {
                    trie.insert(name);
                }
                trie
            },
            |mut trie| {
                for name in &names {
                    trie.remove(name);
                }
                black_box(trie.node_count());
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

fn fuzzy_match(c: &mut Criterion) {
    let names = generated_names(KEY_COUNT);
    let filter = FilterConfig::default();
    let mut group = c.benchmark_group("index/filter");
    group.sample_size(20);
    group.throughput(Throughput::Elements(names.len() as u64));

    for query in ["user", "u1n", "ordit"] {
        let matcher = Matcher::new(query, &filter, ":");
        group.bench_function(format!("score/{query}"), |b| {
            b.iter(|| {
                let hits = names
                    .iter()
                    .filter(|name| matcher.score(name.as_str()).is_some())
                    .count();
                black_box(hits);
            });
        });
    }
    group.finish();
}

fn full_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("index/pipeline");
    group.sample_size(10);
    group.throughput(Throughput::Elements(KEY_COUNT as u64));

    group.bench_function("scan_to_complete", |b| {
        b.iter_batched(
            || MemoryStore::generated(&GeneratedKeyspace::new(KEY_COUNT, SEED)),
            |store| {
                let (mut session, rx) =
                    Session::open(Box::new(store), IndexConfig::large_keyspace()).expect("open");
                session.refresh().expect("refresh");
                let deadline = Instant::now() + Duration::from_secs(120);
                while session.status().state != PipelineState::Complete {
                    assert!(Instant::now() < deadline, "scan did not complete");
                    while let Ok(notification) = rx.recv_timeout(Duration::from_millis(5)) {
                        session.handle(&notification);
                    }
                }
                black_box(session.key_count());
                session.teardown();
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

criterion_group!(benches, trie_build, fuzzy_match, full_scan);
criterion_main!(benches);

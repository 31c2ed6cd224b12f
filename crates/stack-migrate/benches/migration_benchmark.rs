//! Benchmarks for stack-migrate's storage and concurrency layers.
//!
//! Run with: cargo bench -p stack-migrate

#![allow(clippy::pedantic)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use stack_migrate::client::memory::MemoryStack;
use stack_migrate::client::{Query, Resource, StackClient};
use stack_migrate::concurrency::BoundedCaller;
use stack_migrate::mapper::UidMap;
use stack_migrate::modules::refs::replace_mapped_strings;
use stack_migrate::retry::RetryConfig;
use stack_migrate::store::{ChunkLimits, ChunkedJsonReader, ChunkedJsonWriter};

fn entry(i: usize) -> Value {
    json!({
        "uid": format!("blt{:016}", i),
        "title": format!("Entry {}", i),
        "locale": "en-us",
        "body": "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(8),
        "hero": {"uid": format!("asset{}", i % 50)},
        "tags": ["news", "featured"],
    })
}

/// Writing and reading back a chunked set at several chunk sizes.
fn bench_chunked_store(c: &mut Criterion) {
    let items: Vec<Value> = (0..2_000).map(entry).collect();

    let mut group = c.benchmark_group("chunked_write");
    for mb in [0.05, 0.25, 1.0] {
        group.bench_with_input(BenchmarkId::new("chunk_mb", mb), &mb, |b, &mb| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                let mut writer =
                    ChunkedJsonWriter::create(dir.path(), "index.json", ChunkLimits::megabytes(mb))
                        .unwrap()
                        .with_meta_keys(&["uid", "title"]);
                writer.write_into_file(items.iter().cloned()).unwrap();
                black_box(writer.complete_file().unwrap());
            })
        });
    }
    group.finish();

    let dir = TempDir::new().unwrap();
    let mut writer =
        ChunkedJsonWriter::create(dir.path(), "index.json", ChunkLimits::megabytes(0.25)).unwrap();
    writer.write_into_file(items.iter().cloned()).unwrap();
    writer.complete_file().unwrap();

    c.bench_function("chunked_read_all_2000", |b| {
        b.iter(|| {
            let reader = ChunkedJsonReader::open(dir.path(), "index.json")
                .unwrap()
                .unwrap();
            black_box(reader.read_all().unwrap())
        })
    });
}

/// Paging through a collection with different concurrency ceilings.
fn bench_bounded_caller(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let stack = MemoryStack::new();
    stack.seed(
        &Resource::Environment,
        (0..1_000)
            .map(|i| json!({"uid": format!("env{}", i), "name": format!("env {}", i)}))
            .collect(),
    );
    let client: Arc<dyn StackClient> = Arc::new(stack);
    let pages: Vec<Query> = (0..10).map(|i| Query::page(i * 100, 100)).collect();

    let mut group = c.benchmark_group("bounded_find");
    for concurrency in [1, 5, 10] {
        group.bench_with_input(
            BenchmarkId::new("concurrency", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| {
                    let client = Arc::clone(&client);
                    let pages = pages.clone();
                    async move {
                        let caller = BoundedCaller::new(concurrency, RetryConfig::no_retry());
                        let mut fetched = 0usize;
                        let client = &client;
                        caller
                            .run(
                                "bench find",
                                pages,
                                |page: Query| async move {
                                    client.find(&Resource::Environment, &page).await
                                },
                                |_, items: Vec<Value>| {
                                    fetched += items.len();
                                    Ok(())
                                },
                                |_, _| {},
                            )
                            .await
                            .unwrap();
                        black_box(fetched)
                    }
                })
            },
        );
    }
    group.finish();
}

/// Rewriting asset uids through an entry tree.
fn bench_reference_rewrite(c: &mut Criterion) {
    let map: UidMap = (0..50)
        .map(|i| (format!("asset{}", i), format!("bltnew{}", i)))
        .collect();
    let items: Vec<Value> = (0..500).map(entry).collect();

    c.bench_function("rewrite_assets_500_entries", |b| {
        b.iter(|| {
            let mut items = items.clone();
            let rewritten: usize = items
                .iter_mut()
                .map(|item| replace_mapped_strings(item, &map))
                .sum();
            black_box(rewritten)
        })
    });
}

criterion_group!(
    benches,
    bench_chunked_store,
    bench_bounded_caller,
    bench_reference_rewrite
);
criterion_main!(benches);

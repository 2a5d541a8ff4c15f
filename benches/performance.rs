//! Performance benchmarks for the cart store.

use cart_store::{CartConfig, CartItem, CartStore, FileStore, FileStoreConfig, MemoryStore};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tempfile::TempDir;

fn item(n: usize) -> CartItem {
    CartItem::new(format!("sku-{}", n), format!("Product {}", n), "u", 9.99)
}

fn filled_cart(size: usize) -> CartStore {
    let cart = CartStore::open(CartConfig::default(), Arc::new(MemoryStore::new())).unwrap();
    for n in 0..size {
        cart.add_to_cart(item(n)).unwrap();
    }
    cart
}

/// Benchmark mutations against carts of growing size
fn bench_mutations(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutations");

    for size in [10, 50, 200] {
        group.bench_with_input(BenchmarkId::new("increment", size), &size, |b, &size| {
            let cart = filled_cart(size);
            let id = format!("sku-{}", size / 2);
            b.iter(|| cart.increment(black_box(&id)).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("readd", size), &size, |b, &size| {
            let cart = filled_cart(size);
            b.iter(|| cart.add_to_cart(black_box(item(0))).unwrap());
        });
    }

    group.finish();
}

/// Benchmark write-through to the file store
fn bench_file_persist(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_persist");
    group.sample_size(20);

    for size in [10, 100] {
        group.bench_with_input(BenchmarkId::new("increment", size), &size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let storage = FileStore::open(FileStoreConfig {
                path: dir.path().join("cart"),
                create_if_missing: true,
            })
            .unwrap();
            let cart = CartStore::open(CartConfig::default(), Arc::new(storage)).unwrap();
            for n in 0..size {
                cart.add_to_cart(item(n)).unwrap();
            }
            b.iter(|| cart.increment(black_box("sku-0")).unwrap());
        });
    }

    group.finish();
}

/// Benchmark loading a persisted cart
fn bench_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("open");

    for size in [10, 200] {
        group.bench_with_input(BenchmarkId::new("memory", size), &size, |b, &size| {
            let backend = Arc::new(MemoryStore::new());
            {
                let cart = CartStore::open(CartConfig::default(), backend.clone()).unwrap();
                for n in 0..size {
                    cart.add_to_cart(item(n)).unwrap();
                }
            }
            b.iter(|| {
                let cart = CartStore::open(CartConfig::default(), backend.clone()).unwrap();
                black_box(cart.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mutations, bench_file_persist, bench_open);
criterion_main!(benches);

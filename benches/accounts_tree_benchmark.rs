use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use tempfile::tempdir;

use emberchain::core::{Account, Balance};
use emberchain::crypto::Address;
use emberchain::storage::{AccountsTree, RocksDBStore};

fn addresses(count: u32) -> Vec<Address> {
    (0..count)
        .map(|i| {
            let mut bytes = [0u8; 20];
            bytes[..4].copy_from_slice(&i.wrapping_mul(2_654_435_761).to_be_bytes());
            Address::new(bytes)
        })
        .collect()
}

fn filled_tree(addresses: &[Address]) -> AccountsTree {
    let mut tree = AccountsTree::volatile().unwrap();
    for (i, address) in addresses.iter().enumerate() {
        tree.put(address, Account::new(Balance::new(i as u64 + 1, 0))).unwrap();
    }
    tree
}

/// Benchmark for inserting accounts into an in-memory tree
fn bench_volatile_put(c: &mut Criterion) {
    let addresses = addresses(1000);
    c.bench_function("volatile_put_1000", |b| {
        b.iter(|| black_box(filled_tree(&addresses)))
    });
}

/// Benchmark for looking up an account
fn bench_get(c: &mut Criterion) {
    let addresses = addresses(1000);
    let tree = filled_tree(&addresses);
    c.bench_function("get", |b| {
        b.iter(|| tree.get(black_box(&addresses[500])).unwrap())
    });
}

/// Benchmark for a block-sized batch committed to RocksDB
fn bench_persistent_transaction(c: &mut Criterion) {
    let temp_dir = tempdir().unwrap();
    let kv = Arc::new(RocksDBStore::new(temp_dir.path()).unwrap());
    let mut tree = AccountsTree::persistent(kv).unwrap();
    let addresses = addresses(100);
    let mut round = 0u64;

    c.bench_function("persistent_commit_100", |b| {
        b.iter_batched(
            || {
                round += 1;
                round
            },
            |value| {
                let mut tx = tree.transaction().unwrap();
                for address in &addresses {
                    tx.put(address, Account::new(Balance::new(value, 0))).unwrap();
                }
                tx.commit().unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

/// Benchmark for exporting and re-populating a tree
fn bench_export_populate(c: &mut Criterion) {
    let tree = filled_tree(&addresses(1000));
    let nodes = tree.export().unwrap();
    c.bench_function("populate_1000", |b| {
        b.iter(|| {
            let mut copy = AccountsTree::volatile().unwrap();
            copy.populate(black_box(&nodes)).unwrap();
            copy
        })
    });
}

criterion_group!(
    benches,
    bench_volatile_put,
    bench_get,
    bench_persistent_transaction,
    bench_export_populate
);
criterion_main!(benches);

#![allow(missing_docs)]

use braid_consensus_crypto::{
    ed25519::{SecretKey, Signature},
    keccak256::Keccak256,
};
use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;
use std::iter::repeat_with;

/// Verifying a quorum certificate boils down to checking one ed25519
/// signature per signer over the same digest.
fn bench_quorum_verification(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let mut group = c.benchmark_group("ed25519");
    let sks: Vec<SecretKey> = repeat_with(|| rng.gen::<SecretKey>()).take(100).collect();
    let digest = Keccak256::new(&rng.gen::<[u8; 32]>());
    let sigs: Vec<Signature> = sks.iter().map(|k| k.sign(digest.as_bytes())).collect();
    group.bench_function("100 sig verification", |b| {
        b.iter(|| {
            for (sk, sig) in sks.iter().zip(&sigs) {
                sk.public().verify(digest.as_bytes(), sig).unwrap();
            }
        });
    });
    group.finish();
}

fn bench_keccak256(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let payload: Vec<u8> = repeat_with(|| rng.gen::<u8>()).take(4096).collect();
    c.bench_function("keccak256 4KiB", |b| b.iter(|| Keccak256::new(&payload)));
}

criterion_group!(benches, bench_quorum_verification, bench_keccak256);
criterion_main!(benches);

use cc_crypto::{make_address, sha512_id, sighash_from_public_key};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_address_derivation(c: &mut Criterion) {
    c.bench_function("sha512_id", |b| {
        b.iter(|| sha512_id(black_box("bitcoinmvjr4kdzdx7nzjl87xx5fnstp1tttbgvq2testnet")))
    });

    c.bench_function("make_address", |b| {
        b.iter(|| make_address(black_box("1000"), black_box("ethereum0xdeadbeefrinkeby")))
    });

    let uncompressed = format!("04{}{}", "ab".repeat(32), "cd".repeat(32));
    c.bench_function("sighash_from_uncompressed", |b| {
        b.iter(|| sighash_from_public_key(black_box(&uncompressed)))
    });
}

criterion_group!(benches, bench_address_derivation);
criterion_main!(benches);

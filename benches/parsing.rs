use criterion::{criterion_group, criterion_main, Criterion};
use std::path::Path;

use minimail::parser::mime::decode_message;
use minimail::rules::{self, RuleOptions};

fn read_fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(path).unwrap()
}

fn bench_decode(c: &mut Criterion) {
    let raw = read_fixture("usps_digest.eml");

    c.bench_function("decode_usps_digest", |b| {
        b.iter(|| decode_message(&raw).unwrap())
    });
}

fn bench_route(c: &mut Criterion) {
    let options = RuleOptions::default();
    let digest = decode_message(&read_fixture("usps_digest.eml")).unwrap();
    let amazon = decode_message(&read_fixture("amazon_delivered.eml")).unwrap();

    c.bench_function("route_usps_digest", |b| {
        b.iter(|| rules::route(&digest, &[], &options))
    });
    c.bench_function("route_amazon_delivered", |b| {
        b.iter(|| rules::route(&amazon, &[], &options))
    });
}

criterion_group!(benches, bench_decode, bench_route);
criterion_main!(benches);

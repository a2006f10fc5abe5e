use criterion::{black_box, criterion_group, criterion_main, Criterion};

use clustershell::nodeset::NodeSet;

fn parse_large_set(c: &mut Criterion) {
    c.bench_function("nodeset_parse_10k_range", |b| {
        b.iter(|| black_box(NodeSet::parse("node[0-9999]").unwrap()));
    });
}

fn fold_two_dimensional(c: &mut Criterion) {
    let ns = NodeSet::parse("node[0-999]-ib[0-1]").unwrap();
    c.bench_function("nodeset_fold_2d_2000", |b| {
        b.iter(|| black_box(ns.fold()));
    });
}

fn intersection_overlapping(c: &mut Criterion) {
    let a = NodeSet::parse("node[0-4999]").unwrap();
    let b = NodeSet::parse("node[2500-7499]").unwrap();
    c.bench_function("nodeset_intersection_5k_overlap", |bencher| {
        bencher.iter(|| black_box(a.intersection(&b).unwrap()));
    });
}

criterion_group!(benches, parse_large_set, fold_two_dimensional, intersection_overlapping);
criterion_main!(benches);

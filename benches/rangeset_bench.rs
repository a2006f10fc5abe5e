use criterion::{black_box, criterion_group, criterion_main, Criterion};

use clustershell::rangeset::RangeSet;

fn fold_large_range(c: &mut Criterion) {
    let rs = RangeSet::from_range(0, 9_999, 1, 0).unwrap();
    c.bench_function("rangeset_fold_10k_contiguous", |b| {
        b.iter(|| black_box(rs.fold()));
    });
}

fn parse_comma_separated(c: &mut Criterion) {
    let literal: String = (0..1000).map(|n| n.to_string()).collect::<Vec<_>>().join(",");
    c.bench_function("rangeset_parse_1000_singletons", |b| {
        b.iter(|| black_box(RangeSet::parse(&literal).unwrap()));
    });
}

fn union_disjoint(c: &mut Criterion) {
    let a = RangeSet::from_range(0, 4_999, 1, 0).unwrap();
    let b = RangeSet::from_range(5_000, 9_999, 1, 0).unwrap();
    c.bench_function("rangeset_union_disjoint_10k", |bencher| {
        bencher.iter(|| black_box(a.union(&b).unwrap()));
    });
}

criterion_group!(benches, fold_large_range, parse_comma_separated, union_disjoint);
criterion_main!(benches);

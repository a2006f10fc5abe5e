use criterion::{black_box, criterion_group, criterion_main, Criterion};

use clustershell::msgtree::{Mode, MsgTree};

fn add_shared_prefix(c: &mut Criterion) {
    c.bench_function("msgtree_add_10k_shared_line", |b| {
        b.iter(|| {
            let mut tree: MsgTree<usize> = MsgTree::new(Mode::Defer);
            for key in 0..10_000 {
                tree.add(key, "same output line");
            }
            black_box(tree.walk())
        });
    });
}

fn add_all_distinct(c: &mut Criterion) {
    c.bench_function("msgtree_add_10k_distinct_lines", |b| {
        b.iter(|| {
            let mut tree: MsgTree<usize> = MsgTree::new(Mode::Defer);
            for key in 0..10_000 {
                tree.add(key, format!("output line {key}"));
            }
            black_box(tree.walk())
        });
    });
}

criterion_group!(benches, add_shared_prefix, add_all_distinct);
criterion_main!(benches);

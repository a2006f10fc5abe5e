//! A `quickcheck::Arbitrary` generator for syntactically valid NodeSet
//! literals, for property tests that shouldn't have to hand-author
//! fold/parse fixtures.

use quickcheck::{Arbitrary, Gen};

/// A single `prefix[a-b]` NodeSet literal with a bounded range, always
/// accepted by `NodeSet::parse`.
#[derive(Debug, Clone)]
pub struct NodeSetLiteral(pub String);

impl Arbitrary for NodeSetLiteral {
    fn arbitrary(g: &mut Gen) -> Self {
        let prefixes = ["node", "foo", "cluster", "gw"];
        let prefix = g.choose(&prefixes).unwrap();
        let start = u64::arbitrary(g) % 50;
        let span = u64::arbitrary(g) % 20;
        let end = start + span;
        NodeSetLiteral(format!("{prefix}[{start}-{end}]"))
    }
}

use clustershell::nodeset::NodeSet;
use quickcheck::quickcheck;
use test_utils::NodeSetLiteral;

quickcheck! {
    fn parse_fold_roundtrip(lit: NodeSetLiteral) -> bool {
        let parsed = NodeSet::parse(&lit.0).unwrap();
        let refolded = NodeSet::parse(&parsed.fold()).unwrap();
        parsed == refolded
    }

    fn union_len_inclusion_exclusion(a: NodeSetLiteral, b: NodeSetLiteral) -> bool {
        let a = NodeSet::parse(&a.0).unwrap();
        let b = NodeSet::parse(&b.0).unwrap();
        let u = a.union(&b).unwrap();
        let i = a.intersection(&b).unwrap();
        u.len() + i.len() == a.len() + b.len()
    }
}

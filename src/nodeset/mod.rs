//! NodeSet — a set of node names decomposed into dimensions of
//! `prefix<digits>` interleaved with literal text.
//!
//! The skeleton/dimension model supports N-dimensional fold, iterate,
//! and set-algebra over node name patterns.

mod group;
mod parse;
mod skeleton;

pub use group::{GroupResolver, NullGroupResolver, StaticGroupResolver};
pub use skeleton::Skeleton;

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::rangeset::RangeSet;
use skeleton::{tokenize_atom, Block};

#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    patterns: FxHashMap<Skeleton, Vec<Block>>,
}

impl NodeSet {
    pub fn new() -> Self {
        NodeSet { patterns: FxHashMap::default() }
    }

    pub fn parse(s: &str) -> Result<Self> {
        parse::parse(s, &NullGroupResolver)
    }

    pub fn parse_with_resolver(s: &str, resolver: &dyn GroupResolver) -> Result<Self> {
        parse::parse(s, resolver)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total expanded cardinality.
    pub fn len(&self) -> usize {
        self.patterns
            .values()
            .flat_map(|blocks| blocks.iter())
            .map(|block| block.iter().map(|r| r.len()).product::<usize>())
            .sum()
    }

    fn all_tuples_for(&self, sk: &Skeleton) -> BTreeSet<Vec<u64>> {
        let mut out = BTreeSet::new();
        if let Some(blocks) = self.patterns.get(sk) {
            for block in blocks {
                cartesian(block, &mut Vec::with_capacity(block.len()), &mut out);
            }
        }
        out
    }

    /// Every fully expanded node name, in skeleton-lexicographic,
    /// tuple-lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = String> + '_ {
        let mut skeletons: Vec<&Skeleton> = self.patterns.keys().collect();
        skeletons.sort();
        skeletons.into_iter().flat_map(move |sk| {
            self.all_tuples_for(sk)
                .into_iter()
                .map(move |tuple| sk.render(&tuple))
                .collect::<Vec<_>>()
                .into_iter()
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        match tokenize_atom(name) {
            Ok((sk, block)) => {
                let Some(blocks) = self.patterns.get(&sk) else { return false };
                // `block` here is a singleton rectangle (one value per dim).
                let values: Vec<u64> = block.iter().map(|r| r.first().unwrap_or(0)).collect();
                blocks.iter().any(|b| {
                    b.len() == values.len() && b.iter().zip(&values).all(|(r, &v)| r.contains(v))
                })
            }
            Err(_) => false,
        }
    }

    fn insert_block(&mut self, sk: Skeleton, block: Block) {
        let blocks = self.patterns.entry(sk).or_default();
        blocks.push(block);
        normalize(blocks);
    }

    fn expand_names(&self) -> BTreeSet<String> {
        self.iter().collect()
    }

    /// Build a NodeSet from individual expanded host names, tokenizing
    /// and re-folding each into its skeleton/block representation.
    pub fn from_names<'a>(names: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut ns = NodeSet::new();
        for name in names {
            let (sk, block) = tokenize_atom(name)?;
            ns.insert_block(sk, block);
        }
        Ok(ns)
    }

    pub fn union(&self, other: &NodeSet) -> Result<NodeSet> {
        let mut out = self.clone();
        for (sk, blocks) in &other.patterns {
            for block in blocks {
                out.insert_block(sk.clone(), block.clone());
            }
        }
        Ok(out)
    }

    /// Intersection, difference and symmetric difference go through the
    /// "slow path" (expand shared skeletons to full name sets, apply the
    /// classic string-set operation, re-fold) for every skeleton rather
    /// than only for non-matching ones: multi-block skeletons (several
    /// disjoint rectangles under one frame) don't have a closed
    /// dimension-wise form for these three operations the way union's
    /// single-differing-dimension merge does.
    pub fn intersection(&self, other: &NodeSet) -> Result<NodeSet> {
        let mut names = BTreeSet::new();
        for sk in self.patterns.keys() {
            if !other.patterns.contains_key(sk) {
                continue;
            }
            let a = self.all_tuples_for(sk);
            let b = other.all_tuples_for(sk);
            for t in a.intersection(&b) {
                names.insert(sk.render(t));
            }
        }
        NodeSet::from_names(names.iter().map(String::as_str))
    }

    pub fn difference(&self, other: &NodeSet) -> Result<NodeSet> {
        let mut names = BTreeSet::new();
        for sk in self.patterns.keys() {
            let a = self.all_tuples_for(sk);
            let b = other.all_tuples_for(sk);
            for t in a.difference(&b) {
                names.insert(sk.render(t));
            }
        }
        NodeSet::from_names(names.iter().map(String::as_str))
    }

    pub fn symmetric_difference(&self, other: &NodeSet) -> Result<NodeSet> {
        let mut names = BTreeSet::new();
        let mut skeletons: Vec<&Skeleton> = self.patterns.keys().collect();
        for sk in other.patterns.keys() {
            if !self.patterns.contains_key(sk) {
                skeletons.push(sk);
            }
        }
        for sk in skeletons {
            let a = self.all_tuples_for(sk);
            let b = other.all_tuples_for(sk);
            for t in a.symmetric_difference(&b) {
                names.insert(sk.render(t));
            }
        }
        NodeSet::from_names(names.iter().map(String::as_str))
    }

    /// Apply an autostep threshold to every dimension of every pattern,
    /// so `fold` collapses runs of at least `threshold` evenly-spaced
    /// values into a `/step` range instead of listing them out.
    pub fn set_autostep(&mut self, threshold: usize) {
        for blocks in self.patterns.values_mut() {
            for block in blocks {
                for rs in block {
                    rs.set_autostep(threshold);
                }
            }
        }
    }

    pub fn fold(&self) -> String {
        let mut skeletons: Vec<&Skeleton> = self.patterns.keys().collect();
        skeletons.sort();
        let mut parts = Vec::new();
        for sk in skeletons {
            let blocks = &self.patterns[sk];
            for block in blocks {
                if sk.dims() == 0 {
                    parts.push(sk.frame[0].clone());
                    continue;
                }
                let mut s = String::new();
                for (i, seg) in sk.frame.iter().enumerate() {
                    s.push_str(seg);
                    if let Some(rs) = block.get(i) {
                        s.push('[');
                        s.push_str(&rs.fold());
                        s.push(']');
                    }
                }
                parts.push(s);
            }
        }
        parts.join(",")
    }

    /// `nodeset_cmp`: larger cardinality first, ties broken by the first
    /// element in canonical sorted order.
    pub fn nodeset_cmp(&self, other: &NodeSet) -> Ordering {
        other
            .len()
            .cmp(&self.len())
            .then_with(|| self.iter().next().cmp(&other.iter().next()))
    }
}

fn cartesian(block: &Block, current: &mut Vec<u64>, out: &mut BTreeSet<Vec<u64>>) {
    if current.len() == block.len() {
        out.insert(current.clone());
        return;
    }
    let dim = &block[current.len()];
    for v in dim.iter() {
        current.push(v);
        cartesian(block, current, out);
        current.pop();
    }
}

/// Greedily merge adjacent rectangles that differ in exactly one
/// dimension back into a single rectangle.
fn normalize(blocks: &mut Vec<Block>) {
    loop {
        let mut merged = None;
        'search: for i in 0..blocks.len() {
            for j in (i + 1)..blocks.len() {
                if let Some(m) = try_merge(&blocks[i], &blocks[j]) {
                    merged = Some((i, j, m));
                    break 'search;
                }
            }
        }
        match merged {
            Some((i, j, m)) => {
                blocks.remove(j);
                blocks.remove(i);
                blocks.push(m);
            }
            None => break,
        }
    }
}

fn try_merge(a: &Block, b: &Block) -> Option<Block> {
    if a.len() != b.len() {
        return None;
    }
    let mut differing = None;
    for i in 0..a.len() {
        if a[i] != b[i] {
            if differing.is_some() {
                return None;
            }
            differing = Some(i);
        }
    }
    let d = differing?;
    let mut merged = a.clone();
    merged[d] = a[d].union(&b[d]).ok()?;
    Some(merged)
}

impl PartialEq for NodeSet {
    fn eq(&self, other: &Self) -> bool {
        self.expand_names() == other.expand_names()
    }
}
impl Eq for NodeSet {}

impl fmt::Display for NodeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fold())
    }
}

impl std::str::FromStr for NodeSet {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        NodeSet::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_scenario_1() {
        let mut ns = NodeSet::parse("foo2,foo4,foo6").unwrap();
        ns.set_autostep(3);
        assert_eq!(ns.fold(), "foo[2-6/2]");
    }

    #[test]
    fn two_dimensional_iteration_order() {
        let ns = NodeSet::parse("foo1-ib0,foo1-ib1,foo2-ib0,foo2-ib1").unwrap();
        let names: Vec<String> = ns.iter().collect();
        assert_eq!(names, vec!["foo1-ib0", "foo1-ib1", "foo2-ib0", "foo2-ib1"]);
        assert_eq!(ns.fold(), "foo[1-2]-ib[0-1]");
    }

    #[test]
    fn set_difference_len() {
        let a = NodeSet::parse("node[1-5]").unwrap();
        let b = NodeSet::parse("node3").unwrap();
        let d = a.difference(&b).unwrap();
        assert_eq!(d.len(), 4);
        assert_eq!(d.fold(), "node[1-2,4-5]");
    }

    #[test]
    fn inclusion_exclusion() {
        let a = NodeSet::parse("node[1-10]").unwrap();
        let b = NodeSet::parse("node[5-15]").unwrap();
        let u = a.union(&b).unwrap();
        let i = a.intersection(&b).unwrap();
        assert_eq!(u.len() + i.len(), a.len() + b.len());
        let diff = u.difference(&b).unwrap();
        assert!(diff.expand_names().is_subset(&a.expand_names()));
    }

    #[test]
    fn empty_nodeset_renders_empty() {
        let ns = NodeSet::new();
        assert_eq!(ns.fold(), "");
        assert_eq!(ns.len(), 0);
        assert_eq!(ns.iter().count(), 0);
    }

    #[test]
    fn malformed_selectors_are_errors() {
        assert!(NodeSet::parse("nova[]").is_err());
        assert!(NodeSet::parse("node[1-5").is_err());
        assert!(NodeSet::parse("node[2-5/a]").is_err());
    }

    #[test]
    fn unknown_group_is_error() {
        let err = NodeSet::parse("@unknown").unwrap_err();
        assert!(matches!(err, Error::GroupSource(_)));
    }
}

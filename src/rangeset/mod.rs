//! RangeSet — an ordered set of non-negative integers with an associated
//! pad width.
//!
//! Supports the operations a node-range benchmark would exercise: parse,
//! fold, union, and ordered iteration.

mod fold;
mod parse;

pub use parse::ParseRangeSetError;

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// Threshold value meaning "never fold an arithmetic progression as
/// `a-b/step`" — the library default: stepped folding is opt-in, not
/// automatic.
pub const AUTOSTEP_DISABLED: usize = usize::MAX;

/// An ordered set of non-negative integers with a fixed pad width.
#[derive(Debug, Clone)]
pub struct RangeSet {
    /// 0 means "render without leading zeros"; a positive value is the
    /// fixed digit width used when rendering and was fixed by the first
    /// padded literal seen during parsing.
    pad: usize,
    elems: BTreeSet<u64>,
    autostep: usize,
}

impl RangeSet {
    /// An empty RangeSet, compatible (for pad-width purposes) with any
    /// other RangeSet it is combined with.
    pub fn new() -> Self {
        RangeSet { pad: 0, elems: BTreeSet::new(), autostep: AUTOSTEP_DISABLED }
    }

    /// Construct directly from a single contiguous `start..=end` range at
    /// `step` with `pad` digit width. `step` must be >= 1 and `start <=
    /// end`.
    pub fn from_range(start: u64, end: u64, step: u64, pad: usize) -> Result<Self> {
        if step == 0 {
            return Err(Error::Parse(format!("invalid step 0 in range {start}-{end}")));
        }
        if start > end {
            return Err(Error::Parse(format!("invalid range {start}-{end}: start > end")));
        }
        let mut elems = BTreeSet::new();
        let mut v = start;
        while v <= end {
            elems.insert(v);
            v = match v.checked_add(step) {
                Some(v) => v,
                None => break,
            };
        }
        Ok(RangeSet { pad, elems, autostep: AUTOSTEP_DISABLED })
    }

    pub fn parse(s: &str) -> Result<Self> {
        parse::parse(s)
    }

    pub fn set_autostep(&mut self, autostep: usize) {
        self.autostep = autostep;
    }

    pub fn autostep(&self) -> usize {
        self.autostep
    }

    pub fn pad(&self) -> usize {
        self.pad
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn contains(&self, n: u64) -> bool {
        self.elems.contains(&n)
    }

    /// Ascending iteration.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.elems.iter().copied()
    }

    pub fn first(&self) -> Option<u64> {
        self.elems.iter().next().copied()
    }

    /// Fold the set into its canonical compact textual form: `a`, `a-b`,
    /// `a-b/step`, comma-joined.
    pub fn fold(&self) -> String {
        fold::fold(self)
    }

    fn compatible_pad(&self, other: &RangeSet) -> Option<usize> {
        if self.elems.is_empty() {
            Some(other.pad)
        } else if other.elems.is_empty() {
            Some(self.pad)
        } else if self.pad == other.pad {
            Some(self.pad)
        } else {
            None
        }
    }

    pub fn union(&self, other: &RangeSet) -> Result<RangeSet> {
        let pad = self.compatible_pad(other).ok_or_else(|| {
            Error::Parse(format!(
                "mixed pad widths in RangeSet union ({} vs {})",
                self.pad, other.pad
            ))
        })?;
        let elems = self.elems.union(&other.elems).copied().collect();
        Ok(RangeSet { pad, elems, autostep: self.autostep })
    }

    pub fn intersection(&self, other: &RangeSet) -> Result<RangeSet> {
        let pad = self.compatible_pad(other).ok_or_else(|| {
            Error::Parse(format!(
                "mixed pad widths in RangeSet intersection ({} vs {})",
                self.pad, other.pad
            ))
        })?;
        let elems = self.elems.intersection(&other.elems).copied().collect();
        Ok(RangeSet { pad, elems, autostep: self.autostep })
    }

    pub fn difference(&self, other: &RangeSet) -> Result<RangeSet> {
        let pad = self.compatible_pad(other).ok_or_else(|| {
            Error::Parse(format!(
                "mixed pad widths in RangeSet difference ({} vs {})",
                self.pad, other.pad
            ))
        })?;
        let elems = self.elems.difference(&other.elems).copied().collect();
        Ok(RangeSet { pad, elems, autostep: self.autostep })
    }

    pub fn symmetric_difference(&self, other: &RangeSet) -> Result<RangeSet> {
        let pad = self.compatible_pad(other).ok_or_else(|| {
            Error::Parse(format!(
                "mixed pad widths in RangeSet symmetric_difference ({} vs {})",
                self.pad, other.pad
            ))
        })?;
        let elems = self.elems.symmetric_difference(&other.elems).copied().collect();
        Ok(RangeSet { pad, elems, autostep: self.autostep })
    }

    pub fn is_subset(&self, other: &RangeSet) -> bool {
        self.elems.is_subset(&other.elems)
    }
}

impl Default for RangeSet {
    fn default() -> Self {
        RangeSet::new()
    }
}

impl PartialEq for RangeSet {
    fn eq(&self, other: &Self) -> bool {
        // Pad width is only meaningful for non-empty sets, matching
        // compatible_pad's treatment of the empty set as wildcard.
        self.elems == other.elems && (self.elems.is_empty() || self.pad == other.pad)
    }
}
impl Eq for RangeSet {}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fold())
    }
}

impl std::str::FromStr for RangeSet {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        RangeSet::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_single() {
        let r = RangeSet::parse("5").unwrap();
        assert_eq!(r.fold(), "5");
    }

    #[test]
    fn fold_contiguous() {
        let r = RangeSet::parse("1-5").unwrap();
        assert_eq!(r.fold(), "1-5");
    }

    #[test]
    fn fold_autostep_threshold() {
        let mut r = RangeSet::parse("2,4,6").unwrap();
        r.set_autostep(3);
        assert_eq!(r.fold(), "2-6/2");
        r.set_autostep(4);
        assert_eq!(r.fold(), "2,4,6");
    }

    #[test]
    fn parse_fold_roundtrip() {
        for s in ["1-5", "007-010", "1,3,5-9", "0-0"] {
            let r = RangeSet::parse(s).unwrap();
            let refolded = RangeSet::parse(&r.fold()).unwrap();
            assert_eq!(r, refolded, "roundtrip failed for {s}");
        }
    }

    #[test]
    fn single_element_folds_to_a() {
        let r = RangeSet::from_range(7, 7, 1, 0).unwrap();
        assert_eq!(r.fold(), "7");
    }

    #[test]
    fn union_len_inclusion_exclusion() {
        let a = RangeSet::parse("1-5").unwrap();
        let b = RangeSet::parse("3-8").unwrap();
        let u = a.union(&b).unwrap();
        let i = a.intersection(&b).unwrap();
        assert_eq!(u.len() + i.len(), a.len() + b.len());
    }

    #[test]
    fn mixed_pad_union_is_error() {
        let a = RangeSet::parse("01-03").unwrap();
        let b = RangeSet::parse("4-6").unwrap();
        assert!(a.union(&b).is_err());
    }

    #[test]
    fn malformed_ranges_are_parse_errors() {
        assert!(RangeSet::parse("2-5/a").is_err());
        assert!(RangeSet::parse("3-2").is_err());
        assert!(RangeSet::parse("004-002").is_err());
    }

    #[test]
    fn empty_set_iterates_zero_times() {
        let r = RangeSet::new();
        assert_eq!(r.len(), 0);
        assert_eq!(r.iter().count(), 0);
    }
}

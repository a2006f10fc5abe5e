use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

use super::RangeSet;

#[derive(Debug)]
pub struct ParseRangeSetError(pub String);

impl fmt::Display for ParseRangeSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for ParseRangeSetError {}

/// Width of a decimal literal for pad-width purposes: only literals that
/// *start* with `0` and have more than one digit carry padding; a bare
/// single `0` is unpadded.
fn literal_width(s: &str) -> usize {
    if s.len() > 1 && s.starts_with('0') {
        s.len()
    } else {
        0
    }
}

fn parse_u64(s: &str, ctx: &str) -> Result<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Parse(format!("malformed range item {ctx:?}")));
    }
    s.parse::<u64>()
        .map_err(|_| Error::Parse(format!("malformed range item {ctx:?}")))
}

/// Parse one comma-separated item: `n`, `a-b`, or `a-b/step`.
/// Returns (start, end, step, pad-width-of-start-literal).
fn parse_item(tok: &str) -> Result<(u64, u64, u64, usize)> {
    let tok = tok.trim();
    if tok.is_empty() {
        return Err(Error::Parse("empty range item".into()));
    }

    let (range_part, step_part) = match tok.split_once('/') {
        Some((r, s)) => (r, Some(s)),
        None => (tok, None),
    };

    let step = match step_part {
        Some(s) => {
            let v = parse_u64(s, tok)?;
            if v == 0 {
                return Err(Error::Parse(format!("invalid step 0 in {tok:?}")));
            }
            v
        }
        None => 1,
    };

    match range_part.split_once('-') {
        Some((a, b)) => {
            let pad = literal_width(a);
            let start = parse_u64(a, tok)?;
            let end = parse_u64(b, tok)?;
            if start > end {
                return Err(Error::Parse(format!("invalid range {tok:?}: start > end")));
            }
            Ok((start, end, step, pad))
        }
        None => {
            if step_part.is_some() {
                return Err(Error::Parse(format!("step without a range in {tok:?}")));
            }
            let pad = literal_width(range_part);
            let v = parse_u64(range_part, tok)?;
            Ok((v, v, 1, pad))
        }
    }
}

pub fn parse(s: &str) -> Result<RangeSet> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Parse("empty range selector".into()));
    }

    let mut elems = BTreeSet::new();
    let mut fixed_pad: Option<usize> = None;

    for tok in s.split(',') {
        let tok = tok.trim();
        if tok.is_empty() {
            return Err(Error::Parse(format!("empty item in range selector {s:?}")));
        }
        let (start, end, step, pad) = parse_item(tok)?;
        match fixed_pad {
            None => fixed_pad = Some(pad),
            Some(fp) if fp == pad => {}
            Some(fp) => {
                return Err(Error::Parse(format!(
                    "mixed pad widths in range selector {s:?}: {fp} vs {pad}"
                )));
            }
        }
        let mut v = start;
        while v <= end {
            elems.insert(v);
            v = match v.checked_add(step) {
                Some(v) => v,
                None => break,
            };
        }
    }

    Ok(RangeSet {
        pad: fixed_pad.unwrap_or(0),
        elems,
        autostep: super::AUTOSTEP_DISABLED,
    })
}

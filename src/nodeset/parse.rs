use crate::error::{Error, Result};

use super::group::{valid_group_name, GroupResolver};
use super::skeleton::tokenize_atom;
use super::NodeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Union,
    Intersection,
    Difference,
}

/// Split `pattern` at top-level (outside `[...]`) occurrences of `,`,
/// whitespace, `+` (all union), `&` (intersection) and `!` (difference).
/// A top-level `!`, `&`, `,`/`+` between atoms denotes set difference,
/// intersection, union respectively, evaluated left to right.
fn split_top_level(pattern: &str) -> Vec<(Op, String)> {
    let mut out = Vec::new();
    let mut pending_op = Op::Union;
    let mut buf = String::new();
    let mut depth = 0i32;

    let flush = |buf: &mut String, op: Op, out: &mut Vec<(Op, String)>| {
        if !buf.trim().is_empty() {
            out.push((op, std::mem::take(buf)));
        } else {
            buf.clear();
        }
    };

    for c in pattern.chars() {
        match c {
            '[' => {
                depth += 1;
                buf.push(c);
            }
            ']' => {
                depth -= 1;
                buf.push(c);
            }
            ',' | '+' if depth == 0 => {
                flush(&mut buf, pending_op, &mut out);
                pending_op = Op::Union;
            }
            '&' if depth == 0 => {
                flush(&mut buf, pending_op, &mut out);
                pending_op = Op::Intersection;
            }
            '!' if depth == 0 => {
                flush(&mut buf, pending_op, &mut out);
                pending_op = Op::Difference;
            }
            c if c.is_whitespace() && depth == 0 => {
                flush(&mut buf, pending_op, &mut out);
                pending_op = Op::Union;
            }
            _ => buf.push(c),
        }
    }
    flush(&mut buf, pending_op, &mut out);
    out
}

fn parse_group_ref(atom: &str, resolver: &dyn GroupResolver) -> Result<NodeSet> {
    let body = &atom[1..];
    let (source, name) = match body.split_once(':') {
        Some((src, name)) => (Some(src), name),
        None => (None, body),
    };
    if !valid_group_name(name) || source.is_some_and(|s| !valid_group_name(s)) {
        return Err(Error::Parse(format!("illegal characters in group name {atom:?}")));
    }
    let pattern = resolver
        .resolve(source, name)
        .ok_or_else(|| Error::GroupSource(format!("unknown group {atom:?}")))?;
    parse(&pattern, resolver)
}

fn parse_atom(atom: &str, resolver: &dyn GroupResolver) -> Result<NodeSet> {
    if atom.starts_with('@') {
        return parse_group_ref(atom, resolver);
    }
    let (sk, block) = tokenize_atom(atom)?;
    let mut ns = NodeSet::new();
    ns.insert_block(sk, block);
    Ok(ns)
}

pub fn parse(pattern: &str, resolver: &dyn GroupResolver) -> Result<NodeSet> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Ok(NodeSet::new());
    }

    let mut result = NodeSet::new();
    for (op, atom) in split_top_level(pattern) {
        let operand = parse_atom(atom.trim(), resolver)?;
        result = match op {
            Op::Union => result.union(&operand)?,
            Op::Intersection => result.intersection(&operand)?,
            Op::Difference => result.difference(&operand)?,
        };
    }
    Ok(result)
}

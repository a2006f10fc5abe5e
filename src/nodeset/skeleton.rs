use crate::rangeset::RangeSet;

/// The fixed textual frame of a node-name pattern plus the pad-width
/// tuple of its numeric dimensions. Two NodeSets share a skeleton iff
/// both are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Skeleton {
    /// Literal text segments; `frame.len() == dims + 1`.
    pub frame: Vec<String>,
    pub pads: Vec<usize>,
}

impl Skeleton {
    pub fn dims(&self) -> usize {
        self.frame.len() - 1
    }

    pub fn render(&self, values: &[u64]) -> String {
        debug_assert_eq!(values.len(), self.dims());
        let mut out = String::new();
        for (i, seg) in self.frame.iter().enumerate() {
            out.push_str(seg);
            if let Some(&v) = values.get(i) {
                let pad = self.pads[i];
                if pad > 1 {
                    out.push_str(&format!("{v:0width$}", width = pad));
                } else {
                    out.push_str(&v.to_string());
                }
            }
        }
        out
    }
}

/// One rectangular block of a NodeSet's membership for a given skeleton:
/// the Cartesian product of one RangeSet per dimension.
pub type Block = Vec<RangeSet>;

/// Tokenize a single atom (no top-level operators, no leading `@`) into
/// its skeleton and the RangeSet for each numeric dimension — whether
/// that dimension was written as a bracketed range (`[1-10]`) or as a
/// bare embedded digit run (`foo12`): both forms decompose identically
/// so that `foo2,foo4,foo6` folds exactly like `foo[2],foo[4],foo[6]`
/// would.
pub fn tokenize_atom(atom: &str) -> crate::error::Result<(Skeleton, Block)> {
    use crate::error::Error;

    let mut frame = Vec::new();
    let mut pads = Vec::new();
    let mut block: Block = Vec::new();
    let mut literal = String::new();

    let chars: Vec<char> = atom.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '[' {
            let close = chars[i + 1..]
                .iter()
                .position(|&c| c == ']')
                .map(|p| i + 1 + p);
            let close = match close {
                Some(p) => p,
                None => return Err(Error::Parse(format!("unbalanced brackets in {atom:?}"))),
            };
            let inner: String = chars[i + 1..close].iter().collect();
            let rs = RangeSet::parse(&inner)?;
            frame.push(std::mem::take(&mut literal));
            pads.push(rs.pad());
            block.push(rs);
            i = close + 1;
        } else if c == ']' {
            return Err(Error::Parse(format!("unbalanced brackets in {atom:?}")));
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            let pad = if digits.len() > 1 && digits.starts_with('0') {
                digits.len()
            } else {
                0
            };
            let v: u64 = digits
                .parse()
                .map_err(|_| Error::Parse(format!("number too large in {atom:?}")))?;
            let rs = RangeSet::from_range(v, v, 1, pad)?;
            frame.push(std::mem::take(&mut literal));
            pads.push(pad);
            block.push(rs);
        } else {
            literal.push(c);
            i += 1;
        }
    }
    frame.push(literal);

    if block.is_empty() && frame.iter().all(|s| s.is_empty()) {
        return Err(Error::Parse("empty node name".into()));
    }

    Ok((Skeleton { frame, pads }, block))
}

use super::RangeSet;

fn render(n: u64, pad: usize) -> String {
    if pad > 1 {
        format!("{n:0width$}", width = pad)
    } else {
        n.to_string()
    }
}

/// Fold a sorted sequence of elements into the canonical `a`, `a-b`,
/// `a-b/step` comma-joined form: walk the sorted elements, greedily
/// extend a run while the stride between consecutive elements stays
/// constant, then render each closed run.
pub fn fold(rs: &RangeSet) -> String {
    let elems: Vec<u64> = rs.iter().collect();
    if elems.is_empty() {
        return String::new();
    }

    let mut parts = Vec::new();
    let mut i = 0;
    while i < elems.len() {
        if i + 1 == elems.len() {
            parts.push(render(elems[i], rs.pad));
            i += 1;
            continue;
        }

        let stride = elems[i + 1] - elems[i];
        let mut j = i + 1;
        while j + 1 < elems.len() && elems[j + 1] - elems[j] == stride {
            j += 1;
        }
        let run_len = j - i + 1;

        if stride == 1 {
            if run_len == 1 {
                parts.push(render(elems[i], rs.pad));
            } else {
                parts.push(format!(
                    "{}-{}",
                    render(elems[i], rs.pad),
                    render(elems[j], rs.pad)
                ));
            }
            i = j + 1;
        } else if run_len >= rs.autostep {
            parts.push(format!(
                "{}-{}/{}",
                render(elems[i], rs.pad),
                render(elems[j], rs.pad),
                stride
            ));
            i = j + 1;
        } else {
            // Progression too short to step-fold: emit its first element
            // standalone and re-evaluate from the next one, so length-2
            // "runs" that don't meet autostep still come out as two
            // separate numbers rather than one opaque range.
            parts.push(render(elems[i], rs.pad));
            i += 1;
        }
    }

    parts.join(",")
}

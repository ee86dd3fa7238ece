//! Character-count token heuristic. Used only when a backend reports no usage
//! and estimation is switched on; never presented as an authoritative count.

/// Roughly one token per 2 CJK ideographs and per 4 other characters,
/// rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    let (cjk, other) = text.chars().fold((0u64, 0u64), |(cjk, other), c| {
        if is_cjk(c) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });
    cjk.div_ceil(2) + other.div_ceil(4)
}

fn is_cjk(c: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&c)
}

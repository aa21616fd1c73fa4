//! Content helpers: SHA-1 digests, text detection and line similarity.

use std::collections::HashMap;

use sha1::{Digest, Sha1};

/// Bytes inspected by [`is_text_content`].
const TEXT_SNIFF_BYTES: usize = 8 * 1024;

/// Lowercase hex SHA-1 of `bytes`.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Heuristic text detection: no NUL byte in the leading bytes and those
/// bytes decode as UTF-8 (a multi-byte char cut at the boundary is allowed).
pub fn is_text_content(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return true;
    }
    let head = &bytes[..bytes.len().min(TEXT_SNIFF_BYTES)];
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && head.len() == TEXT_SNIFF_BYTES,
    }
}

/// Upper bound on the line-sequence similarity of two texts, in `0.0..=1.0`.
///
/// Counts the lines the two texts have in common as multisets and returns
/// `2 * common / (lines_a + lines_b)`. Returns `None` when either text is
/// empty.
pub fn quick_ratio(a: &str, b: &str) -> Option<f64> {
    let lines_a: Vec<&str> = a.lines().collect();
    let lines_b: Vec<&str> = b.lines().collect();
    if lines_a.is_empty() || lines_b.is_empty() {
        return None;
    }

    let mut available: HashMap<&str, usize> = HashMap::new();
    for line in &lines_b {
        *available.entry(line).or_insert(0) += 1;
    }
    let mut common = 0usize;
    for line in &lines_a {
        if let Some(count) = available.get_mut(line) {
            if *count > 0 {
                *count -= 1;
                common += 1;
            }
        }
    }

    Some(2.0 * common as f64 / (lines_a.len() + lines_b.len()) as f64)
}

/// Format a ratio as a percentage with one decimal, e.g. `0.875` → `"87.5%"`.
pub fn format_ratio(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

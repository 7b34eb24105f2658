//! Stable identity tags for combinations and log file names.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::core::sweep::Combination;

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._+-]").unwrap());

/// Short, stable hash tag over a combination plus extra context pairs.
///
/// Hashes the sorted-key JSON rendering, so the tag is independent of how the
/// combination was assembled.
pub fn short_hash_tag(combination: &Combination, extra: &[(&str, String)]) -> String {
    let mut map = combination.clone();
    for (key, value) in extra {
        map.insert((*key).to_string(), value.clone());
    }
    // BTreeMap serializes with sorted keys.
    let blob = serde_json::to_string(&map).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(blob.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}

/// Make a value safe for filenames: unsafe characters become `_` and the
/// result is clamped to `max_len` bytes.
pub fn slug_value(value: &str, max_len: usize) -> String {
    let slug = UNSAFE_CHARS.replace_all(value, "_").into_owned();
    match slug.char_indices().nth(max_len) {
        Some((idx, _)) => slug[..idx].to_string(),
        None => slug,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combo(pairs: &[(&str, &str)]) -> Combination {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn hash_tag_is_deterministic_and_order_independent() {
        let a = combo(&[("impl", "opt"), ("threads", "2")]);
        let b = combo(&[("threads", "2"), ("impl", "opt")]);
        let extra = [("file", "toy.cnf".to_string())];
        assert_eq!(short_hash_tag(&a, &extra), short_hash_tag(&b, &extra));
        assert_eq!(short_hash_tag(&a, &extra).len(), 12);
    }

    #[test]
    fn hash_tag_distinguishes_context() {
        let c = combo(&[("impl", "opt")]);
        let a = short_hash_tag(&c, &[("file", "a.cnf".to_string())]);
        let b = short_hash_tag(&c, &[("file", "b.cnf".to_string())]);
        assert_ne!(a, b);
    }

    #[test]
    fn slug_replaces_unsafe_characters() {
        assert_eq!(slug_value("a/b c:d.cnf", 80), "a_b_c_d.cnf");
        assert_eq!(slug_value("plain-name_1.cnf.xz", 80), "plain-name_1.cnf.xz");
    }

    #[test]
    fn slug_clamps_length() {
        let long = "x".repeat(200);
        assert_eq!(slug_value(&long, 80).len(), 80);
    }
}

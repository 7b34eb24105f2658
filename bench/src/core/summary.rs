//! Summary-line parsing and ledger-row construction.
//!
//! Benchmark binaries report results as whitespace-delimited `key=value`
//! pairs on a single stdout line (usually the last). The recorder takes the
//! last line containing at least one pair and accepts it only when every
//! required key is present.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::sweep::Combination;

/// Reserved header column holding the input file name.
pub const FILE_COLUMN: &str = "file";
/// Reserved header column holding the memory limit in MiB.
pub const MEMLIMIT_COLUMN: &str = "memlimit_mb";

static PAIR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w+)=(\S+)").unwrap());

/// Extract the key/value map of the last output line containing at least one
/// `key=value` pair. Empty when no line qualifies.
pub fn parse_summary_lines<'a, I>(lines: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut last = BTreeMap::new();
    for line in lines {
        let mut pairs = BTreeMap::new();
        for caps in PAIR_RE.captures_iter(line) {
            pairs.insert(caps[1].to_string(), caps[2].to_string());
        }
        if !pairs.is_empty() {
            last = pairs;
        }
    }
    last
}

/// Parse the summary and require `required` keys; `None` marks the run
/// unparsed.
pub fn parse_required_keys(lines: &[String], required: &[String]) -> Option<BTreeMap<String, String>> {
    let map = parse_summary_lines(lines.iter().map(String::as_str));
    if required.iter().all(|k| map.contains_key(k)) && !map.is_empty() {
        Some(map)
    } else {
        None
    }
}

/// Build one ledger row for `header`.
///
/// The file-identity column takes the input file name and the reserved
/// memory-limit column takes the limit (or empty); every other column prefers
/// the parsed output's value, falling back to the combination's, then empty.
pub fn build_row(
    header: &[String],
    file_name: &str,
    memlimit_mb: Option<u64>,
    parsed: &BTreeMap<String, String>,
    combination: &Combination,
) -> Vec<String> {
    header
        .iter()
        .map(|column| {
            if column == FILE_COLUMN {
                file_name.to_string()
            } else if column == MEMLIMIT_COLUMN {
                memlimit_mb.map(|ml| ml.to_string()).unwrap_or_default()
            } else {
                parsed
                    .get(column)
                    .or_else(|| combination.get(column))
                    .cloned()
                    .unwrap_or_default()
            }
        })
        .collect()
}

/// Join the values at `key_cols` into the row's uniqueness key.
///
/// Empty components are allowed (a missing memory limit still keys); only an
/// out-of-range column yields `None`.
pub fn uniqueness_key(row: &[String], key_cols: &[usize]) -> Option<String> {
    let mut parts = Vec::with_capacity(key_cols.len());
    for &col in key_cols {
        parts.push(row.get(col)?.as_str());
    }
    Some(parts.join(","))
}

/// Whether every key column of a prospective row is filled, i.e. whether a
/// pre-execution skip check can be trusted for it.
pub fn key_is_resolved(row: &[String], key_cols: &[usize]) -> bool {
    key_cols
        .iter()
        .all(|&col| row.get(col).is_some_and(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    fn strings(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn last_pair_line_wins() {
        let parsed = parse_summary_lines(
            ["progress: 10%", "vars=3 edges=2", "done", "vars=5 edges=4 total_sec=0.1"]
                .into_iter(),
        );
        assert_eq!(parsed.get("vars").map(String::as_str), Some("5"));
        assert_eq!(parsed.get("total_sec").map(String::as_str), Some("0.1"));
    }

    #[test]
    fn required_keys_gate_acceptance() {
        let out = lines(&["vars=5 edges=4"]);
        assert!(parse_required_keys(&out, &strings(&["vars", "edges"])).is_some());
        assert!(parse_required_keys(&out, &strings(&["vars", "total_sec"])).is_none());
        assert!(parse_required_keys(&lines(&["no pairs here"]), &strings(&["vars"])).is_none());
    }

    #[test]
    fn row_prefers_parsed_output_over_combination() {
        let header = strings(&["file", "impl", "threads", "memlimit_mb", "total_sec"]);
        let combination: Combination = [("impl", "opt"), ("threads", "2")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let parsed: BTreeMap<String, String> = [("threads", "4"), ("total_sec", "0.5")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let row = build_row(&header, "toy.cnf", Some(512), &parsed, &combination);
        assert_eq!(row, strings(&["toy.cnf", "opt", "4", "512", "0.5"]));
    }

    #[test]
    fn missing_memlimit_renders_empty() {
        let header = strings(&["file", "memlimit_mb"]);
        let row = build_row(&header, "toy.cnf", None, &BTreeMap::new(), &Combination::new());
        assert_eq!(row, strings(&["toy.cnf", ""]));
    }

    #[test]
    fn uniqueness_key_joins_key_columns() {
        let row = strings(&["toy.cnf", "opt", "2", "512"]);
        assert_eq!(
            uniqueness_key(&row, &[0, 1, 2]).as_deref(),
            Some("toy.cnf,opt,2")
        );
    }

    #[test]
    fn uniqueness_key_allows_empty_components() {
        let row = strings(&["toy.cnf", "", "2"]);
        assert_eq!(uniqueness_key(&row, &[0, 1]).as_deref(), Some("toy.cnf,"));
        assert_eq!(uniqueness_key(&row, &[0, 9]), None);
    }

    #[test]
    fn resolved_check_rejects_empty_key_columns() {
        let row = strings(&["toy.cnf", "", "2"]);
        assert!(key_is_resolved(&row, &[0, 2]));
        assert!(!key_is_resolved(&row, &[0, 1]));
        assert!(!key_is_resolved(&row, &[0, 9]));
    }
}

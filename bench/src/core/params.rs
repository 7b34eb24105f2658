//! Parameter schema: value domains, constraints, and normalization.
//!
//! Every swept value travels as a canonical string. Validation happens once,
//! when a value list is built from registry defaults or caller overrides;
//! downstream stages (sweep, command formatting, ledger rows) trust the
//! canonical forms produced here.

use anyhow::{Result, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::core::condition::{Condition, scalar_string};

/// Numeric kind used for constraint checking and canonicalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericKind {
    Int,
    Float,
}

impl NumericKind {
    fn label(self) -> &'static str {
        match self {
            NumericKind::Int => "int",
            NumericKind::Float => "float",
        }
    }
}

/// Declared value domain: a scalar, a literal list, or a half-open numeric
/// range `{"range": {"start": 1, "stop": 5, "step": 2}}` (yielding 1, 3).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Range { range: RangeSpec },
    List(Vec<Value>),
    Scalar(Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RangeSpec {
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub stop: Option<i64>,
    #[serde(default = "RangeSpec::default_step")]
    pub step: i64,
}

impl RangeSpec {
    const fn default_step() -> i64 {
        1
    }
}

/// A registry-declared sweep parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// Human-readable description surfaced by `bench list`.
    #[serde(default)]
    pub help: Option<String>,
    /// Values swept when the caller does not override this parameter.
    #[serde(default)]
    pub default: Option<ValueSpec>,
    /// Condition on earlier parameters gating this sweep.
    #[serde(default)]
    pub when: Option<Condition>,
    /// Closed set of legal values.
    #[serde(rename = "enum", default)]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default)]
    pub numeric: Option<NumericKind>,
    /// Inclusive lower bound (numeric values only).
    #[serde(default)]
    pub min: Option<f64>,
    /// Inclusive upper bound (numeric values only).
    #[serde(default)]
    pub max: Option<f64>,
    /// Accept a case-insensitive `inf` sentinel regardless of bounds.
    #[serde(default)]
    pub allow_inf: bool,
}

impl ParamSpec {
    /// Expand this parameter's default value spec, or empty when absent.
    pub fn default_values(&self) -> Result<Vec<String>> {
        match &self.default {
            Some(spec) => expand_values(&self.name, spec),
            None => Ok(Vec::new()),
        }
    }
}

/// Expand a value spec into its list of string values.
pub fn expand_values(name: &str, spec: &ValueSpec) -> Result<Vec<String>> {
    match spec {
        ValueSpec::Range { range } => {
            let (Some(start), Some(stop)) = (range.start, range.stop) else {
                bail!("range for {name} requires start and stop");
            };
            if range.step == 0 {
                bail!("range for {name} requires a non-zero step");
            }
            let mut values = Vec::new();
            let mut current = start;
            while (range.step > 0 && current < stop) || (range.step < 0 && current > stop) {
                values.push(current.to_string());
                current += range.step;
            }
            Ok(values)
        }
        ValueSpec::List(items) => items.iter().map(|v| value_string(name, v)).collect(),
        ValueSpec::Scalar(value) => Ok(vec![value_string(name, value)?]),
    }
}

fn value_string(name: &str, value: &Value) -> Result<String> {
    match scalar_string(value) {
        Some(s) => Ok(s),
        None => bail!("value for {name} must be a scalar, got {value}"),
    }
}

/// Validate `values` against `spec`'s constraints, returning canonical forms.
///
/// Checks apply in order: enum membership, then numeric coercion with
/// inclusive min/max bounds. The `inf` sentinel (any case) bypasses numeric
/// checks when `allow_inf` is set and normalizes to lowercase `inf`. Integer
/// values are re-rendered without leading zeros or fractional parts.
pub fn validate_values(name: &str, values: &[String], spec: &ParamSpec) -> Result<Vec<String>> {
    if values.is_empty() {
        return Ok(Vec::new());
    }

    if let Some(allowed) = &spec.enum_values {
        let allowed: Vec<String> = allowed.iter().filter_map(scalar_string).collect();
        let bad: Vec<&str> = values
            .iter()
            .filter(|v| !allowed.iter().any(|a| a == *v))
            .map(String::as_str)
            .collect();
        if !bad.is_empty() {
            bail!(
                "invalid values for {name}: {} (allowed: {})",
                bad.join(","),
                allowed.join(",")
            );
        }
    }

    let numeric = spec.numeric.is_some() || spec.min.is_some() || spec.max.is_some();
    if !numeric {
        return Ok(values.to_vec());
    }

    let kind = spec.numeric.unwrap_or(NumericKind::Float);
    let mut checked = Vec::with_capacity(values.len());
    for value in values {
        if spec.allow_inf && value.eq_ignore_ascii_case("inf") {
            checked.push("inf".to_string());
            continue;
        }
        let Ok(parsed) = value.parse::<f64>() else {
            bail!("value for {name} must be {}: {value}", kind.label());
        };
        let number = match kind {
            NumericKind::Int => parsed.trunc(),
            NumericKind::Float => parsed,
        };
        if let Some(min) = spec.min {
            if number < min {
                bail!("value for {name} below minimum {min}: {value}");
            }
        }
        if let Some(max) = spec.max {
            if number > max {
                bail!("value for {name} above maximum {max}: {value}");
            }
        }
        match kind {
            NumericKind::Int => checked.push((number as i64).to_string()),
            NumericKind::Float => checked.push(value.clone()),
        }
    }
    Ok(checked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn spec(raw: &str) -> ParamSpec {
        serde_json::from_str(raw).expect("parse spec")
    }

    #[test]
    fn enum_accepts_declared_values_only() {
        let spec = spec(r#"{"name": "impl", "enum": ["naive", "opt"]}"#);
        let out = validate_values("impl", &strings(&["naive", "opt"]), &spec).expect("valid");
        assert_eq!(out, strings(&["naive", "opt"]));

        let err = validate_values("impl", &strings(&["foo"]), &spec).unwrap_err();
        assert!(err.to_string().contains("invalid values for impl"));
        assert!(err.to_string().contains("allowed: naive,opt"));
    }

    #[test]
    fn int_bounds_are_inclusive() {
        let spec = spec(r#"{"name": "tau", "numeric": "int", "min": 2, "max": 10}"#);
        assert_eq!(
            validate_values("tau", &strings(&["2", "5", "10"]), &spec).expect("valid"),
            strings(&["2", "5", "10"])
        );
        assert!(validate_values("tau", &strings(&["1"]), &spec).is_err());
        assert!(validate_values("tau", &strings(&["11"]), &spec).is_err());
        assert!(validate_values("tau", &strings(&["abc"]), &spec).is_err());
    }

    #[test]
    fn allow_inf_bypasses_bounds_any_case() {
        let spec = spec(r#"{"name": "tau", "numeric": "int", "min": 2, "allow_inf": true}"#);
        assert_eq!(
            validate_values("tau", &strings(&["inf", "INF", "Inf", "3"]), &spec).expect("valid"),
            strings(&["inf", "inf", "inf", "3"])
        );

        let strict = spec_without_inf();
        assert!(validate_values("tau", &strings(&["inf"]), &strict).is_err());
    }

    fn spec_without_inf() -> ParamSpec {
        spec(r#"{"name": "tau", "numeric": "int", "min": 2}"#)
    }

    #[test]
    fn int_values_are_canonicalized() {
        let spec = spec(r#"{"name": "threads", "numeric": "int", "min": 1}"#);
        assert_eq!(
            validate_values("threads", &strings(&["007", "5.0"]), &spec).expect("valid"),
            strings(&["7", "5"])
        );
    }

    #[test]
    fn unconstrained_values_pass_through() {
        let spec = spec(r#"{"name": "mode"}"#);
        assert_eq!(
            validate_values("mode", &strings(&["a", "007"]), &spec).expect("valid"),
            strings(&["a", "007"])
        );
    }

    #[test]
    fn range_expansion_is_half_open() {
        let spec: ValueSpec =
            serde_json::from_str(r#"{"range": {"start": 1, "stop": 5, "step": 2}}"#)
                .expect("parse");
        assert_eq!(expand_values("k", &spec).expect("expand"), strings(&["1", "3"]));
    }

    #[test]
    fn range_requires_start_and_stop() {
        let spec: ValueSpec = serde_json::from_str(r#"{"range": {"start": 1}}"#).expect("parse");
        let err = expand_values("k", &spec).unwrap_err();
        assert!(err.to_string().contains("requires start and stop"));
    }

    #[test]
    fn scalar_and_list_values_stringify() {
        let scalar: ValueSpec = serde_json::from_str("42").expect("parse");
        assert_eq!(expand_values("k", &scalar).expect("expand"), strings(&["42"]));

        let list: ValueSpec = serde_json::from_str(r#"[1, "inf", 2.5]"#).expect("parse");
        assert_eq!(
            expand_values("k", &list).expect("expand"),
            strings(&["1", "inf", "2.5"])
        );
    }
}

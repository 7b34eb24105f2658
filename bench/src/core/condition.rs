//! Boolean conditions over a partial parameter assignment.
//!
//! Conditions gate sweep parameters and auto-parameters on values fixed
//! earlier in schema order. The set of shapes is closed: any shape the
//! deserializer does not recognize becomes [`Condition::Unknown`], which
//! evaluates to `false` so sweep expansion stays total.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A condition evaluated against the current partial parameter assignment.
///
/// Registry/config syntax:
/// `{"equals": {"key": "impl", "value": "opt"}}`,
/// `{"in": {"key": "impl", "values": ["opt", "naive"]}}`,
/// `{"and": [..]}`, `{"or": [..]}`, `{"not": {..}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Always true (an absent or empty condition object).
    True,
    /// The assignment's value for `key` equals `value`.
    Equals { key: String, value: String },
    /// The assignment's value for `key` is one of `values`.
    In { key: String, values: Vec<String> },
    /// All children hold.
    All(Vec<Condition>),
    /// At least one child holds.
    Any(Vec<Condition>),
    /// The child does not hold.
    Not(Box<Condition>),
    /// Unrecognized shape; never matches.
    Unknown,
}

impl Condition {
    /// Evaluate against `assignment`.
    ///
    /// Keys missing from the assignment compare as the empty string, so a
    /// condition on a parameter that has not been fixed yet simply fails to
    /// match rather than erroring.
    pub fn evaluate(&self, assignment: &BTreeMap<String, String>) -> bool {
        match self {
            Condition::True => true,
            Condition::Equals { key, value } => lookup(assignment, key) == value,
            Condition::In { key, values } => {
                let actual = lookup(assignment, key);
                values.iter().any(|v| v == actual)
            }
            Condition::All(children) => children.iter().all(|c| c.evaluate(assignment)),
            Condition::Any(children) => children.iter().any(|c| c.evaluate(assignment)),
            Condition::Not(child) => !child.evaluate(assignment),
            // Fail closed: an unknown shape never matches.
            Condition::Unknown => false,
        }
    }
}

fn lookup<'a>(assignment: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    assignment.get(key).map(String::as_str).unwrap_or("")
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(condition_from_value(&value))
    }
}

/// Classify a JSON value into the closed condition set.
///
/// Exactly one recognized operator key is honored, probed in a fixed order;
/// everything else is [`Condition::Unknown`].
fn condition_from_value(value: &Value) -> Condition {
    let Some(obj) = value.as_object() else {
        return Condition::Unknown;
    };
    if obj.is_empty() {
        return Condition::True;
    }
    if let Some(body) = obj.get("equals") {
        let key = string_field(body, "key");
        let value = body
            .get("value")
            .and_then(scalar_string)
            .unwrap_or_default();
        return Condition::Equals { key, value };
    }
    if let Some(body) = obj.get("in") {
        let key = string_field(body, "key");
        let values = body
            .get("values")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(scalar_string).collect())
            .unwrap_or_default();
        return Condition::In { key, values };
    }
    if let Some(children) = obj.get("and") {
        return Condition::All(child_list(children));
    }
    if let Some(children) = obj.get("or") {
        return Condition::Any(child_list(children));
    }
    if let Some(child) = obj.get("not") {
        return Condition::Not(Box::new(condition_from_value(child)));
    }
    Condition::Unknown
}

fn child_list(value: &Value) -> Vec<Condition> {
    value
        .as_array()
        .map(|items| items.iter().map(condition_from_value).collect())
        .unwrap_or_default()
}

fn string_field(body: &Value, field: &str) -> String {
    body.get(field).and_then(scalar_string).unwrap_or_default()
}

/// Render a JSON scalar the way parameter values are rendered: strings as-is,
/// numbers and booleans via their canonical display form.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

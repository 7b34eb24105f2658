//! Algorithm registry: declarative algorithm definitions loaded from disk.
//!
//! The registry document is JSON (or YAML when the `yaml` feature is enabled)
//! of the shape `{"algorithms": [..]}`. The raw document is checked against a
//! bundled JSON Schema before serde parsing so malformed registries fail with
//! precise paths instead of opaque type errors.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::core::condition::{Condition, scalar_string};
use crate::core::params::ParamSpec;

const REGISTRY_SCHEMA: &str = include_str!("../../schemas/registry.schema.json");

/// Declarative description of one benchmarked algorithm.
#[derive(Debug, Clone, Deserialize)]
pub struct AlgorithmSpec {
    pub name: String,
    /// One-line description surfaced by `bench list`.
    #[serde(default)]
    pub help: Option<String>,
    /// Candidate binary paths relative to the project root, tried in order.
    #[serde(default)]
    pub discover: Vec<String>,
    pub cmd_template: Vec<String>,
    /// Fixed parameters merged under every combination.
    #[serde(default, deserialize_with = "stringified_map")]
    pub base_params: BTreeMap<String, String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub auto_params: Vec<AutoParamSpec>,
    pub csv: ResultSchema,
}

/// A derived parameter computed from the combination plus run context.
#[derive(Debug, Clone, Deserialize)]
pub struct AutoParamSpec {
    pub name: String,
    #[serde(alias = "path_template")]
    pub template: String,
    /// Resolve the substituted template relative to the output directory.
    #[serde(default)]
    pub join_out_dir: bool,
    #[serde(default)]
    pub when: Option<Condition>,
}

/// Where results land and how rows are keyed.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultSchema {
    /// Ledger file name under the output directory; defaults to
    /// `<name>_results.csv`.
    #[serde(default)]
    pub path: Option<String>,
    pub header: Vec<String>,
    /// Keys that must appear in the summary line for a run to count.
    pub required_keys: Vec<String>,
    /// Header column indices whose values form the uniqueness key.
    #[serde(default)]
    pub key_cols: Vec<usize>,
}

impl ResultSchema {
    pub fn ledger_name(&self, algorithm: &str) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| format!("{algorithm}_results.csv"))
    }
}

/// Loaded registry: one immutable [`AlgorithmSpec`] per algorithm name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    algorithms: BTreeMap<String, AlgorithmSpec>,
}

impl Registry {
    /// Load and validate a registry document.
    pub fn load(path: &Path) -> Result<Self> {
        let document = load_document(path)?;
        validate_against_schema(&document, path)?;
        let file: RegistryFile = serde_json::from_value(document)
            .with_context(|| format!("parse registry {}", path.display()))?;

        let mut algorithms = BTreeMap::new();
        for spec in file.algorithms {
            validate_spec(&spec)
                .with_context(|| format!("registry entry for algorithm '{}'", spec.name))?;
            let name = spec.name.clone();
            if algorithms.insert(name.clone(), spec).is_some() {
                bail!("duplicate algorithm '{name}' in registry {}", path.display());
            }
        }
        Ok(Self { algorithms })
    }

    pub fn lookup(&self, name: &str) -> Result<&AlgorithmSpec> {
        self.algorithms.get(name).with_context(|| {
            format!(
                "unknown algorithm '{name}' (known: {})",
                self.algorithms.keys().cloned().collect::<Vec<_>>().join(", ")
            )
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlgorithmSpec> {
        self.algorithms.values()
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    algorithms: Vec<AlgorithmSpec>,
}

fn validate_spec(spec: &AlgorithmSpec) -> Result<()> {
    if spec.cmd_template.is_empty() {
        bail!("cmd_template must not be empty");
    }
    if spec.csv.header.is_empty() {
        bail!("csv.header must not be empty");
    }
    if spec.csv.required_keys.is_empty() {
        bail!("csv.required_keys must not be empty");
    }
    for &col in &spec.csv.key_cols {
        if col >= spec.csv.header.len() {
            bail!(
                "csv.key_cols index {col} out of range for a {}-column header",
                spec.csv.header.len()
            );
        }
    }
    Ok(())
}

/// Read a JSON or YAML document into a JSON value, dispatching on extension.
pub(crate) fn load_document(path: &Path) -> Result<Value> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        parse_yaml(&raw, path)
    } else {
        serde_json::from_str(&raw).with_context(|| format!("parse json {}", path.display()))
    }
}

#[cfg(feature = "yaml")]
fn parse_yaml(raw: &str, path: &Path) -> Result<Value> {
    serde_yaml::from_str(raw).with_context(|| format!("parse yaml {}", path.display()))
}

#[cfg(not(feature = "yaml"))]
fn parse_yaml(_raw: &str, path: &Path) -> Result<Value> {
    bail!(
        "YAML config {} requires the `yaml` feature; rebuild with `--features yaml` or use JSON",
        path.display()
    )
}

/// Validate a registry document against the bundled JSON Schema
/// (Draft 2020-12).
fn validate_against_schema(document: &Value, path: &Path) -> Result<()> {
    let schema: Value =
        serde_json::from_str(REGISTRY_SCHEMA).context("parse bundled registry schema")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile registry schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(document)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!(
            "registry {} failed schema validation:\n- {}",
            path.display(),
            messages.join("\n- ")
        );
    }
    Ok(())
}

/// Deserialize a map of scalars into their canonical string forms.
pub(crate) fn stringified_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, Value> = BTreeMap::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        let Some(rendered) = scalar_string(&value) else {
            return Err(serde::de::Error::custom(format!(
                "base parameter {key} must be a scalar"
            )));
        };
        out.insert(key, rendered);
    }
    Ok(out)
}

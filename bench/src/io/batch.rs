//! Batch configuration: run several algorithms from one declarative file.
//!
//! The batch file supplies directories, a file-selection policy, and a list of
//! per-algorithm entries layered over the registry's definitions. Same
//! formats as the registry: JSON, or YAML with the `yaml` feature.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::core::condition::Condition;
use crate::core::params::ValueSpec;
use crate::io::registry::{load_document, stringified_map};

/// Top-level batch document.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
    #[serde(default)]
    pub bench_dir: Option<PathBuf>,
    #[serde(default)]
    pub files: FileSpec,
    pub algorithms: Vec<BatchAlgorithm>,
}

/// File-selection policy: a random sample of `count`, or reuse of a prior
/// ledger's file column.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileSpec {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub reuse_csv: Option<PathBuf>,
    #[serde(default)]
    pub seed: Option<u64>,
}

/// One algorithm entry, layered over its registry definition.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchAlgorithm {
    pub name: String,
    /// Explicit binary path, bypassing discovery.
    #[serde(default)]
    pub bin: Option<PathBuf>,
    /// Discovery candidates overriding the registry's list.
    #[serde(default)]
    pub discover: Vec<String>,
    /// Fixed parameters merged over the registry's base parameters.
    #[serde(default, deserialize_with = "stringified_map")]
    pub base_params: BTreeMap<String, String>,
    #[serde(default)]
    pub parameters: ParameterOverrides,
    #[serde(default = "default_cache")]
    pub cache: bool,
    #[serde(default)]
    pub skip_existing: bool,
    #[serde(default)]
    pub memlimits: Vec<u64>,
    /// Kill a run after this many seconds (off by default).
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_cache() -> bool {
    true
}

/// Parameter overrides: a mapping from parameter name to values, or the
/// legacy ordered list with per-entry conditions.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ParameterOverrides {
    List(Vec<OverrideEntry>),
    Map(BTreeMap<String, ValueSpec>),
}

impl Default for ParameterOverrides {
    fn default() -> Self {
        ParameterOverrides::Map(BTreeMap::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverrideEntry {
    pub name: String,
    #[serde(default)]
    pub values: Option<ValueSpec>,
    #[serde(default)]
    pub when: Option<Condition>,
}

/// Load and validate a batch config document.
pub fn load_batch_config(path: &Path) -> Result<BatchConfig> {
    let document = load_document(path)?;
    let config: BatchConfig = serde_json::from_value(document)
        .with_context(|| format!("parse batch config {}", path.display()))?;
    if config.algorithms.is_empty() {
        bail!("'algorithms' must be a non-empty list in {}", path.display());
    }
    if config.files.reuse_csv.is_none() && config.files.count == 0 {
        bail!("files.count must be > 0 when files.reuse_csv is not provided");
    }
    Ok(config)
}

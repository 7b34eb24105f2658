//! Orchestration of one algorithm's sweep: files × combinations × memory
//! limits.
//!
//! The engine owns no global state; everything it needs arrives through
//! [`EngineConfig`] and per-call [`AlgorithmRun`] requests, so tests can run
//! several isolated engines side by side.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Local;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::core::command::{InputMode, display_command, format_command};
use crate::core::hash::{short_hash_tag, slug_value};
use crate::core::params::{ParamSpec, validate_values};
use crate::core::summary::{build_row, key_is_resolved, parse_required_keys, uniqueness_key};
use crate::core::sweep::{Combination, SweepParam, expand};
use crate::io::cache::DecompressedCache;
use crate::io::discover::{is_compressed, resolve_binary};
use crate::io::ledger::{ExistingKeySet, Ledger};
use crate::io::process::{LogHeader, RunRequest, run_streaming};
use crate::io::registry::{AlgorithmSpec, Registry};

/// Marker context attached to errors caused by an absent external resource
/// (unresolvable binary); callers map it to exit code 2.
#[derive(Debug, Clone, Copy)]
pub struct MissingResource;

impl fmt::Display for MissingResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("missing required external resource")
    }
}

/// Directories the engine operates in.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the benchmark instance tree.
    pub bench_dir: PathBuf,
    /// Where ledgers, run logs, and cache files land.
    pub out_dir: PathBuf,
    /// Project root for binary discovery (declared candidates, `build/`).
    pub root_dir: PathBuf,
}

/// Parameter overrides for one algorithm invocation.
#[derive(Debug, Clone, Default)]
pub enum ParamOverrides {
    /// No overrides: sweep every registry default.
    #[default]
    None,
    /// Explicit map from parameter name to replacement values; unmentioned
    /// registry parameters keep their defaults, unknown names are rejected.
    Map(BTreeMap<String, Vec<String>>),
    /// Ordered list with optional per-entry conditions; registry parameters
    /// not mentioned are appended with their defaults.
    List(Vec<ListOverride>),
}

#[derive(Debug, Clone)]
pub struct ListOverride {
    pub name: String,
    pub values: Vec<String>,
    pub when: Option<crate::core::condition::Condition>,
}

/// One algorithm invocation request.
#[derive(Debug, Clone)]
pub struct AlgorithmRun {
    pub algorithm: String,
    /// Explicit binary path (discovery tier one).
    pub bin: Option<PathBuf>,
    /// Discovery candidates replacing the registry's list when non-empty.
    pub discover: Vec<String>,
    /// Fixed parameters merged over the registry's base parameters.
    pub base_params: BTreeMap<String, String>,
    pub overrides: ParamOverrides,
    /// Memory limits to sweep; empty means one unconstrained run.
    pub memlimits: Vec<u64>,
    pub skip_existing: bool,
    pub cache: bool,
    pub dry_run: bool,
    pub timeout: Option<Duration>,
}

impl AlgorithmRun {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            bin: None,
            discover: Vec::new(),
            base_params: BTreeMap::new(),
            overrides: ParamOverrides::None,
            memlimits: Vec::new(),
            skip_existing: false,
            cache: true,
            dry_run: false,
            timeout: None,
        }
    }
}

/// Outcome of one (file, combination, memory-limit) execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    /// A row was appended to the ledger; the log was deleted.
    Recorded,
    /// Skipped before execution: the uniqueness key was already present.
    SkippedExisting,
    /// Executed, parsed, but the key was already present; no row appended.
    Wasted,
    /// Non-zero exit, timeout, unparsable output, or an I/O error; the log
    /// was retained.
    Failed,
}

/// Aggregated counters for one algorithm's sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlgoStats {
    pub recorded: usize,
    pub skipped: usize,
    pub wasted: usize,
    pub failed: usize,
    /// Commands printed in dry-run mode.
    pub planned: usize,
}

impl AlgoStats {
    pub fn ok(&self) -> bool {
        self.failed == 0
    }

    fn tally(&mut self, status: RunStatus) {
        match status {
            RunStatus::Recorded => self.recorded += 1,
            RunStatus::SkippedExisting => self.skipped += 1,
            RunStatus::Wasted => self.wasted += 1,
            RunStatus::Failed => self.failed += 1,
        }
    }
}

/// Sweep executor bound to a loaded registry and a set of directories.
#[derive(Debug)]
pub struct Engine {
    registry: Registry,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: Registry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one algorithm over the selected files.
    ///
    /// Per-run failures are recorded in the returned stats, not raised;
    /// errors mean the whole algorithm could not run (bad configuration or an
    /// unresolvable binary, the latter tagged with [`MissingResource`]).
    pub fn run_algorithm(&self, request: &AlgorithmRun, files: &[PathBuf]) -> Result<AlgoStats> {
        let spec = self.registry.lookup(&request.algorithm)?;

        let discover = if request.discover.is_empty() {
            &spec.discover
        } else {
            &request.discover
        };
        let bin = resolve_binary(
            &spec.name,
            request.bin.as_deref(),
            discover,
            &self.config.root_dir,
        )
        .context(MissingResource)?;
        debug!(algo = %spec.name, bin = %bin.display(), "resolved binary");

        if request.skip_existing && spec.csv.key_cols.is_empty() {
            bail!("csv.key_cols must be provided when skip_existing is enabled");
        }

        let sweep_params = build_sweep_params(spec, &request.overrides)?;
        let mut base = spec.base_params.clone();
        base.extend(request.base_params.clone());

        let ledger_state = if request.dry_run {
            None
        } else {
            let path = self.config.out_dir.join(spec.csv.ledger_name(&spec.name));
            let ledger = Ledger::open(&path, &spec.csv.header)?;
            let keys = if request.skip_existing {
                Some(ledger.existing_keys(&spec.csv.key_cols)?)
            } else {
                None
            };
            Some((ledger, keys))
        };
        let (ledger, mut keys) = match ledger_state {
            Some((ledger, keys)) => (Some(ledger), keys),
            None => (None, None),
        };

        let mut stats = AlgoStats::default();
        for file in files {
            let file_name = file
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_default();
            let combinations = expand(&sweep_params, &base);
            info!(
                algo = %spec.name,
                file = %file_name,
                combinations = combinations.len(),
                "sweeping file"
            );

            let cache = if request.cache && is_compressed(file) && !request.dry_run {
                match DecompressedCache::materialize(file, &self.config.out_dir) {
                    Ok(cache) => Some(cache),
                    Err(err) => {
                        warn!(
                            file = %file.display(),
                            err = %err,
                            "decompression cache failed, streaming instead"
                        );
                        None
                    }
                }
            } else {
                None
            };

            for combination in &combinations {
                let memlimits: Vec<Option<u64>> = if request.memlimits.is_empty() {
                    vec![None]
                } else {
                    request.memlimits.iter().copied().map(Some).collect()
                };
                for memlimit in memlimits {
                    let auto = compute_auto_params(
                        spec,
                        combination,
                        &self.config.out_dir,
                        &spec.name,
                        file,
                    );
                    let mut derived = combination.clone();
                    derived.extend(auto);

                    if let Some(keys) = &keys {
                        let prospective =
                            build_row(&spec.csv.header, &file_name, memlimit, &BTreeMap::new(), &derived);
                        if key_is_resolved(&prospective, &spec.csv.key_cols) {
                            if let Some(key) = uniqueness_key(&prospective, &spec.csv.key_cols) {
                                if keys.contains(&key) {
                                    debug!(key = %key, "skip existing");
                                    stats.tally(RunStatus::SkippedExisting);
                                    continue;
                                }
                            }
                        }
                    }

                    let (input, input_mode) = match &cache {
                        Some(cache) => (cache.path(), InputMode::Path),
                        None if is_compressed(file) => (file.as_path(), InputMode::Stdin),
                        None => (file.as_path(), InputMode::Path),
                    };
                    let argv =
                        format_command(&spec.cmd_template, &derived, input, input_mode, &bin)?;

                    if request.dry_run {
                        println!("RUN: {}", display_command(&argv));
                        stats.planned += 1;
                        continue;
                    }

                    let Some(ledger) = &ledger else {
                        continue;
                    };
                    let status = self.execute_and_record(ExecuteArgs {
                        spec,
                        request,
                        argv: &argv,
                        input,
                        input_mode,
                        file_name: &file_name,
                        derived: &derived,
                        memlimit,
                        ledger,
                        keys: keys.as_mut(),
                    });
                    stats.tally(status);
                }
            }

            if let Some(cache) = cache {
                cache.remove();
            }
        }

        info!(
            algo = %spec.name,
            recorded = stats.recorded,
            skipped = stats.skipped,
            wasted = stats.wasted,
            failed = stats.failed,
            "algorithm sweep finished"
        );
        Ok(stats)
    }

    fn execute_and_record(&self, args: ExecuteArgs<'_>) -> RunStatus {
        let ExecuteArgs {
            spec,
            request,
            argv,
            input,
            input_mode,
            file_name,
            derived,
            memlimit,
            ledger,
            keys,
        } = args;

        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let rand_tag: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
        let short = short_hash_tag(
            derived,
            &[
                ("file", file_name.to_string()),
                (
                    "mem",
                    memlimit.map(|ml| ml.to_string()).unwrap_or_default(),
                ),
            ],
        );
        let memlimit_tag = memlimit
            .map(|ml| format!(".m{ml}mb"))
            .unwrap_or_default();
        let log_path = self.config.out_dir.join(format!(
            "{}.{}.{}.{:06x}{}.{}.log",
            slug_value(file_name, 80),
            spec.name,
            short,
            rand_tag,
            memlimit_tag,
            stamp
        ));

        let header = LogHeader {
            timestamp: stamp,
            algo: spec.name.clone(),
            file: file_name.to_string(),
            input_path: input.display().to_string(),
            cmd: display_command(argv),
            params: derived.clone(),
            memlimit_mb: memlimit,
        }
        .render();

        let output = run_streaming(&RunRequest {
            argv,
            input,
            stream_decompress: input_mode == InputMode::Stdin,
            log_path: &log_path,
            log_header: &header,
            memlimit_mb: memlimit,
            timeout: request.timeout,
        });

        let status = match output {
            Err(err) => {
                warn!(err = %format!("{err:#}"), "run failed to execute");
                RunStatus::Failed
            }
            Ok(output) => {
                if !output.success() {
                    debug!(exit_code = ?output.exit_code, timed_out = output.timed_out, "run failed");
                    RunStatus::Failed
                } else {
                    match parse_required_keys(&output.lines, &spec.csv.required_keys) {
                        None => {
                            debug!("no summary line with required keys");
                            RunStatus::Failed
                        }
                        Some(parsed) => {
                            let row = build_row(
                                &spec.csv.header,
                                file_name,
                                memlimit,
                                &parsed,
                                derived,
                            );
                            self.append_row(ledger, &spec.csv.key_cols, row, keys)
                        }
                    }
                }
            }
        };

        match status {
            RunStatus::Recorded => {
                if let Err(err) = std::fs::remove_file(&log_path) {
                    debug!(log = %log_path.display(), err = %err, "could not delete run log");
                }
            }
            RunStatus::Wasted => {
                warn!(log = %log_path.display(), "already recorded, kept log");
            }
            RunStatus::Failed => {
                warn!(log = %log_path.display(), "run failed or unparsed, kept log");
            }
            RunStatus::SkippedExisting => {}
        }
        status
    }

    fn append_row(
        &self,
        ledger: &Ledger,
        key_cols: &[usize],
        row: Vec<String>,
        keys: Option<&mut ExistingKeySet>,
    ) -> RunStatus {
        let key = uniqueness_key(&row, key_cols);
        if let (Some(keys), Some(key)) = (&keys, &key) {
            if keys.contains(key) {
                debug!(key = %key, "already recorded after execution");
                return RunStatus::Wasted;
            }
        }
        match ledger.append(&row) {
            Ok(()) => {
                if let (Some(keys), Some(key)) = (keys, key) {
                    keys.insert(key);
                }
                RunStatus::Recorded
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to append ledger row");
                RunStatus::Failed
            }
        }
    }
}

struct ExecuteArgs<'a> {
    spec: &'a AlgorithmSpec,
    request: &'a AlgorithmRun,
    argv: &'a [String],
    input: &'a Path,
    input_mode: InputMode,
    file_name: &'a str,
    derived: &'a Combination,
    memlimit: Option<u64>,
    ledger: &'a Ledger,
    keys: Option<&'a mut ExistingKeySet>,
}

/// Resolve the sweep parameter list from registry declarations and caller
/// overrides.
fn build_sweep_params(spec: &AlgorithmSpec, overrides: &ParamOverrides) -> Result<Vec<SweepParam>> {
    match overrides {
        ParamOverrides::None => defaults_only(spec),
        ParamOverrides::Map(map) => {
            for name in map.keys() {
                if !spec.params.iter().any(|p| &p.name == name) {
                    bail!(
                        "unknown parameter '{name}' for algorithm {} (declared: {})",
                        spec.name,
                        spec.params
                            .iter()
                            .map(|p| p.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                }
            }
            let mut params = Vec::with_capacity(spec.params.len());
            for pdef in &spec.params {
                let values = match map.get(&pdef.name) {
                    Some(values) => values.clone(),
                    None => pdef.default_values()?,
                };
                push_validated(&mut params, pdef, values)?;
            }
            Ok(params)
        }
        ParamOverrides::List(entries) => {
            let mut params = Vec::new();
            for entry in entries {
                let pdef = spec.params.iter().find(|p| p.name == entry.name);
                let values = match pdef {
                    Some(pdef) => validate_values(&entry.name, &entry.values, pdef)?,
                    None => entry.values.clone(),
                };
                if values.is_empty() {
                    continue;
                }
                let when = entry
                    .when
                    .clone()
                    .or_else(|| pdef.and_then(|p| p.when.clone()));
                params.push(SweepParam {
                    name: entry.name.clone(),
                    values,
                    when,
                });
            }
            // Registry parameters not mentioned keep their default sweeps.
            for pdef in &spec.params {
                if entries.iter().any(|e| e.name == pdef.name) {
                    continue;
                }
                let values = pdef.default_values()?;
                push_validated(&mut params, pdef, values)?;
            }
            Ok(params)
        }
    }
}

fn defaults_only(spec: &AlgorithmSpec) -> Result<Vec<SweepParam>> {
    let mut params = Vec::with_capacity(spec.params.len());
    for pdef in &spec.params {
        let values = pdef.default_values()?;
        push_validated(&mut params, pdef, values)?;
    }
    Ok(params)
}

fn push_validated(params: &mut Vec<SweepParam>, pdef: &ParamSpec, values: Vec<String>) -> Result<()> {
    let values = validate_values(&pdef.name, &values, pdef)?;
    if values.is_empty() {
        return Ok(());
    }
    params.push(SweepParam {
        name: pdef.name.clone(),
        values,
        when: pdef.when.clone(),
    });
    Ok(())
}

/// Compute auto-derived parameters for one (combination, file) pair.
///
/// Template variables: every combination key plus `algo`, `out_dir`, `file`,
/// `file_stem`, and `file_root` (all extensions stripped). An auto-parameter
/// whose condition fails against those variables is simply absent.
fn compute_auto_params(
    spec: &AlgorithmSpec,
    combination: &Combination,
    out_dir: &Path,
    algo: &str,
    file: &Path,
) -> Combination {
    let mut auto = Combination::new();
    if spec.auto_params.is_empty() {
        return auto;
    }

    let file_name = file
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_stem = file
        .file_stem()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut vars = combination.clone();
    vars.insert("algo".to_string(), algo.to_string());
    vars.insert("out_dir".to_string(), out_dir.display().to_string());
    vars.insert("file".to_string(), file_name.clone());
    vars.insert("file_stem".to_string(), file_stem);
    vars.insert("file_root".to_string(), file_root(&file_name));

    for ap in &spec.auto_params {
        if ap.when.as_ref().is_some_and(|c| !c.evaluate(&vars)) {
            continue;
        }
        let mut value = ap.template.clone();
        for (key, replacement) in &vars {
            value = value.replace(&format!("${{{key}}}"), replacement);
        }
        if ap.join_out_dir {
            value = out_dir.join(&value).display().to_string();
        }
        auto.insert(ap.name.clone(), value);
    }
    auto
}

/// Strip every extension: `toy.cnf.xz` becomes `toy`.
fn file_root(name: &str) -> String {
    let mut root = name;
    loop {
        match Path::new(root).file_stem().and_then(|s| s.to_str()) {
            Some(stem) if stem != root => root = stem,
            _ => break,
        }
    }
    root.to_string()
}

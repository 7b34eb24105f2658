//! CLI command implementations.
//!
//! Each command returns the process exit code; `main` only parses arguments
//! and dispatches here.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use tracing::warn;

use crate::core::params::expand_values;
use crate::engine::{
    AlgorithmRun, Engine, EngineConfig, ListOverride, MissingResource, ParamOverrides,
};
use crate::exit_codes;
use crate::io::batch::{BatchAlgorithm, ParameterOverrides, load_batch_config};
use crate::io::discover::{FileSelection, list_bench_files, select_files};
use crate::io::registry::Registry;

const DEFAULT_REGISTRY: &str = "configs/algorithms.json";

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Path to the algorithm registry (.json or .yaml).
    #[arg(long, default_value = DEFAULT_REGISTRY)]
    pub registry: PathBuf,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Algorithm name from the registry.
    pub algorithm: String,
    /// Number of random files to run.
    #[arg(short = 'n', long = "num", default_value_t = 0)]
    pub num: usize,
    /// Path to the binary; auto-discovered when omitted.
    #[arg(long)]
    pub bin: Option<PathBuf>,
    /// Override a parameter's swept values; repeatable.
    #[arg(long = "param", value_name = "NAME=V1,V2", value_parser = parse_param_override)]
    pub params: Vec<(String, Vec<String>)>,
    /// Memory limits in MiB (address-space limiting, Linux only).
    #[arg(long, value_delimiter = ',')]
    pub memlimits: Vec<u64>,
    /// Skip runs whose uniqueness key is already in the ledger.
    #[arg(long)]
    pub skip_existing: bool,
    /// Stream decompression on every run instead of caching once per file.
    #[arg(long)]
    pub no_cache: bool,
    /// Reuse the file list from a prior CSV instead of sampling.
    #[arg(long)]
    pub reuse_files: bool,
    /// CSV to take the file list from; defaults to the algorithm's ledger.
    #[arg(long = "from-csv")]
    pub from_csv: Option<PathBuf>,
    /// Seed for reproducible file sampling.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Print resolved commands without executing anything.
    #[arg(long)]
    pub dry_run: bool,
    /// Kill a run after this many seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    #[arg(long, default_value = "benchmarks")]
    pub bench_dir: PathBuf,
    #[arg(long, default_value = "out")]
    pub out_dir: PathBuf,
    /// Path to the algorithm registry (.json or .yaml).
    #[arg(long, default_value = DEFAULT_REGISTRY)]
    pub registry: PathBuf,
    /// Project root for binary discovery.
    #[arg(long, default_value = ".")]
    pub root_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Path to the batch config file (.json or .yaml).
    #[arg(long)]
    pub file: PathBuf,
    /// Path to the algorithm registry (.json or .yaml).
    #[arg(long, default_value = DEFAULT_REGISTRY)]
    pub registry: PathBuf,
    /// Project root for binary discovery.
    #[arg(long, default_value = ".")]
    pub root_dir: PathBuf,
}

/// List algorithms declared in the registry.
pub fn cmd_list(args: &ListArgs) -> Result<i32> {
    let registry = Registry::load(&args.registry)?;
    for spec in registry.iter() {
        match &spec.help {
            Some(help) => println!("{:<20} {help}", spec.name),
            None => println!("{}", spec.name),
        }
    }
    Ok(exit_codes::OK)
}

/// Sweep one algorithm over selected benchmark files.
pub fn cmd_run(args: &RunArgs) -> Result<i32> {
    if !args.reuse_files && args.num == 0 {
        bail!("-n/--num must be > 0 unless --reuse-files is given");
    }
    let registry = Registry::load(&args.registry)?;
    let engine = Engine::new(
        registry,
        EngineConfig {
            bench_dir: args.bench_dir.clone(),
            out_dir: args.out_dir.clone(),
            root_dir: args.root_dir.clone(),
        },
    );
    let ledger_name = engine
        .registry()
        .lookup(&args.algorithm)?
        .csv
        .ledger_name(&args.algorithm);

    let all_files = list_bench_files(&args.bench_dir)?;
    if all_files.is_empty() {
        eprintln!("no benchmark files found in {}", args.bench_dir.display());
        return Ok(exit_codes::NO_INPUT_FILES);
    }
    let selection = if args.reuse_files {
        FileSelection::ReuseCsv(
            args.from_csv
                .clone()
                .unwrap_or_else(|| args.out_dir.join(&ledger_name)),
        )
    } else {
        FileSelection::RandomSample {
            count: args.num,
            seed: args.seed,
        }
    };
    let files = select_files(&all_files, &selection)?;

    let mut request = AlgorithmRun::new(&args.algorithm);
    request.bin = args.bin.clone();
    request.overrides = if args.params.is_empty() {
        ParamOverrides::None
    } else {
        ParamOverrides::Map(args.params.iter().cloned().collect())
    };
    request.memlimits = args.memlimits.clone();
    request.skip_existing = args.skip_existing;
    request.cache = !args.no_cache;
    request.dry_run = args.dry_run;
    request.timeout = args.timeout_secs.map(Duration::from_secs);

    match engine.run_algorithm(&request, &files) {
        Ok(stats) => Ok(if stats.ok() {
            exit_codes::OK
        } else {
            exit_codes::FAILURE
        }),
        Err(err) if err.downcast_ref::<MissingResource>().is_some() => {
            eprintln!("{err:#}");
            Ok(exit_codes::MISSING_RESOURCE)
        }
        Err(err) => Err(err),
    }
}

/// Run every algorithm listed in a batch config file.
///
/// Errors scoped to one algorithm are logged and the batch continues; the
/// exit code aggregates what happened.
pub fn cmd_batch(args: &BatchArgs) -> Result<i32> {
    let config = load_batch_config(&args.file)?;
    let registry = Registry::load(&args.registry)?;
    let bench_dir = config
        .bench_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("benchmarks"));
    let out_dir = config
        .out_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("out"));
    let engine = Engine::new(
        registry,
        EngineConfig {
            bench_dir: bench_dir.clone(),
            out_dir,
            root_dir: args.root_dir.clone(),
        },
    );

    let all_files = list_bench_files(&bench_dir)?;
    if all_files.is_empty() {
        eprintln!("no benchmark files found in {}", bench_dir.display());
        return Ok(exit_codes::NO_INPUT_FILES);
    }
    let selection = match &config.files.reuse_csv {
        Some(csv) => FileSelection::ReuseCsv(csv.clone()),
        None => FileSelection::RandomSample {
            count: config.files.count,
            seed: config.files.seed,
        },
    };
    let files = select_files(&all_files, &selection)?;

    let mut any_failed = false;
    let mut missing_resource = false;
    for algo in &config.algorithms {
        let request = match batch_request(algo) {
            Ok(request) => request,
            Err(err) => {
                warn!(algo = %algo.name, err = %format!("{err:#}"), "invalid algorithm entry");
                any_failed = true;
                continue;
            }
        };
        match engine.run_algorithm(&request, &files) {
            Ok(stats) => {
                if !stats.ok() {
                    any_failed = true;
                }
            }
            Err(err) if err.downcast_ref::<MissingResource>().is_some() => {
                warn!(algo = %algo.name, err = %format!("{err:#}"), "binary not resolved, skipping algorithm");
                missing_resource = true;
            }
            Err(err) => {
                warn!(algo = %algo.name, err = %format!("{err:#}"), "algorithm failed");
                any_failed = true;
            }
        }
    }

    Ok(if any_failed {
        exit_codes::FAILURE
    } else if missing_resource {
        exit_codes::MISSING_RESOURCE
    } else {
        exit_codes::OK
    })
}

/// Convert a batch entry into an engine request, expanding value specs.
fn batch_request(algo: &BatchAlgorithm) -> Result<AlgorithmRun> {
    let overrides = match &algo.parameters {
        ParameterOverrides::Map(map) if map.is_empty() => ParamOverrides::None,
        ParameterOverrides::Map(map) => {
            let mut expanded = BTreeMap::new();
            for (name, spec) in map {
                expanded.insert(name.clone(), expand_values(name, spec)?);
            }
            ParamOverrides::Map(expanded)
        }
        ParameterOverrides::List(entries) => {
            let mut list = Vec::with_capacity(entries.len());
            for entry in entries {
                let values = match &entry.values {
                    Some(spec) => expand_values(&entry.name, spec)?,
                    None => Vec::new(),
                };
                list.push(ListOverride {
                    name: entry.name.clone(),
                    values,
                    when: entry.when.clone(),
                });
            }
            ParamOverrides::List(list)
        }
    };

    let mut request = AlgorithmRun::new(&algo.name);
    request.bin = algo.bin.clone();
    request.discover = algo.discover.clone();
    request.base_params = algo.base_params.clone();
    request.overrides = overrides;
    request.memlimits = algo.memlimits.clone();
    request.skip_existing = algo.skip_existing;
    request.cache = algo.cache;
    request.timeout = algo.timeout_secs.map(Duration::from_secs);
    Ok(request)
}

fn parse_param_override(raw: &str) -> Result<(String, Vec<String>), String> {
    let Some((name, values)) = raw.split_once('=') else {
        return Err(format!("expected NAME=V1,V2 but got '{raw}'"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err("parameter name must not be empty".to_string());
    }
    let values: Vec<String> = values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect();
    if values.is_empty() {
        return Err(format!("no values given for parameter '{name}'"));
    }
    Ok((name.to_string(), values))
}

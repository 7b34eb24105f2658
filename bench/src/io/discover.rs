//! Benchmark-file discovery, file selection, and binary resolution.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// List benchmark instances (`*.cnf`, `*.cnf.xz`) recursively under
/// `bench_dir`, sorted by path.
pub fn list_bench_files(bench_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !bench_dir.exists() {
        return Ok(files);
    }
    for entry in WalkDir::new(bench_dir) {
        let entry = entry.with_context(|| format!("walk {}", bench_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.ends_with(".cnf") || name.ends_with(".cnf.xz") {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Whether an input file must be decompressed before the target can read it.
pub fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "xz")
}

/// How input files are chosen from the full benchmark listing.
#[derive(Debug, Clone)]
pub enum FileSelection {
    /// Pick `count` files at random; a seed makes the pick reproducible.
    RandomSample { count: usize, seed: Option<u64> },
    /// Reuse the file column of a prior ledger.
    ReuseCsv(PathBuf),
}

/// Apply a selection policy to the listed files.
pub fn select_files(all_files: &[PathBuf], selection: &FileSelection) -> Result<Vec<PathBuf>> {
    match selection {
        FileSelection::RandomSample { count, seed } => {
            let mut shuffled = all_files.to_vec();
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(*seed),
                None => StdRng::from_entropy(),
            };
            shuffled.shuffle(&mut rng);
            shuffled.truncate(*count);
            debug!(requested = count, selected = shuffled.len(), "random file sample");
            Ok(shuffled)
        }
        FileSelection::ReuseCsv(csv_path) => reuse_from_csv(all_files, csv_path),
    }
}

/// Reuse the first column of a prior CSV: unique file names, sorted; names no
/// longer present in the benchmark tree warn and are skipped.
fn reuse_from_csv(all_files: &[PathBuf], csv_path: &Path) -> Result<Vec<PathBuf>> {
    if !csv_path.is_file() {
        bail!("reuse CSV not found: {}", csv_path.display());
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("read reuse CSV {}", csv_path.display()))?;

    let mut names: Vec<String> = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("read row of {}", csv_path.display()))?;
        if let Some(name) = record.get(0) {
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    names.dedup();

    let mut selected = Vec::with_capacity(names.len());
    for name in &names {
        match all_files.iter().find(|p| {
            p.file_name().is_some_and(|f| f.to_string_lossy() == name.as_str())
        }) {
            Some(path) => selected.push(path.clone()),
            None => warn!(file = %name, "not found in benchmark tree, skipping"),
        }
    }
    debug!(reused = selected.len(), from = %csv_path.display(), "reusing file list");
    Ok(selected)
}

/// Resolve the binary for `algorithm` through an ordered chain:
/// an explicit path, then declared candidate paths under `root`, then a
/// recursive search under `root/build` for an executable named like the
/// algorithm. The first success wins.
pub fn resolve_binary(
    algorithm: &str,
    explicit: Option<&Path>,
    candidates: &[String],
    root: &Path,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return explicit_binary(path);
    }
    if let Some(path) = declared_candidate(candidates, root) {
        return Ok(path);
    }
    search_build_tree(&root.join("build"), algorithm).ok_or_else(|| {
        anyhow!(
            "could not resolve binary for {algorithm}; pass --bin or declare discover paths in the registry"
        )
    })
}

/// Tier one: a caller-supplied path, which must exist and be executable.
fn explicit_binary(path: &Path) -> Result<PathBuf> {
    if is_executable(path) {
        Ok(path.to_path_buf())
    } else {
        bail!("binary not executable: {}", path.display())
    }
}

/// Tier two: first declared candidate (relative to `root`) that exists and is
/// executable.
fn declared_candidate(candidates: &[String], root: &Path) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|c| root.join(c))
        .find(|p| is_executable(p))
}

/// Tier three: recursive search for an executable file named `target`.
fn search_build_tree(build_dir: &Path, target: &str) -> Option<PathBuf> {
    if !build_dir.exists() {
        return None;
    }
    WalkDir::new(build_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| entry.file_name().to_string_lossy() == target && is_executable(entry.path()))
        .map(|entry| entry.into_path())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file()
        && path
            .metadata()
            .is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

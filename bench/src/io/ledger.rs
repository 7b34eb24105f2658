//! CSV ledger: one append-only results file per algorithm.
//!
//! The ledger is the durable record of completed runs. Rows are never updated
//! or deleted; idempotence across invocations comes from re-reading the file
//! into an [`ExistingKeySet`] at the start of each session.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use csv::{ReaderBuilder, WriterBuilder};
use tracing::debug;

use crate::core::summary::uniqueness_key;

/// Uniqueness keys of all rows already present in a ledger.
#[derive(Debug, Default)]
pub struct ExistingKeySet {
    keys: HashSet<String>,
}

impl ExistingKeySet {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Record a freshly appended key so later combinations in the same
    /// session observe it.
    pub fn insert(&mut self, key: String) {
        self.keys.insert(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Handle to one algorithm's CSV ledger.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    header: Vec<String>,
}

impl Ledger {
    /// Open the ledger, creating it with a header row when missing.
    pub fn open(path: &Path, header: &[String]) -> Result<Self> {
        if header.is_empty() {
            bail!("ledger header must not be empty");
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create ledger dir {}", parent.display()))?;
        }
        if !path.exists() {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .with_context(|| format!("create ledger {}", path.display()))?;
            let mut writer = WriterBuilder::new()
                .has_headers(false)
                .from_writer(BufWriter::new(file));
            writer
                .write_record(header)
                .with_context(|| format!("write ledger header {}", path.display()))?;
            writer
                .flush()
                .with_context(|| format!("flush ledger {}", path.display()))?;
            debug!(path = %path.display(), "created ledger");
        }
        Ok(Self {
            path: path.to_path_buf(),
            header: header.to_vec(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rebuild the uniqueness-key set from every row currently on disk.
    pub fn existing_keys(&self, key_cols: &[usize]) -> Result<ExistingKeySet> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("read ledger {}", self.path.display()))?;

        let mut keys = HashSet::new();
        for record in reader.records() {
            let record =
                record.with_context(|| format!("read ledger row {}", self.path.display()))?;
            let row: Vec<String> = record.iter().map(|s| s.to_string()).collect();
            if let Some(key) = uniqueness_key(&row, key_cols) {
                keys.insert(key);
            }
        }
        debug!(path = %self.path.display(), keys = keys.len(), "loaded existing keys");
        Ok(ExistingKeySet { keys })
    }

    /// Append one completed run's row.
    pub fn append(&self, row: &[String]) -> Result<()> {
        if row.len() != self.header.len() {
            bail!(
                "row has {} values but ledger {} has {} columns",
                row.len(),
                self.path.display(),
                self.header.len()
            );
        }
        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open ledger {}", self.path.display()))?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::new(file));
        writer
            .write_record(row)
            .with_context(|| format!("append ledger row {}", self.path.display()))?;
        writer
            .flush()
            .with_context(|| format!("flush ledger {}", self.path.display()))?;
        Ok(())
    }
}

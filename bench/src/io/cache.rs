//! Per-file decompression cache.
//!
//! A compressed input that will be swept many times can be decompressed once
//! into a private temp file; every combination then reads the plain file
//! instead of re-running the decompressor. The file is removed when the
//! input's combination loop ends; if the loop aborts early, the temp file's
//! drop guard still cleans up.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// A decompressed copy of one input file, removed on drop.
#[derive(Debug)]
pub struct DecompressedCache {
    file: NamedTempFile,
}

impl DecompressedCache {
    /// Decompress `input` once into a `cached_*.cnf` temp file under
    /// `out_dir`.
    pub fn materialize(input: &Path, out_dir: &Path) -> Result<Self> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("create out dir {}", out_dir.display()))?;
        let file = tempfile::Builder::new()
            .prefix("cached_")
            .suffix(".cnf")
            .tempfile_in(out_dir)
            .with_context(|| format!("create cache file in {}", out_dir.display()))?;

        let out_handle = file
            .reopen()
            .with_context(|| format!("reopen cache file {}", file.path().display()))?;
        let status = Command::new("xz")
            .arg("-dc")
            .arg("--")
            .arg(input)
            .stdout(Stdio::from(out_handle))
            .status()
            .with_context(|| format!("spawn xz -dc for {}", input.display()))?;
        if !status.success() {
            bail!(
                "xz -dc failed for {} (status {:?})",
                input.display(),
                status.code()
            );
        }

        debug!(
            input = %input.display(),
            cached = %file.path().display(),
            "decompressed once"
        );
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Remove the cached file now, logging (not failing) on error.
    pub fn remove(self) {
        let path = self.file.path().to_path_buf();
        if let Err(err) = self.file.close() {
            warn!(path = %path.display(), err = %err, "failed to remove cache file");
        }
    }
}

//! Stable exit codes for bench CLI commands.

/// Command succeeded; every unit of work recorded or skipped cleanly.
pub const OK: i32 = 0;
/// Generic failure: at least one run failed or a config error aborted work.
pub const FAILURE: i32 = 1;
/// A required external resource (algorithm binary) could not be resolved.
pub const MISSING_RESOURCE: i32 = 2;
/// No benchmark input files were found under the bench directory.
pub const NO_INPUT_FILES: i32 = 4;

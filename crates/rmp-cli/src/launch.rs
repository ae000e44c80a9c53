//! The launch request: everything a platform launcher needs, normalised
//! once by the adapter and immutable afterwards.

use std::path::PathBuf;

#[derive(Debug)]
pub struct LaunchRequest {
    /// Absolute target directory; created (0755) by the adapter.
    pub target: PathBuf,
    /// Absolutised mapping strings, globs intact.
    pub mappings: Vec<String>,
    /// The command and its arguments; never empty.
    pub command: Vec<String>,
    /// Debug log file, from `--debug-log` or `RMP_DEBUG_LOG`.
    pub debug_log: Option<PathBuf>,
}

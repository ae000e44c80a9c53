//! Debug sink and tracing setup.
//!
//! The launcher gets structured `tracing` output on stderr like any
//! other CLI. The `--debug-log` file is a separate, much dumber channel:
//! it is shared with the injected library, which cannot assume a tracing
//! subscriber exists inside an arbitrary host process, so it writes
//! plain prefixed lines and flushes eagerly.

use std::fmt::Arguments;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared debug-log file handle. Cloneable and cheap to pass around;
/// disabled sinks cost one null check per call.
#[derive(Clone, Default)]
pub struct DebugSink {
    file: Option<Arc<Mutex<File>>>,
}

impl DebugSink {
    pub fn disabled() -> DebugSink {
        DebugSink::default()
    }

    /// Truncating open, used by the launcher which owns the log.
    pub fn create(path: &Path) -> DebugSink {
        Self::wrap(File::create(path).ok())
    }

    /// Appending open, used by the injected library so that the many
    /// processes of a tree share one log.
    pub fn append(path: &Path) -> DebugSink {
        Self::wrap(OpenOptions::new().create(true).append(true).open(path).ok())
    }

    fn wrap(file: Option<File>) -> DebugSink {
        DebugSink {
            file: file.map(|f| Arc::new(Mutex::new(f))),
        }
    }

    pub fn enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn log(&self, args: Arguments<'_>) {
        if let Some(file) = &self.file {
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "[remapper] {args}");
                let _ = f.flush();
            }
        }
    }
}

/// Log a formatted line to a [`DebugSink`].
#[macro_export]
macro_rules! rmp_debug {
    ($sink:expr, $($arg:tt)*) => {
        $sink.log(format_args!($($arg)*))
    };
}

/// One-shot tracing initialisation for the CLI. `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sink_swallows_everything() {
        let sink = DebugSink::disabled();
        assert!(!sink.enabled());
        rmp_debug!(sink, "goes nowhere {}", 42);
    }

    #[test]
    fn create_truncates_and_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbg.log");
        std::fs::write(&path, "stale contents\n").unwrap();

        let sink = DebugSink::create(&path);
        assert!(sink.enabled());
        rmp_debug!(sink, "target: {}", "/tgt");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "[remapper] target: /tgt\n");
    }

    #[test]
    fn append_accumulates_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbg.log");

        rmp_debug!(DebugSink::append(&path), "first");
        rmp_debug!(DebugSink::append(&path), "second");

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "[remapper] first\n[remapper] second\n");
    }

    #[test]
    fn unwritable_path_degrades_to_disabled() {
        let sink = DebugSink::create(Path::new("/no/such/dir/dbg.log"));
        assert!(!sink.enabled());
    }
}

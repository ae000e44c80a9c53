//! Environment contract: variable names, default directories and the
//! per-platform injection constants.
//!
//! `RMP_TARGET`/`RMP_MAPPINGS` flow from the launcher into the injected
//! library; `RMP_CONFIG`/`RMP_CACHE`/`RMP_DEBUG_LOG` are accepted from
//! the user and re-exported so the whole process tree agrees on one
//! configuration.

use std::env;
use std::path::{Path, PathBuf};

use crate::path::{absolutize, home_dir};

/// Target directory, exported for the injected library.
pub const ENV_TARGET: &str = "RMP_TARGET";
/// Colon-joined absolute mappings, exported for the injected library.
pub const ENV_MAPPINGS: &str = "RMP_MAPPINGS";
/// Base configuration directory (default `~/.remapper`).
pub const ENV_CONFIG: &str = "RMP_CONFIG";
/// Trampoline cache directory (default `$RMP_CONFIG/cache`).
pub const ENV_CACHE: &str = "RMP_CACHE";
/// Debug log file; presence enables debug logging.
pub const ENV_DEBUG_LOG: &str = "RMP_DEBUG_LOG";

/// The dynamic-loader injection variable for this platform.
#[cfg(target_os = "macos")]
pub const ENV_INSERT_LIBRARIES: &str = "DYLD_INSERT_LIBRARIES";
#[cfg(not(target_os = "macos"))]
pub const ENV_INSERT_LIBRARIES: &str = "LD_PRELOAD";

/// File name of the extracted interposition library.
#[cfg(target_os = "macos")]
pub const LIB_FILE_NAME: &str = "interpose.dylib";
#[cfg(not(target_os = "macos"))]
pub const LIB_FILE_NAME: &str = "interpose.so";

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Configuration directory: `$RMP_CONFIG`, else `~/.remapper`, else
/// `/tmp/.remapper` for the home-less case.
pub fn config_dir() -> PathBuf {
    if let Some(cfg) = env_non_empty(ENV_CONFIG) {
        if let Ok(abs) = absolutize(&cfg) {
            return abs;
        }
    }
    match home_dir() {
        Some(home) => home.join(".remapper"),
        None => PathBuf::from("/tmp/.remapper"),
    }
}

/// Cache directory: `$RMP_CACHE`, else `<config>/cache`.
pub fn cache_dir(config_dir: &Path) -> PathBuf {
    if let Some(cache) = env_non_empty(ENV_CACHE) {
        if let Ok(abs) = absolutize(&cache) {
            return abs;
        }
    }
    config_dir.join("cache")
}

/// Debug log path from the environment, if any.
pub fn debug_log_from_env() -> Option<PathBuf> {
    env_non_empty(ENV_DEBUG_LOG).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_env;

    fn with_env<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = test_env::lock();
        let saved: Vec<(String, Option<std::ffi::OsString>)> = vars
            .iter()
            .map(|(k, _)| (k.to_string(), env::var_os(k)))
            .collect();
        for (k, v) in vars {
            match v {
                Some(v) => env::set_var(k, v),
                None => env::remove_var(k),
            }
        }
        let r = f();
        for (k, v) in saved {
            match v {
                Some(v) => env::set_var(&k, v),
                None => env::remove_var(&k),
            }
        }
        r
    }

    #[test]
    fn config_dir_prefers_env() {
        with_env(&[(ENV_CONFIG, Some("/cfg")), ("HOME", Some("/h"))], || {
            assert_eq!(config_dir(), PathBuf::from("/cfg"));
        });
    }

    #[test]
    fn config_dir_defaults_to_home() {
        with_env(&[(ENV_CONFIG, None), ("HOME", Some("/h"))], || {
            assert_eq!(config_dir(), PathBuf::from("/h/.remapper"));
        });
    }

    #[test]
    fn cache_dir_defaults_under_config() {
        with_env(&[(ENV_CACHE, None)], || {
            assert_eq!(cache_dir(Path::new("/cfg")), PathBuf::from("/cfg/cache"));
        });
        with_env(&[(ENV_CACHE, Some("/elsewhere"))], || {
            assert_eq!(cache_dir(Path::new("/cfg")), PathBuf::from("/elsewhere"));
        });
    }

    #[test]
    fn empty_env_values_are_ignored() {
        with_env(
            &[(ENV_CONFIG, Some("")), (ENV_DEBUG_LOG, Some("")), ("HOME", Some("/h"))],
            || {
                assert_eq!(config_dir(), PathBuf::from("/h/.remapper"));
                assert!(debug_log_from_env().is_none());
            },
        );
    }
}

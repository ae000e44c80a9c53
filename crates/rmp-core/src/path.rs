//! Path utilities: home lookup, tilde expansion, absolutisation,
//! recursive directory creation and `$PATH` resolution.
//!
//! All helpers are thread-safe and never consult global mutable state
//! beyond the process environment.

use std::env;
use std::ffi::CString;
use std::fs::DirBuilder;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

/// Home directory: `$HOME` when set and non-empty, otherwise the user
/// database.
pub fn home_dir() -> Option<PathBuf> {
    if let Some(home) = env::var_os("HOME") {
        if !home.is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    dirs::home_dir().filter(|h| !h.as_os_str().is_empty())
}

/// Expand a leading `~` or `~/` to the home directory. Anything else
/// (including `~user`) is left literal.
pub fn expand_tilde(path: &str) -> String {
    if !path.starts_with('~') {
        return path.to_string();
    }
    let rest = &path[1..];
    if !rest.is_empty() && !rest.starts_with('/') {
        return path.to_string();
    }
    match home_dir() {
        Some(home) => format!("{}{}", home.display(), rest),
        None => path.to_string(),
    }
}

/// Tilde-expand and make absolute against the current directory.
pub fn absolutize(path: &str) -> io::Result<PathBuf> {
    let expanded = expand_tilde(path);
    if expanded.starts_with('/') {
        return Ok(PathBuf::from(expanded));
    }
    Ok(env::current_dir()?.join(expanded))
}

/// `mkdir -p` with an explicit mode. Existing components are fine.
pub fn mkdirs(path: &Path, mode: u32) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(mode).create(path)
}

/// Resolve a program name the way `execvp` would: a name containing `/`
/// is taken as-is, a bare name walks the colon-separated `$PATH`,
/// accepting the first executable entry.
pub fn resolve_in_path(file: &str) -> Option<PathBuf> {
    if file.is_empty() {
        return None;
    }
    if file.contains('/') {
        return Some(PathBuf::from(file));
    }

    let path_env = env::var_os("PATH")?;
    for dir in env::split_paths(&path_env) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let candidate = dir.join(file);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

fn is_executable(path: &Path) -> bool {
    let Ok(c) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c.as_ptr(), libc::X_OK) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    use crate::test_env;

    #[test]
    fn tilde_expansion_forms() {
        let _guard = test_env::lock();
        let old_home = std::env::var_os("HOME");
        std::env::set_var("HOME", "/h");

        assert_eq!(expand_tilde("~"), "/h");
        assert_eq!(expand_tilde("~/x/y"), "/h/x/y");
        // ~user is not supported and stays literal.
        assert_eq!(expand_tilde("~root/x"), "~root/x");
        assert_eq!(expand_tilde("/abs/~"), "/abs/~");

        match old_home {
            Some(h) => std::env::set_var("HOME", h),
            None => std::env::remove_var("HOME"),
        }
    }

    #[test]
    fn absolutize_joins_cwd() {
        let abs = absolutize("rel/path").unwrap();
        assert!(abs.is_absolute());
        assert!(abs.ends_with("rel/path"));

        assert_eq!(absolutize("/already/abs").unwrap(), PathBuf::from("/already/abs"));
    }

    #[test]
    fn mkdirs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b/c");
        mkdirs(&deep, 0o755).unwrap();
        mkdirs(&deep, 0o755).unwrap();
        assert!(deep.is_dir());
    }

    #[test]
    fn resolve_in_path_copies_slashed_names() {
        assert_eq!(
            resolve_in_path("./bin/tool").unwrap(),
            PathBuf::from("./bin/tool")
        );
        assert!(resolve_in_path("").is_none());
    }

    #[test]
    fn resolve_in_path_walks_path() {
        let _guard = test_env::lock();
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("some-prog");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let old_path = std::env::var_os("PATH");
        std::env::set_var("PATH", dir.path());
        let found = resolve_in_path("some-prog");
        match old_path {
            Some(p) => std::env::set_var("PATH", p),
            None => std::env::remove_var("PATH"),
        }

        assert_eq!(found.unwrap(), exe);
    }

    #[test]
    fn resolve_in_path_skips_non_executables() {
        let _guard = test_env::lock();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("some-prog"), "data").unwrap();
        std::fs::set_permissions(
            dir.path().join("some-prog"),
            std::fs::Permissions::from_mode(0o644),
        )
        .unwrap();

        let old_path = std::env::var_os("PATH");
        std::env::set_var("PATH", dir.path());
        let found = resolve_in_path("some-prog");
        match old_path {
            Some(p) => std::env::set_var("PATH", p),
            None => std::env::remove_var("PATH"),
        }

        assert!(found.is_none());
    }
}

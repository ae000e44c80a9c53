//! Linux launcher: mount-namespace redirection.
//!
//! Library injection cannot cover statically linked binaries, so on
//! Linux the redirection happens at the VFS layer instead: enumerate
//! the filesystem entries the mappings match, enter an unprivileged
//! user+mount namespace, and bind-mount each target over its original.
//! Every descendant process inherits the namespace; the mounts vanish
//! with the process tree.

use std::convert::Infallible;
use std::fs::{self, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::unistd::{getgid, getuid};

use rmp_core::mapping::{glob_match, Mapping};
use rmp_core::path::mkdirs;
use rmp_core::rmp_debug;
use rmp_core::DebugSink;

use crate::launch::LaunchRequest;

/// Upper bound on bind mounts per launch.
pub const MAX_MOUNTS: usize = 256;

/// One bind mount to set up: `target` (under the target dir) mounted
/// over `original`.
#[derive(Debug, PartialEq, Eq)]
struct MountEntry {
    original: PathBuf,
    target: PathBuf,
    is_dir: bool,
}

pub fn launch(req: &LaunchRequest) -> Result<Infallible> {
    let debug = match &req.debug_log {
        Some(path) => DebugSink::create(path),
        None => DebugSink::disabled(),
    };

    rmp_debug!(debug, "target: {}", req.target.display());
    for (i, m) in req.mappings.iter().enumerate() {
        rmp_debug!(debug, "mapping[{i}]: {m}");
    }

    // Enumerate matches before touching the namespace: the originals
    // must already exist for bind mounts to have a mount point, and the
    // user was told to run the program once first.
    let mounts = enumerate_mounts(&req.mappings, &req.target, &debug)?;

    if mounts.is_empty() {
        rmp_debug!(debug, "no matching paths, executing without remapping");
        eprintln!(
            "remapper: warning: no paths matched the given patterns.\n\
             \x20 Has the program been run at least once to create its config files?\n\
             \x20 Executing without remapping."
        );
        let err = Command::new(&req.command[0]).args(&req.command[1..]).exec();
        return Err(err).with_context(|| format!("cannot exec {}", req.command[0]));
    }
    rmp_debug!(debug, "{} mount(s) to set up", mounts.len());

    create_targets(&mounts, &debug)?;
    enter_namespace(&debug)?;
    perform_mounts(&mounts, &debug)?;

    rmp_debug!(debug, "exec: {}", req.command.join(" "));
    let err = Command::new(&req.command[0]).args(&req.command[1..]).exec();
    Err(err).with_context(|| format!("cannot exec {}", req.command[0]))
}

/// Scan each mapping's parent directory for glob matches. Unreadable
/// parents are skipped, as are `.` and `..`.
fn enumerate_mounts(
    mappings: &[String],
    target_dir: &Path,
    debug: &DebugSink,
) -> Result<Vec<MountEntry>> {
    use std::os::unix::ffi::OsStrExt;

    let mut mounts = Vec::new();
    for raw in mappings {
        let Ok(mapping) = Mapping::parse(raw.as_bytes()) else {
            rmp_debug!(debug, "skipping unparseable mapping: {raw}");
            continue;
        };
        let parent = Path::new(std::str::from_utf8(mapping.parent()).unwrap_or("/"));

        rmp_debug!(
            debug,
            "scanning '{}' for '{}'",
            parent.display(),
            String::from_utf8_lossy(mapping.glob())
        );

        let entries = match fs::read_dir(parent) {
            Ok(e) => e,
            Err(e) => {
                rmp_debug!(debug, "  cannot read {}: {e}", parent.display());
                continue;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            if !glob_match(mapping.glob(), name.as_bytes()) {
                continue;
            }

            let original = parent.join(&name);
            // stat (not lstat): a matching symlink redirects what it
            // points at.
            let md = match fs::metadata(&original) {
                Ok(md) => md,
                Err(e) => {
                    rmp_debug!(debug, "  stat failed for {}: {e}", original.display());
                    continue;
                }
            };

            if mounts.len() >= MAX_MOUNTS {
                bail!("too many mount entries (max {MAX_MOUNTS})");
            }
            let m = MountEntry {
                target: target_dir.join(&name),
                is_dir: md.is_dir(),
                original,
            };
            rmp_debug!(
                debug,
                "mount entry: {} -> {} ({})",
                m.target.display(),
                m.original.display(),
                if m.is_dir { "dir" } else { "file" }
            );
            mounts.push(m);
        }
    }
    Ok(mounts)
}

/// Make sure every mount source exists under the target directory:
/// directories via mkdir -p, files as empty create-if-missing.
fn create_targets(mounts: &[MountEntry], debug: &DebugSink) -> Result<()> {
    for m in mounts {
        if m.is_dir {
            mkdirs(&m.target, 0o755)
                .with_context(|| format!("cannot create {}", m.target.display()))?;
            rmp_debug!(debug, "created target dir: {}", m.target.display());
        } else {
            if let Some(parent) = m.target.parent() {
                mkdirs(parent, 0o755)
                    .with_context(|| format!("cannot create {}", parent.display()))?;
            }
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&m.target)
                .with_context(|| format!("cannot create {}", m.target.display()))?;
            rmp_debug!(debug, "created target file: {}", m.target.display());
        }
    }
    Ok(())
}

/// Unshare into a fresh user+mount namespace and map this process to
/// uid/gid 0 inside it, which grants the capability bind mounts need.
fn enter_namespace(debug: &DebugSink) -> Result<()> {
    let uid = getuid();
    let gid = getgid();

    unshare(CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNS).map_err(|e| {
        let mut msg = format!("unshare(CLONE_NEWUSER | CLONE_NEWNS) failed: {e}");
        if e == nix::errno::Errno::EPERM {
            msg.push_str(
                "\n  Unprivileged user namespaces may be disabled on this system.\
                 \n  Try: sudo sysctl -w kernel.unprivileged_userns_clone=1",
            );
        }
        anyhow::anyhow!(msg)
    })?;

    // Required before gid_map on current kernels; absent on pre-3.19
    // ones, which is fine.
    if let Err(e) = fs::write("/proc/self/setgroups", "deny") {
        rmp_debug!(debug, "could not write /proc/self/setgroups: {e}");
    }

    fs::write("/proc/self/uid_map", format!("0 {uid} 1"))
        .context("failed to write /proc/self/uid_map")?;
    fs::write("/proc/self/gid_map", format!("0 {gid} 1"))
        .context("failed to write /proc/self/gid_map")?;

    rmp_debug!(debug, "namespace created: uid {uid} -> 0, gid {gid} -> 0");
    Ok(())
}

/// Bind each target over its original, recursively so sub-mounts inside
/// the source stay visible.
fn perform_mounts(mounts: &[MountEntry], debug: &DebugSink) -> Result<()> {
    for m in mounts {
        // The mount point must exist. Directories can be created
        // outright; for files create an empty one only when the
        // original vanished since enumeration.
        if m.is_dir {
            mkdirs(&m.original, 0o755)
                .with_context(|| format!("cannot create mount point {}", m.original.display()))?;
        } else if fs::metadata(&m.original).is_err() {
            if let Some(parent) = m.original.parent() {
                mkdirs(parent, 0o755)?;
            }
            let _ = OpenOptions::new().create(true).append(true).open(&m.original);
        }

        mount(
            Some(&m.target),
            &m.original,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )
        .with_context(|| {
            format!(
                "bind mount {} -> {} failed",
                m.target.display(),
                m.original.display()
            )
        })?;

        rmp_debug!(debug, "mounted: {} -> {}", m.target.display(), m.original.display());
    }
    Ok(())
}

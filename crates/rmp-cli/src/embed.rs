//! Embedded interposition library.
//!
//! The shim cdylib is baked into this binary at build time, so
//! `remapper` is self-contained: on each launch the blob is published
//! to `<config>/interpose.<ext>` and the injection variable points
//! there. The on-disk copy is refreshed only when missing or
//! size-mismatched: launcher and blob are versioned in lockstep at
//! build time, so size is the whole identity check.

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use rmp_core::path::mkdirs;
use rmp_core::settings::LIB_FILE_NAME;

static EMBEDDED_SHIM: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/embedded_shim"));

pub fn embedded_size() -> usize {
    EMBEDDED_SHIM.len()
}

/// Publish the library and return the path to inject. With an empty
/// blob (development build) fall back to a library already on disk.
pub fn ensure_library(config_dir: &Path) -> Result<PathBuf> {
    if EMBEDDED_SHIM.is_empty() {
        return find_on_disk().with_context(|| {
            format!(
                "this binary embeds no {LIB_FILE_NAME} and none was found \
                 next to it; rebuild with RMP_SHIM_LIB set"
            )
        });
    }

    let lib_path = config_dir.join(LIB_FILE_NAME);

    let up_to_date = fs::metadata(&lib_path)
        .map(|md| md.len() == EMBEDDED_SHIM.len() as u64)
        .unwrap_or(false);
    if up_to_date {
        return Ok(lib_path);
    }

    mkdirs(config_dir, 0o755)
        .with_context(|| format!("cannot create {}", config_dir.display()))?;

    // Temp-then-rename: a concurrent launcher never sees a half-written
    // library, and the losing writer's content is identical anyway.
    let tmp = lib_path.with_extension(format!("tmp.{}", std::process::id()));
    let write = (|| -> std::io::Result<()> {
        let mut f = File::create(&tmp)?;
        f.write_all(EMBEDDED_SHIM)?;
        f.sync_all()
    })();
    if let Err(e) = write {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("cannot write {}", tmp.display()));
    }
    if let Err(e) = fs::rename(&tmp, &lib_path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("cannot install {}", lib_path.display()));
    }

    Ok(lib_path)
}

/// Development fallback: the library next to the executable or in the
/// cargo target directory.
fn find_on_disk() -> Result<PathBuf> {
    let dylib = if cfg!(target_os = "macos") {
        "librmp_shim.dylib"
    } else {
        "librmp_shim.so"
    };

    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(dylib);
            if sibling.is_file() {
                return Ok(sibling);
            }
            if let Some(lib_dir) = dir.parent().map(|p| p.join("lib").join(dylib)) {
                if lib_dir.is_file() {
                    return Ok(lib_dir);
                }
            }
        }
    }

    for profile in ["target/debug", "target/release"] {
        let candidate = Path::new(profile).join(dylib);
        if candidate.is_file() {
            return Ok(candidate.canonicalize()?);
        }
    }

    bail!("no interposition library on disk")
}

//! Hardened-binary trampoline cache.
//!
//! A binary signed with the hardened runtime and no
//! `allow-dyld-environment-variables` entitlement makes the loader
//! silently drop `DYLD_INSERT_LIBRARIES`. The fix is a *trampoline*: a
//! bitwise copy of the binary, ad-hoc re-signed with a permissive
//! entitlements plist, cached on disk under the original's absolute
//! path and validated against the original's `(mtime, size)`.
//!
//! The signer (`codesign`) is an opaque subprocess. It itself calls
//! `exec`, which the injected library interposes, so every resolve runs
//! under a thread-local guard that turns the inner call into a
//! pass-through instead of infinite recursion.

use std::cell::Cell;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::logging::DebugSink;
use crate::path::{mkdirs, resolve_in_path};
use crate::pipe::run_capture;
use crate::rmp_debug;

/// The two capabilities a trampoline needs: keep dyld environment
/// variables, and accept our unsigned interpose library.
pub const ENTITLEMENTS_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>com.apple.security.cs.allow-dyld-environment-variables</key>
	<true/>
	<key>com.apple.security.cs.disable-library-validation</key>
	<true/>
</dict>
</plist>
"#;

/// Mach-O and fat-Mach-O magic numbers, native and byte-swapped.
const MACHO_MAGICS: [u32; 4] = [0xfeed_facf, 0xcffa_edfe, 0xcafe_babe, 0xbeba_feca];

/// Marker `codesign -dvvv` prints for hardened-runtime binaries.
const RUNTIME_MARKER: &str = "runtime";
/// Entitlement key that lets a binary keep dyld environment variables.
const DYLD_ENT_MARKER: &str = "allow-dyld-environment-variables";

/// Process-wide sequence for unique temp names. Combined with the pid,
/// concurrent resolutions never collide on the same temp file.
static TMP_SEQ: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("no code-signing tool available")]
    SignerUnavailable,
    #[error("signer exited with status {0}")]
    SignerFailed(i32),
}

/// Outcome of [`SignerContext::resolve_hardened`].
#[derive(Debug, PartialEq, Eq)]
pub enum Resolved {
    /// Safe to exec as-is.
    Original,
    /// Use this re-signed cached copy instead.
    Cached(PathBuf),
}

impl Resolved {
    pub fn path_or<'a>(&'a self, original: &'a Path) -> &'a Path {
        match self {
            Resolved::Original => original,
            Resolved::Cached(p) => p,
        }
    }

    pub fn was_cached(&self) -> bool {
        matches!(self, Resolved::Cached(_))
    }
}

thread_local! {
    static RESOLVING: Cell<bool> = const { Cell::new(false) };
}

/// Thread-local re-entrancy guard around trampoline and shebang
/// resolution. The signer subprocess triggers an interposed `exec`; a
/// failed `enter` tells that inner frame to pass straight through.
pub struct ResolveGuard(());

impl ResolveGuard {
    pub fn enter() -> Option<ResolveGuard> {
        RESOLVING.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(ResolveGuard(()))
            }
        })
    }
}

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        RESOLVING.with(|flag| flag.set(false));
    }
}

/// Everything trampoline creation needs: directories, the entitlements
/// plist and the resolved signer. Created once per process; all methods
/// take `&self` and are safe to call from multiple threads.
pub struct SignerContext {
    config_dir: PathBuf,
    cache_dir: PathBuf,
    entitlements_path: PathBuf,
    signer_path: Option<PathBuf>,
    debug: DebugSink,
}

impl SignerContext {
    /// Standard construction: resolve `codesign` through `PATH`.
    pub fn new(config_dir: PathBuf, cache_dir: PathBuf, debug: DebugSink) -> SignerContext {
        let signer = resolve_in_path("codesign");
        tracing::debug!(signer = ?signer, "resolved code-signing tool");
        Self::with_signer(config_dir, cache_dir, signer, debug)
    }

    /// Construction with an explicit signer (or none), for callers that
    /// already resolved it and for tests.
    pub fn with_signer(
        config_dir: PathBuf,
        cache_dir: PathBuf,
        signer_path: Option<PathBuf>,
        debug: DebugSink,
    ) -> SignerContext {
        let entitlements_path = config_dir.join("entitlements.plist");
        let ctx = SignerContext {
            config_dir,
            cache_dir,
            entitlements_path,
            signer_path,
            debug,
        };
        ctx.prepare();
        ctx
    }

    /// Create directories and write the entitlements plist if absent.
    /// Failures here are deliberately non-fatal: a read-only config dir
    /// degrades to "every re-sign attempt fails", which callers already
    /// handle.
    fn prepare(&self) {
        let _ = mkdirs(&self.config_dir, 0o755);
        let _ = mkdirs(&self.cache_dir, 0o755);
        if fs::metadata(&self.entitlements_path).is_err() {
            let _ = atomic_write(&self.entitlements_path, ENTITLEMENTS_PLIST.as_bytes(), 0o644);
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn entitlements_path(&self) -> &Path {
        &self.entitlements_path
    }

    pub fn signer(&self) -> Option<&Path> {
        self.signer_path.as_deref()
    }

    pub fn debug(&self) -> &DebugSink {
        &self.debug
    }

    /// Does this binary carry the hardened runtime *without* the dyld
    /// entitlement?
    ///
    /// Fail-closed: when no signer is available we cannot ask, and a
    /// wrong "hardened" answer only costs a failed re-sign attempt,
    /// while a wrong "not hardened" answer silently loses the
    /// injection.
    pub fn is_hardened(&self, path: &Path) -> bool {
        let Ok(md) = fs::metadata(path) else {
            return false;
        };
        if !md.is_file() {
            return false;
        }

        let mut magic = [0u8; 4];
        let Ok(()) = fs::File::open(path).and_then(|mut f| f.read_exact(&mut magic)) else {
            return false;
        };
        if !MACHO_MAGICS.contains(&u32::from_ne_bytes(magic)) {
            return false;
        }

        let Some(signer) = self.signer() else {
            return true;
        };

        let Ok(info) = run_capture(signer, &[os("-dvvv"), path.into()]) else {
            return false;
        };
        if !info.contains(RUNTIME_MARKER) {
            return false;
        }

        let Ok(ents) = run_capture(
            signer,
            &[os("-d"), os("--entitlements"), os("-"), path.into()],
        ) else {
            return true;
        };
        !ents.contains(DYLD_ENT_MARKER)
    }

    /// Cache location for an original path: the absolute path appended
    /// verbatim under the cache directory.
    pub fn cache_path(&self, original: &Path) -> PathBuf {
        self.cache_dir
            .join(original.strip_prefix("/").unwrap_or(original))
    }

    /// Is the cached copy at `cached` still valid for an original with
    /// this `(mtime, size)`? The sidecar records the *original's*
    /// numbers: replacing the original invalidates the cache, touching
    /// the cached copy does not.
    pub fn cache_valid(&self, cached: &Path, mtime: i64, size: u64) -> bool {
        if fs::metadata(cached).is_err() {
            return false;
        }
        let Ok(meta) = fs::read_to_string(meta_path(cached)) else {
            return false;
        };
        let mut fields = meta.split_whitespace();
        let (Some(m), Some(s)) = (fields.next(), fields.next()) else {
            return false;
        };
        let (Ok(m), Ok(s)) = (m.parse::<i64>(), s.parse::<u64>()) else {
            return false;
        };
        m == mtime && s == size
    }

    /// Copy `original` to the cache and re-sign it ad-hoc with the
    /// entitlements plist. Publication goes through a unique temp name
    /// plus rename; a losing rename under concurrency leaves an
    /// identical winner in place.
    pub fn cache_create(
        &self,
        original: &Path,
        cached: &Path,
        mtime: i64,
        size: u64,
    ) -> Result<(), SignerError> {
        if let Some(parent) = cached.parent() {
            mkdirs(parent, 0o755)?;
        }

        let tmp = temp_path(cached);
        if let Err(e) = fs::copy(original, &tmp) {
            rmp_debug!(self.debug, "cache: copy failed for {}: {e}", original.display());
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        let _ = fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755));

        let Some(signer) = self.signer() else {
            rmp_debug!(self.debug, "cache: signer not available");
            let _ = fs::remove_file(&tmp);
            return Err(SignerError::SignerUnavailable);
        };

        let sign = run_capture(
            signer,
            &[
                os("--force"),
                os("-s"),
                os("-"),
                os("--entitlements"),
                self.entitlements_path.as_os_str().to_os_string(),
                tmp.as_os_str().to_os_string(),
            ],
        );
        let sign = match sign {
            Ok(s) => s,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        };
        for line in sign.lines() {
            rmp_debug!(self.debug, "signer: {line}");
        }
        if sign.status != 0 {
            rmp_debug!(self.debug, "cache: signer failed (exit {})", sign.status);
            let _ = fs::remove_file(&tmp);
            return Err(SignerError::SignerFailed(sign.status));
        }

        if fs::rename(&tmp, cached).is_err() {
            // Another process won the race with identical content.
            let _ = fs::remove_file(&tmp);
        }

        atomic_write(&meta_path(cached), format!("{mtime} {size}").as_bytes(), 0o644)?;

        rmp_debug!(self.debug, "cache: created {}", cached.display());
        Ok(())
    }

    /// High-level resolve: return the path to exec for `path`, creating
    /// a trampoline when the binary is hardened. Never fails outward;
    /// any problem resolves to [`Resolved::Original`].
    pub fn resolve_hardened(&self, path: &Path) -> Resolved {
        let Some(_guard) = ResolveGuard::enter() else {
            return Resolved::Original;
        };

        let Ok(md) = fs::metadata(path) else {
            return Resolved::Original;
        };
        if !md.is_file() {
            return Resolved::Original;
        }
        let (mtime, size) = (md.mtime(), md.size());

        let cached = self.cache_path(path);
        if self.cache_valid(&cached, mtime, size) {
            rmp_debug!(self.debug, "cache hit: {}", cached.display());
            return Resolved::Cached(cached);
        }

        if !self.is_hardened(path) {
            rmp_debug!(self.debug, "not hardened: {}", path.display());
            return Resolved::Original;
        }

        rmp_debug!(self.debug, "hardened, creating cache: {}", path.display());
        match self.cache_create(path, &cached, mtime, size) {
            Ok(()) => Resolved::Cached(cached),
            Err(_) => Resolved::Original,
        }
    }
}

fn os(s: &str) -> OsString {
    OsString::from(s)
}

/// `<cached>.meta` sidecar path.
pub fn meta_path(cached: &Path) -> PathBuf {
    let mut os = cached.as_os_str().to_os_string();
    os.push(".meta");
    PathBuf::from(os)
}

/// `<dest>.tmp.<pid>.<seq>`, unique across threads and processes.
pub fn temp_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_os_string();
    os.push(format!(
        ".tmp.{}.{}",
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    PathBuf::from(os)
}

/// Write-to-temp-then-rename so concurrent readers never see a partial
/// file. A failed rename means another writer won with identical
/// content.
pub fn atomic_write(path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
    let tmp = temp_path(path);
    fs::write(&tmp, data)?;
    fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
    if fs::rename(&tmp, path).is_err() {
        let _ = fs::remove_file(&tmp);
    }
    Ok(())
}

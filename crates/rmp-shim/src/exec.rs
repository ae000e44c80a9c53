//! Exec/spawn routing: keep the injection alive in the child.
//!
//! Before any `exec*`/`posix_spawn*` reaches the kernel we answer two
//! questions about the target:
//!
//! 1. Is it a hardened binary that would strip the injection variable?
//!    Then substitute the re-signed trampoline ([`resolve_exec_target`]).
//! 2. Is it a script whose interpreter would? Then rewrite the argv to
//!    run the resolved/re-signed interpreter directly
//!    ([`resolve_script`]).
//!
//! The two rewrites are mutually exclusive for a given target: a
//! Mach-O binary has no shebang and a script is not Mach-O. Everything
//! runs under the thread-local resolve guard so the signer's own exec
//! passes straight through instead of recursing.

use std::ffi::{CStr, CString, OsStr, OsString};
use std::fs;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use libc::c_char;

use rmp_core::rmp_debug;
use rmp_core::shebang::resolve_shebang;
use rmp_core::signer::ResolveGuard;

use crate::state::ShimState;

/// Upper bound on argv slots in any rewrite.
pub const MAX_ARGV: usize = 256;

/// An owned, null-terminated exec vector:
/// `[program, inserts.., script, orig_argv[1..]]`.
///
/// The original argv slots are borrowed as raw pointers, so the rewrite
/// must not outlive the exec call it was built for.
pub struct ArgvRewrite {
    storage: Vec<CString>,
    argv: Vec<*const c_char>,
}

impl ArgvRewrite {
    /// # Safety
    /// `orig_argv` must be a null-terminated argv or null.
    pub unsafe fn build(
        program: CString,
        inserts: &[OsString],
        script: &CStr,
        orig_argv: *const *const c_char,
    ) -> ArgvRewrite {
        let mut storage = Vec::with_capacity(2 + inserts.len());
        storage.push(program);
        for ins in inserts {
            if let Ok(c) = CString::new(ins.as_bytes()) {
                storage.push(c);
            }
        }
        storage.push(script.to_owned());

        let mut argv: Vec<*const c_char> = storage.iter().map(|c| c.as_ptr()).collect();
        if !orig_argv.is_null() {
            let mut i = 1;
            loop {
                let arg = *orig_argv.add(i);
                if arg.is_null() || argv.len() >= MAX_ARGV - 1 {
                    break;
                }
                argv.push(arg);
                i += 1;
            }
        }
        argv.push(std::ptr::null());

        ArgvRewrite { storage, argv }
    }

    pub fn program(&self) -> *const c_char {
        self.storage[0].as_ptr()
    }

    pub fn argv(&self) -> *const *const c_char {
        self.argv.as_ptr()
    }

    #[cfg(test)]
    fn as_strings(&self) -> Vec<String> {
        self.argv[..self.argv.len() - 1]
            .iter()
            .map(|&p| {
                unsafe { CStr::from_ptr(p) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }
}

fn cstring_path(path: std::path::PathBuf) -> Option<CString> {
    CString::new(path.into_os_string().into_vec()).ok()
}

/// Trampoline substitution for a binary about to be exec'd. `None`
/// means "exec the original".
pub fn resolve_exec_target(path: &CStr) -> Option<CString> {
    let state = ShimState::get()?;
    if !state.active() {
        return None;
    }
    let _guard = ResolveGuard::enter()?;

    let bytes = path.to_bytes();
    let p = Path::new(OsStr::from_bytes(bytes));
    let md = fs::metadata(p).ok()?;
    if !md.is_file() {
        return None;
    }
    let (mtime, size) = (md.mtime(), md.size());

    let exec = state.exec_state();
    let known = exec
        .mcache
        .lock()
        .map(|c| c.lookup(bytes, mtime, size))
        .unwrap_or(None);
    if known == Some(false) {
        return None;
    }

    let cached = exec.signer.cache_path(p);
    if exec.signer.cache_valid(&cached, mtime, size) {
        if known.is_none() {
            if let Ok(mut c) = exec.mcache.lock() {
                c.store(bytes, mtime, size, true);
            }
        }
        rmp_debug!(state.debug, "cache hit: {}", cached.display());
        return cstring_path(cached);
    }

    let hardened = match known {
        Some(true) => true,
        _ => {
            let h = exec.signer.is_hardened(p);
            if let Ok(mut c) = exec.mcache.lock() {
                c.store(bytes, mtime, size, h);
            }
            h
        }
    };
    if !hardened {
        rmp_debug!(state.debug, "not hardened: {}", p.display());
        return None;
    }

    rmp_debug!(state.debug, "hardened, creating cache: {}", p.display());
    exec.signer.cache_create(p, &cached, mtime, size).ok()?;
    cstring_path(cached)
}

/// Shebang rewrite for a script about to be exec'd. `None` means the
/// kernel can run it as-is without losing the injection.
///
/// # Safety
/// `orig_argv` must be a null-terminated argv or null.
pub unsafe fn resolve_script(
    path: &CStr,
    orig_argv: *const *const c_char,
) -> Option<ArgvRewrite> {
    let state = ShimState::get()?;
    if !state.active() {
        return None;
    }

    let p = Path::new(OsStr::from_bytes(path.to_bytes()));
    let plan = resolve_shebang(&state.exec_state().signer, p)?;
    rmp_debug!(
        state.debug,
        "exec shebang: {} -> {}",
        p.display(),
        plan.program.display()
    );

    let program = cstring_path(plan.program)?;
    Some(ArgvRewrite::build(program, &plan.inserts, path, orig_argv))
}

/// PATH resolution for the `p` variants, returning an owned C path.
pub fn resolve_file_in_path(file: &CStr) -> Option<CString> {
    let name = file.to_str().ok()?;
    let resolved = rmp_core::path::resolve_in_path(name)?;
    cstring_path(resolved)
}

#[cfg(target_os = "macos")]
pub(crate) mod shims {
    use super::*;
    use crate::interpose::real;
    use libc::{c_int, c_void, pid_t};

    unsafe fn debug_exec(name: &str, from: *const c_char, to: &CStr) {
        if let Some(state) = ShimState::get() {
            rmp_debug!(
                state.debug,
                "{name}: {} -> {}",
                CStr::from_ptr(from).to_string_lossy(),
                to.to_string_lossy()
            );
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn execve_shim(
        path: *const c_char,
        argv: *const *const c_char,
        envp: *const *const c_char,
    ) -> c_int {
        if !path.is_null() {
            let cpath = CStr::from_ptr(path);
            if let Some(sub) = resolve_exec_target(cpath) {
                debug_exec("execve", path, &sub);
                return real::execve(sub.as_ptr(), argv, envp);
            }
            if let Some(rw) = resolve_script(cpath, argv) {
                return real::execve(rw.program(), rw.argv(), envp);
            }
        }
        real::execve(path, argv, envp)
    }

    #[no_mangle]
    pub unsafe extern "C" fn execv_shim(path: *const c_char, argv: *const *const c_char) -> c_int {
        if !path.is_null() {
            let cpath = CStr::from_ptr(path);
            if let Some(sub) = resolve_exec_target(cpath) {
                debug_exec("execv", path, &sub);
                return real::execv(sub.as_ptr(), argv);
            }
            if let Some(rw) = resolve_script(cpath, argv) {
                return real::execv(rw.program(), rw.argv());
            }
        }
        real::execv(path, argv)
    }

    #[no_mangle]
    pub unsafe extern "C" fn execvp_shim(file: *const c_char, argv: *const *const c_char) -> c_int {
        if !file.is_null() {
            if let Some(resolved) = resolve_file_in_path(CStr::from_ptr(file)) {
                if let Some(sub) = resolve_exec_target(&resolved) {
                    debug_exec("execvp", file, &sub);
                    return real::execv(sub.as_ptr(), argv);
                }
                if let Some(rw) = resolve_script(&resolved, argv) {
                    return real::execv(rw.program(), rw.argv());
                }
            }
        }
        real::execvp(file, argv)
    }

    #[no_mangle]
    pub unsafe extern "C" fn posix_spawn_shim(
        pid: *mut pid_t,
        path: *const c_char,
        fa: *const c_void,
        attr: *const c_void,
        argv: *const *const c_char,
        envp: *const *const c_char,
    ) -> c_int {
        if !path.is_null() {
            let cpath = CStr::from_ptr(path);
            if let Some(sub) = resolve_exec_target(cpath) {
                debug_exec("posix_spawn", path, &sub);
                return real::posix_spawn(pid, sub.as_ptr(), fa, attr, argv, envp);
            }
            if let Some(rw) = resolve_script(cpath, argv) {
                return real::posix_spawn(pid, rw.program(), fa, attr, rw.argv(), envp);
            }
        }
        real::posix_spawn(pid, path, fa, attr, argv, envp)
    }

    #[no_mangle]
    pub unsafe extern "C" fn posix_spawnp_shim(
        pid: *mut pid_t,
        file: *const c_char,
        fa: *const c_void,
        attr: *const c_void,
        argv: *const *const c_char,
        envp: *const *const c_char,
    ) -> c_int {
        if !file.is_null() {
            if let Some(resolved) = resolve_file_in_path(CStr::from_ptr(file)) {
                if let Some(sub) = resolve_exec_target(&resolved) {
                    debug_exec("posix_spawnp", file, &sub);
                    return real::posix_spawn(pid, sub.as_ptr(), fa, attr, argv, envp);
                }
                if let Some(rw) = resolve_script(&resolved, argv) {
                    return real::posix_spawn(pid, rw.program(), fa, attr, rw.argv(), envp);
                }
            }
        }
        real::posix_spawnp(pid, file, fa, attr, argv, envp)
    }
}

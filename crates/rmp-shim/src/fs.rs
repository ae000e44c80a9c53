//! Path rewriting for every path-accepting libc entry point.
//!
//! Plain entry points always attempt a rewrite (a relative path simply
//! matches no mapping and passes through). `*at` entry points rewrite
//! only absolute paths; a relative path is resolved by the kernel
//! against the directory fd and must not be touched. Two-path
//! operations rewrite each argument independently.

use std::ffi::{CStr, CString};

use libc::c_char;

use crate::state::ShimState;

/// Rewrite the path behind a raw C pointer, or `None` for pass-through.
/// Never fails outward: null pointers, interior problems and
/// unconfigured state all read as "don't touch it".
pub unsafe fn rewrite_any(path: *const c_char) -> Option<CString> {
    if path.is_null() {
        return None;
    }
    let state = ShimState::get()?;
    let bytes = CStr::from_ptr(path).to_bytes();
    let rewritten = state.rewriter.rewrite(bytes)?;
    rmp_core::rmp_debug!(
        state.debug,
        "rewrite: '{}' -> '{}'",
        String::from_utf8_lossy(bytes),
        String::from_utf8_lossy(&rewritten)
    );
    // The input had no interior NUL and the rewrite only splices
    // NUL-free prefixes, so this cannot fail.
    CString::new(rewritten).ok()
}

/// `rewrite_any`, but only for absolute paths (the `*at` rule).
pub unsafe fn rewrite_absolute(path: *const c_char) -> Option<CString> {
    if path.is_null() || *path != b'/' as c_char {
        return None;
    }
    rewrite_any(path)
}

#[cfg(target_os = "macos")]
pub(crate) mod shims {
    use super::*;
    use crate::interpose::real;
    use libc::{c_int, mode_t, off_t, size_t, ssize_t, DIR, FILE};

    /// Pointer to use for the call: the rewritten copy if any, else the
    /// original.
    #[inline]
    fn ptr_of(rewritten: &Option<CString>, original: *const c_char) -> *const c_char {
        match rewritten {
            Some(c) => c.as_ptr(),
            None => original,
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn open_shim(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        let p = rewrite_any(path);
        real::open(ptr_of(&p, path), flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn open_nocancel_shim(
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        let p = rewrite_any(path);
        real::open_nocancel(ptr_of(&p, path), flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn openat_shim(
        fd: c_int,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        let p = rewrite_absolute(path);
        real::openat(fd, ptr_of(&p, path), flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn openat_nocancel_shim(
        fd: c_int,
        path: *const c_char,
        flags: c_int,
        mode: mode_t,
    ) -> c_int {
        let p = rewrite_absolute(path);
        real::openat_nocancel(fd, ptr_of(&p, path), flags, mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn creat_shim(path: *const c_char, mode: mode_t) -> c_int {
        let p = rewrite_any(path);
        real::open(
            ptr_of(&p, path),
            libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC,
            mode,
        )
    }

    #[no_mangle]
    pub unsafe extern "C" fn fopen_shim(path: *const c_char, mode: *const c_char) -> *mut FILE {
        let p = rewrite_any(path);
        real::fopen(ptr_of(&p, path), mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn stat_shim(path: *const c_char, sb: *mut libc::stat) -> c_int {
        let p = rewrite_any(path);
        real::stat(ptr_of(&p, path), sb)
    }

    #[no_mangle]
    pub unsafe extern "C" fn lstat_shim(path: *const c_char, sb: *mut libc::stat) -> c_int {
        let p = rewrite_any(path);
        real::lstat(ptr_of(&p, path), sb)
    }

    #[no_mangle]
    pub unsafe extern "C" fn fstatat_shim(
        fd: c_int,
        path: *const c_char,
        sb: *mut libc::stat,
        flag: c_int,
    ) -> c_int {
        let p = rewrite_absolute(path);
        real::fstatat(fd, ptr_of(&p, path), sb, flag)
    }

    #[no_mangle]
    pub unsafe extern "C" fn access_shim(path: *const c_char, mode: c_int) -> c_int {
        let p = rewrite_any(path);
        real::access(ptr_of(&p, path), mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn faccessat_shim(
        fd: c_int,
        path: *const c_char,
        mode: c_int,
        flag: c_int,
    ) -> c_int {
        let p = rewrite_absolute(path);
        real::faccessat(fd, ptr_of(&p, path), mode, flag)
    }

    #[no_mangle]
    pub unsafe extern "C" fn mkdir_shim(path: *const c_char, mode: mode_t) -> c_int {
        let p = rewrite_any(path);
        real::mkdir(ptr_of(&p, path), mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn mkdirat_shim(fd: c_int, path: *const c_char, mode: mode_t) -> c_int {
        let p = rewrite_absolute(path);
        real::mkdirat(fd, ptr_of(&p, path), mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn unlink_shim(path: *const c_char) -> c_int {
        let p = rewrite_any(path);
        real::unlink(ptr_of(&p, path))
    }

    #[no_mangle]
    pub unsafe extern "C" fn unlinkat_shim(fd: c_int, path: *const c_char, flag: c_int) -> c_int {
        let p = rewrite_absolute(path);
        real::unlinkat(fd, ptr_of(&p, path), flag)
    }

    #[no_mangle]
    pub unsafe extern "C" fn rename_shim(oldp: *const c_char, newp: *const c_char) -> c_int {
        let o = rewrite_any(oldp);
        let n = rewrite_any(newp);
        real::rename(ptr_of(&o, oldp), ptr_of(&n, newp))
    }

    #[no_mangle]
    pub unsafe extern "C" fn renameat_shim(
        ofd: c_int,
        oldp: *const c_char,
        nfd: c_int,
        newp: *const c_char,
    ) -> c_int {
        let o = rewrite_absolute(oldp);
        let n = rewrite_absolute(newp);
        real::renameat(ofd, ptr_of(&o, oldp), nfd, ptr_of(&n, newp))
    }

    #[no_mangle]
    pub unsafe extern "C" fn rmdir_shim(path: *const c_char) -> c_int {
        let p = rewrite_any(path);
        real::rmdir(ptr_of(&p, path))
    }

    #[no_mangle]
    pub unsafe extern "C" fn opendir_shim(path: *const c_char) -> *mut DIR {
        let p = rewrite_any(path);
        real::opendir(ptr_of(&p, path))
    }

    #[no_mangle]
    pub unsafe extern "C" fn chdir_shim(path: *const c_char) -> c_int {
        let p = rewrite_any(path);
        real::chdir(ptr_of(&p, path))
    }

    #[no_mangle]
    pub unsafe extern "C" fn readlink_shim(
        path: *const c_char,
        buf: *mut c_char,
        bufsiz: size_t,
    ) -> ssize_t {
        let p = rewrite_any(path);
        real::readlink(ptr_of(&p, path), buf, bufsiz)
    }

    #[no_mangle]
    pub unsafe extern "C" fn readlinkat_shim(
        fd: c_int,
        path: *const c_char,
        buf: *mut c_char,
        bufsiz: size_t,
    ) -> ssize_t {
        let p = rewrite_absolute(path);
        real::readlinkat(fd, ptr_of(&p, path), buf, bufsiz)
    }

    #[no_mangle]
    pub unsafe extern "C" fn chmod_shim(path: *const c_char, mode: mode_t) -> c_int {
        let p = rewrite_any(path);
        real::chmod(ptr_of(&p, path), mode)
    }

    #[no_mangle]
    pub unsafe extern "C" fn fchmodat_shim(
        fd: c_int,
        path: *const c_char,
        mode: mode_t,
        flag: c_int,
    ) -> c_int {
        let p = rewrite_absolute(path);
        real::fchmodat(fd, ptr_of(&p, path), mode, flag)
    }

    #[no_mangle]
    pub unsafe extern "C" fn chown_shim(
        path: *const c_char,
        owner: libc::uid_t,
        group: libc::gid_t,
    ) -> c_int {
        let p = rewrite_any(path);
        real::chown(ptr_of(&p, path), owner, group)
    }

    #[no_mangle]
    pub unsafe extern "C" fn lchown_shim(
        path: *const c_char,
        owner: libc::uid_t,
        group: libc::gid_t,
    ) -> c_int {
        let p = rewrite_any(path);
        real::lchown(ptr_of(&p, path), owner, group)
    }

    #[no_mangle]
    pub unsafe extern "C" fn fchownat_shim(
        fd: c_int,
        path: *const c_char,
        owner: libc::uid_t,
        group: libc::gid_t,
        flag: c_int,
    ) -> c_int {
        let p = rewrite_absolute(path);
        real::fchownat(fd, ptr_of(&p, path), owner, group, flag)
    }

    #[no_mangle]
    pub unsafe extern "C" fn symlink_shim(target: *const c_char, linkpath: *const c_char) -> c_int {
        let t = rewrite_any(target);
        let l = rewrite_any(linkpath);
        real::symlink(ptr_of(&t, target), ptr_of(&l, linkpath))
    }

    #[no_mangle]
    pub unsafe extern "C" fn symlinkat_shim(
        target: *const c_char,
        fd: c_int,
        linkpath: *const c_char,
    ) -> c_int {
        let t = rewrite_any(target);
        let l = rewrite_absolute(linkpath);
        real::symlinkat(ptr_of(&t, target), fd, ptr_of(&l, linkpath))
    }

    #[no_mangle]
    pub unsafe extern "C" fn link_shim(p1: *const c_char, p2: *const c_char) -> c_int {
        let a = rewrite_any(p1);
        let b = rewrite_any(p2);
        real::link(ptr_of(&a, p1), ptr_of(&b, p2))
    }

    #[no_mangle]
    pub unsafe extern "C" fn linkat_shim(
        fd1: c_int,
        p1: *const c_char,
        fd2: c_int,
        p2: *const c_char,
        flag: c_int,
    ) -> c_int {
        let a = rewrite_absolute(p1);
        let b = rewrite_absolute(p2);
        real::linkat(fd1, ptr_of(&a, p1), fd2, ptr_of(&b, p2), flag)
    }

    #[no_mangle]
    pub unsafe extern "C" fn truncate_shim(path: *const c_char, length: off_t) -> c_int {
        let p = rewrite_any(path);
        real::truncate(ptr_of(&p, path), length)
    }

    #[no_mangle]
    pub unsafe extern "C" fn utimes_shim(path: *const c_char, times: *const libc::timeval) -> c_int {
        let p = rewrite_any(path);
        real::utimes(ptr_of(&p, path), times)
    }

    #[no_mangle]
    pub unsafe extern "C" fn utimensat_shim(
        fd: c_int,
        path: *const c_char,
        times: *const libc::timespec,
        flag: c_int,
    ) -> c_int {
        let p = rewrite_absolute(path);
        real::utimensat(fd, ptr_of(&p, path), times, flag)
    }

    #[no_mangle]
    pub unsafe extern "C" fn realpath_shim(
        path: *const c_char,
        resolved: *mut c_char,
    ) -> *mut c_char {
        let p = rewrite_any(path);
        real::realpath(ptr_of(&p, path), resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn null_paths_pass_through() {
        unsafe {
            assert!(rewrite_any(ptr::null()).is_none());
            assert!(rewrite_absolute(ptr::null()).is_none());
        }
    }

    #[test]
    fn relative_paths_never_rewrite_in_at_variants() {
        let rel = CString::new("relative/path").unwrap();
        unsafe {
            assert!(rewrite_absolute(rel.as_ptr()).is_none());
        }
    }

    #[test]
    fn unconfigured_process_passes_through() {
        // This test binary carries no RMP_TARGET/RMP_MAPPINGS.
        let abs = CString::new("/h/.app/file").unwrap();
        unsafe {
            assert!(rewrite_any(abs.as_ptr()).is_none());
        }
    }
}

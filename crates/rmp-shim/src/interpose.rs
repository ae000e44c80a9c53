//! The dyld interposition table.
//!
//! dyld scans `__DATA,__interpose` in inserted libraries and replaces
//! every call to `old_func` in *other* images with `new_func`. Calls
//! made from this library itself are not substituted, which is why the
//! shims can call the plain extern symbols below to reach the real
//! implementations.
//!
//! Interposition is per entry point: variant symbols such as
//! `open$NOCANCEL` and `realpath$DARWIN_EXTSN` are separate table rows
//! or they slip through.

use libc::{c_char, c_int, c_void, mode_t, off_t, pid_t, size_t, ssize_t, DIR, FILE};

use crate::exec::shims::*;
use crate::fs::shims::*;

/// Real libc entry points, reached directly (not via the table).
pub(crate) mod real {
    use super::*;

    extern "C" {
        pub fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int;
        #[link_name = "open$NOCANCEL"]
        pub fn open_nocancel(path: *const c_char, flags: c_int, mode: mode_t) -> c_int;
        pub fn openat(fd: c_int, path: *const c_char, flags: c_int, mode: mode_t) -> c_int;
        #[link_name = "openat$NOCANCEL"]
        pub fn openat_nocancel(fd: c_int, path: *const c_char, flags: c_int, mode: mode_t)
            -> c_int;
        pub fn creat(path: *const c_char, mode: mode_t) -> c_int;
        pub fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE;
        pub fn stat(path: *const c_char, sb: *mut libc::stat) -> c_int;
        pub fn lstat(path: *const c_char, sb: *mut libc::stat) -> c_int;
        pub fn fstatat(fd: c_int, path: *const c_char, sb: *mut libc::stat, flag: c_int) -> c_int;
        pub fn access(path: *const c_char, mode: c_int) -> c_int;
        pub fn faccessat(fd: c_int, path: *const c_char, mode: c_int, flag: c_int) -> c_int;
        pub fn mkdir(path: *const c_char, mode: mode_t) -> c_int;
        pub fn mkdirat(fd: c_int, path: *const c_char, mode: mode_t) -> c_int;
        pub fn unlink(path: *const c_char) -> c_int;
        pub fn unlinkat(fd: c_int, path: *const c_char, flag: c_int) -> c_int;
        pub fn rename(old: *const c_char, new: *const c_char) -> c_int;
        pub fn renameat(ofd: c_int, old: *const c_char, nfd: c_int, new: *const c_char) -> c_int;
        pub fn rmdir(path: *const c_char) -> c_int;
        pub fn opendir(path: *const c_char) -> *mut DIR;
        pub fn chdir(path: *const c_char) -> c_int;
        pub fn readlink(path: *const c_char, buf: *mut c_char, bufsiz: size_t) -> ssize_t;
        pub fn readlinkat(
            fd: c_int,
            path: *const c_char,
            buf: *mut c_char,
            bufsiz: size_t,
        ) -> ssize_t;
        pub fn chmod(path: *const c_char, mode: mode_t) -> c_int;
        pub fn fchmodat(fd: c_int, path: *const c_char, mode: mode_t, flag: c_int) -> c_int;
        pub fn chown(path: *const c_char, owner: libc::uid_t, group: libc::gid_t) -> c_int;
        pub fn lchown(path: *const c_char, owner: libc::uid_t, group: libc::gid_t) -> c_int;
        pub fn fchownat(
            fd: c_int,
            path: *const c_char,
            owner: libc::uid_t,
            group: libc::gid_t,
            flag: c_int,
        ) -> c_int;
        pub fn symlink(target: *const c_char, linkpath: *const c_char) -> c_int;
        pub fn symlinkat(target: *const c_char, fd: c_int, linkpath: *const c_char) -> c_int;
        pub fn link(p1: *const c_char, p2: *const c_char) -> c_int;
        pub fn linkat(
            fd1: c_int,
            p1: *const c_char,
            fd2: c_int,
            p2: *const c_char,
            flag: c_int,
        ) -> c_int;
        pub fn truncate(path: *const c_char, length: off_t) -> c_int;
        pub fn utimes(path: *const c_char, times: *const libc::timeval) -> c_int;
        pub fn utimensat(
            fd: c_int,
            path: *const c_char,
            times: *const libc::timespec,
            flag: c_int,
        ) -> c_int;
        pub fn realpath(path: *const c_char, resolved: *mut c_char) -> *mut c_char;
        #[link_name = "realpath$DARWIN_EXTSN"]
        pub fn realpath_darwin(path: *const c_char, resolved: *mut c_char) -> *mut c_char;

        pub fn execve(
            path: *const c_char,
            argv: *const *const c_char,
            envp: *const *const c_char,
        ) -> c_int;
        pub fn execv(path: *const c_char, argv: *const *const c_char) -> c_int;
        pub fn execvp(file: *const c_char, argv: *const *const c_char) -> c_int;
        pub fn posix_spawn(
            pid: *mut pid_t,
            path: *const c_char,
            fa: *const c_void,
            attr: *const c_void,
            argv: *const *const c_char,
            envp: *const *const c_char,
        ) -> c_int;
        pub fn posix_spawnp(
            pid: *mut pid_t,
            file: *const c_char,
            fa: *const c_void,
            attr: *const c_void,
            argv: *const *const c_char,
            envp: *const *const c_char,
        ) -> c_int;
    }
}

#[repr(C)]
pub struct Interpose {
    pub new_func: *const (),
    pub old_func: *const (),
}

// Function pointers to immutable code; safe to share.
unsafe impl Sync for Interpose {}

macro_rules! interpose {
    ($entry:ident, $shim:path, $real:path) => {
        #[link_section = "__DATA,__interpose"]
        #[used]
        pub static $entry: Interpose = Interpose {
            new_func: $shim as *const (),
            old_func: $real as *const (),
        };
    };
}

interpose!(IT_OPEN, open_shim, real::open);
interpose!(IT_OPEN_NOCANCEL, open_nocancel_shim, real::open_nocancel);
interpose!(IT_OPENAT, openat_shim, real::openat);
interpose!(IT_OPENAT_NOCANCEL, openat_nocancel_shim, real::openat_nocancel);
interpose!(IT_CREAT, creat_shim, real::creat);
interpose!(IT_FOPEN, fopen_shim, real::fopen);
interpose!(IT_STAT, stat_shim, real::stat);
interpose!(IT_LSTAT, lstat_shim, real::lstat);
interpose!(IT_FSTATAT, fstatat_shim, real::fstatat);
interpose!(IT_ACCESS, access_shim, real::access);
interpose!(IT_FACCESSAT, faccessat_shim, real::faccessat);
interpose!(IT_MKDIR, mkdir_shim, real::mkdir);
interpose!(IT_MKDIRAT, mkdirat_shim, real::mkdirat);
interpose!(IT_UNLINK, unlink_shim, real::unlink);
interpose!(IT_UNLINKAT, unlinkat_shim, real::unlinkat);
interpose!(IT_RENAME, rename_shim, real::rename);
interpose!(IT_RENAMEAT, renameat_shim, real::renameat);
interpose!(IT_RMDIR, rmdir_shim, real::rmdir);
interpose!(IT_OPENDIR, opendir_shim, real::opendir);
interpose!(IT_CHDIR, chdir_shim, real::chdir);
interpose!(IT_READLINK, readlink_shim, real::readlink);
interpose!(IT_READLINKAT, readlinkat_shim, real::readlinkat);
interpose!(IT_CHMOD, chmod_shim, real::chmod);
interpose!(IT_FCHMODAT, fchmodat_shim, real::fchmodat);
interpose!(IT_CHOWN, chown_shim, real::chown);
interpose!(IT_LCHOWN, lchown_shim, real::lchown);
interpose!(IT_FCHOWNAT, fchownat_shim, real::fchownat);
interpose!(IT_SYMLINK, symlink_shim, real::symlink);
interpose!(IT_SYMLINKAT, symlinkat_shim, real::symlinkat);
interpose!(IT_LINK, link_shim, real::link);
interpose!(IT_LINKAT, linkat_shim, real::linkat);
interpose!(IT_TRUNCATE, truncate_shim, real::truncate);
interpose!(IT_UTIMES, utimes_shim, real::utimes);
interpose!(IT_UTIMENSAT, utimensat_shim, real::utimensat);
interpose!(IT_REALPATH, realpath_shim, real::realpath);
interpose!(IT_REALPATH_DARWIN, realpath_shim, real::realpath_darwin);

interpose!(IT_EXECVE, execve_shim, real::execve);
interpose!(IT_EXECV, execv_shim, real::execv);
interpose!(IT_EXECVP, execvp_shim, real::execvp);
interpose!(IT_POSIX_SPAWN, posix_spawn_shim, real::posix_spawn);
interpose!(IT_POSIX_SPAWNP, posix_spawnp_shim, real::posix_spawnp);

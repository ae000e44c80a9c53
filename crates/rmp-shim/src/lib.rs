//! # rmp-shim
//!
//! The library `remapper` injects into launched programs via
//! `DYLD_INSERT_LIBRARIES`. It does two jobs:
//!
//! * rewrite the path argument of every path-accepting libc entry point
//!   according to the mappings in the environment ([`fs`]);
//! * keep the injection alive across `exec*`/`posix_spawn*` by
//!   substituting trampolines for hardened binaries and rewriting
//!   shebang exec vectors before the kernel sees them ([`exec`]).
//!
//! Configuration arrives through `RMP_TARGET` / `RMP_MAPPINGS` /
//! `RMP_CONFIG` / `RMP_CACHE` / `RMP_DEBUG_LOG`, parsed once into
//! process-wide immutable state ([`state`]). The library never fails
//! observably to its host: any internal problem reduces to calling the
//! real libc function with the original arguments.
#![allow(clippy::missing_safety_doc)]

pub mod exec;
pub mod fs;
#[cfg(target_os = "macos")]
pub mod interpose;
pub mod mcache;
pub mod state;

/// dyld runs this after libSystem is up but before `main`, so the
/// process-wide state exists strictly before any interposed call that
/// could use it.
#[cfg(target_os = "macos")]
#[used]
#[link_section = "__DATA,__mod_init_func"]
pub static SHIM_INIT: unsafe extern "C" fn() = {
    unsafe extern "C" fn shim_init() {
        let _ = crate::state::ShimState::get();
    }
    shim_init
};

//! # rmp-core
//!
//! Shared engine for the `remapper` launcher and its injected
//! interposition library: the mapping model, path utilities, the
//! hardened-binary trampoline cache and the shebang resolver.
//!
//! Everything here is used from two very different hosts: the
//! single-threaded launcher binary and a dylib injected into arbitrary
//! multi-threaded programs, so the public surface avoids global mutable
//! state. The one exception is the thread-local re-entrancy guard in
//! [`signer`], which exists precisely because the signer subprocess
//! triggers the same interposed `exec` path that called it.

pub mod logging;
pub mod mapping;
pub mod path;
pub mod pipe;
pub mod settings;
pub mod shebang;
pub mod signer;

pub use logging::DebugSink;
pub use mapping::{Mapping, MappingSet};
pub use signer::{Resolved, SignerContext};

/// Process environment is global; tests that touch or depend on it
/// serialise through this lock.
#[cfg(test)]
pub(crate) mod test_env {
    use std::sync::{Mutex, MutexGuard};

    static LOCK: Mutex<()> = Mutex::new(());

    pub fn lock() -> MutexGuard<'static, ()> {
        LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}

//! Process-wide interposer state.
//!
//! Populated from the environment exactly once and immutable
//! afterwards, so interposed functions read it without synchronisation.
//! Initialisation is guarded by an atomic swap: a second thread (or a
//! re-entrant call from inside init itself) sees `None` and the caller
//! passes the request through to the real libc function.

use std::ffi::CStr;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Mutex, OnceLock};

use rmp_core::mapping::MappingSet;
use rmp_core::settings;
use rmp_core::{DebugSink, SignerContext};

use crate::mcache::HardenedCache;

static SHIM_STATE: AtomicPtr<ShimState> = AtomicPtr::new(ptr::null_mut());
static INITIALIZING: AtomicBool = AtomicBool::new(false);

pub struct ShimState {
    pub rewriter: MappingSet,
    pub debug: DebugSink,
    /// Signer context plus the per-process hardened-bit cache, built on
    /// first exec/spawn. Trampoline creation needs directories and a
    /// resolved signer; none of that belongs in library-load time.
    exec: OnceLock<ExecState>,
}

pub struct ExecState {
    pub signer: SignerContext,
    pub mcache: Mutex<HardenedCache>,
}

impl ShimState {
    /// The state, initialising it on first call. `None` while another
    /// thread is mid-initialisation; callers treat that as "not
    /// configured" and pass through.
    pub fn get() -> Option<&'static ShimState> {
        let p = SHIM_STATE.load(Ordering::Acquire);
        if !p.is_null() {
            return unsafe { Some(&*p) };
        }

        if INITIALIZING.swap(true, Ordering::SeqCst) {
            return None;
        }
        let p = Box::into_raw(Box::new(ShimState::from_env()));
        SHIM_STATE.store(p, Ordering::Release);
        INITIALIZING.store(false, Ordering::SeqCst);

        unsafe { Some(&*p) }
    }

    fn from_env() -> ShimState {
        // Raw getenv: no allocation unless a variable is actually set,
        // and no dependency on the std env lock this early.
        let debug = match env_bytes(c"RMP_DEBUG_LOG") {
            Some(path) => {
                use std::os::unix::ffi::OsStringExt;
                DebugSink::append(&PathBuf::from(std::ffi::OsString::from_vec(path)))
            }
            None => DebugSink::disabled(),
        };

        let target = env_bytes(c"RMP_TARGET");
        let mappings = env_bytes(c"RMP_MAPPINGS");
        let rewriter = match (target, mappings) {
            (Some(t), Some(m)) if !t.is_empty() => {
                let set = MappingSet::from_joined(&t, &m);
                rmp_core::rmp_debug!(
                    debug,
                    "shim: target='{}' {} pattern(s) loaded",
                    String::from_utf8_lossy(set.target()),
                    set.len()
                );
                set
            }
            _ => MappingSet::default(),
        };

        ShimState {
            rewriter,
            debug,
            exec: OnceLock::new(),
        }
    }

    /// Anything to do at all? With no mappings every entry point is
    /// pass-through, including exec routing.
    pub fn active(&self) -> bool {
        !self.rewriter.is_empty()
    }

    pub fn exec_state(&self) -> &ExecState {
        self.exec.get_or_init(|| {
            let config = settings::config_dir();
            let cache = settings::cache_dir(&config);
            ExecState {
                signer: SignerContext::new(config, cache, self.debug.clone()),
                mcache: Mutex::new(HardenedCache::new()),
            }
        })
    }
}

fn env_bytes(name: &CStr) -> Option<Vec<u8>> {
    let v = unsafe { libc::getenv(name.as_ptr()) };
    if v.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(v) }.to_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bytes_reads_raw_values() {
        std::env::set_var("RMP_SHIM_STATE_TEST", "value");
        assert_eq!(env_bytes(c"RMP_SHIM_STATE_TEST").unwrap(), b"value");
        std::env::remove_var("RMP_SHIM_STATE_TEST");
        assert!(env_bytes(c"RMP_SHIM_STATE_TEST").is_none());
    }

    #[test]
    fn from_env_without_config_is_inactive() {
        // The test process has no RMP_TARGET/RMP_MAPPINGS.
        let state = ShimState::from_env();
        assert!(!state.active());
        assert!(state.rewriter.rewrite(b"/any/path").is_none());
    }
}

//! Per-process hardened-bit cache.
//!
//! Bounded at 128 entries and never evicting: a long-running child that
//! execs more distinct binaries than that simply bypasses the cache and
//! pays the signer probe again. Losing an entry is never incorrect,
//! only slower, so the validity tuple `(mtime, size)` is checked on
//! every hit and a mismatch reads as a miss.

pub const CAPACITY: usize = 128;

struct Entry {
    path: Vec<u8>,
    mtime: i64,
    size: u64,
    hardened: bool,
}

#[derive(Default)]
pub struct HardenedCache {
    entries: Vec<Entry>,
}

impl HardenedCache {
    pub fn new() -> HardenedCache {
        HardenedCache::default()
    }

    /// `Some(hardened)` on a fresh hit, `None` on a miss or a stale
    /// entry (the original changed under us).
    pub fn lookup(&self, path: &[u8], mtime: i64, size: u64) -> Option<bool> {
        let e = self.entries.iter().find(|e| e.path == path)?;
        if e.mtime == mtime && e.size == size {
            Some(e.hardened)
        } else {
            None
        }
    }

    /// Insert or refresh. A full cache drops new insertions.
    pub fn store(&mut self, path: &[u8], mtime: i64, size: u64, hardened: bool) {
        if path.is_empty() {
            return;
        }
        if let Some(e) = self.entries.iter_mut().find(|e| e.path == path) {
            e.mtime = mtime;
            e.size = size;
            e.hardened = hardened;
            return;
        }
        if self.entries.len() >= CAPACITY {
            return;
        }
        self.entries.push(Entry {
            path: path.to_vec(),
            mtime,
            size,
            hardened,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let mut c = HardenedCache::new();
        assert_eq!(c.lookup(b"/bin/x", 1, 2), None);
        c.store(b"/bin/x", 1, 2, true);
        assert_eq!(c.lookup(b"/bin/x", 1, 2), Some(true));
        c.store(b"/bin/y", 1, 2, false);
        assert_eq!(c.lookup(b"/bin/y", 1, 2), Some(false));
    }

    #[test]
    fn stale_entry_is_a_miss() {
        let mut c = HardenedCache::new();
        c.store(b"/bin/x", 1, 2, true);
        assert_eq!(c.lookup(b"/bin/x", 9, 2), None);
        assert_eq!(c.lookup(b"/bin/x", 1, 9), None);
    }

    #[test]
    fn store_refreshes_in_place() {
        let mut c = HardenedCache::new();
        c.store(b"/bin/x", 1, 2, true);
        c.store(b"/bin/x", 3, 4, false);
        assert_eq!(c.lookup(b"/bin/x", 3, 4), Some(false));
        assert_eq!(c.lookup(b"/bin/x", 1, 2), None);
    }

    #[test]
    fn capacity_is_a_hard_bound() {
        let mut c = HardenedCache::new();
        for i in 0..CAPACITY {
            c.store(format!("/bin/p{i}").as_bytes(), 1, 1, false);
        }
        c.store(b"/bin/overflow", 1, 1, true);
        assert_eq!(c.lookup(b"/bin/overflow", 1, 1), None);
        // Existing entries still refresh.
        c.store(b"/bin/p0", 2, 2, true);
        assert_eq!(c.lookup(b"/bin/p0", 2, 2), Some(true));
    }

    #[test]
    fn empty_path_is_always_a_miss() {
        let mut c = HardenedCache::new();
        c.store(b"", 1, 1, true);
        assert_eq!(c.lookup(b"", 1, 1), None);
    }
}

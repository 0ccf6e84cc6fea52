//! Process-wide map of per-path async mutexes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

pub type PathLock = Arc<tokio::sync::Mutex<()>>;

/// One mutex per key, created on first use and never removed.
///
/// Entries are bounded by the number of distinct keys ever requested, not by
/// request volume.
#[derive(Default)]
pub struct KeyedMutex {
    locks: Mutex<HashMap<PathBuf, PathLock>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding `key`. Callers for the same key share it.
    pub fn lock_for(&self, key: &Path) -> PathLock {
        // The map is only mutated by inserts, so a poisoned guard is still consistent.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_path_buf()).or_default())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

static GLOBAL: OnceLock<KeyedMutex> = OnceLock::new();

/// Lock table shared by every `DiskCache` in the process, so two caches
/// rooted at the same directory still single-flight.
pub fn global() -> &'static KeyedMutex {
    GLOBAL.get_or_init(KeyedMutex::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_shares_lock() {
        let locks = KeyedMutex::new();
        let a = locks.lock_for(Path::new("/cache/a.zip"));
        let b = locks.lock_for(Path::new("/cache/a.zip"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_distinct_keys_do_not_contend() {
        let locks = KeyedMutex::new();
        let a = locks.lock_for(Path::new("/cache/a.zip"));
        let b = locks.lock_for(Path::new("/cache/b.zip"));
        assert!(!Arc::ptr_eq(&a, &b));

        let _held = a.try_lock().unwrap();
        assert!(b.try_lock().is_ok(), "holding a must not block b");
        assert!(a.try_lock().is_err());
    }
}

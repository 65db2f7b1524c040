//! Request-scoped rotating pool of provider API keys.
//!
//! The pool is the only shared mutable resource during a request: the
//! parallel fan-out may call `next_key` from several tasks at once, and a
//! classified authentication failure evicts the offending key for the rest
//! of the request. A mutex around the whole state is sufficient since call
//! latency dominates lock hold time.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::seq::SliceRandom;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("API キーが設定されていません")]
    NoKeys,

    #[error("利用可能な API キーがありません")]
    Exhausted,
}

/// Thread-safe rotating pool of API keys.
///
/// Keys are shuffled once at construction so rotation starts at a different
/// point on every request, spreading load across the key set. Eviction is
/// permanent for the lifetime of the pool: an evicted key is never handed
/// out again.
pub struct KeyPool {
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    available: Vec<String>,
    cursor: usize,
}

impl KeyPool {
    /// Build a pool from a non-empty key set. Duplicates are collapsed so a
    /// key can be evicted exactly once; the input order is discarded by an
    /// unbiased shuffle.
    pub fn new(keys: impl IntoIterator<Item = String>) -> Result<Self, PoolError> {
        let mut available: Vec<String> = Vec::new();
        for key in keys {
            if !available.contains(&key) {
                available.push(key);
            }
        }
        if available.is_empty() {
            return Err(PoolError::NoKeys);
        }
        available.shuffle(&mut rand::thread_rng());
        Ok(Self {
            inner: Mutex::new(PoolInner {
                available,
                cursor: 0,
            }),
        })
    }

    /// Build a pool that keeps the input order. Rotation tests need a
    /// predictable cursor, which the shuffling constructor cannot give.
    #[cfg(test)]
    pub(crate) fn from_ordered(keys: Vec<String>) -> Result<Self, PoolError> {
        if keys.is_empty() {
            return Err(PoolError::NoKeys);
        }
        Ok(Self {
            inner: Mutex::new(PoolInner {
                available: keys,
                cursor: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the key at the rotation cursor and advance it.
    pub fn next_key(&self) -> Result<String, PoolError> {
        let mut inner = self.lock();
        if inner.available.is_empty() {
            return Err(PoolError::Exhausted);
        }
        let key = inner.available[inner.cursor].clone();
        inner.cursor = (inner.cursor + 1) % inner.available.len();
        Ok(key)
    }

    /// Permanently remove a key from the pool. Idempotent for keys that are
    /// already absent. The cursor is clamped into the shrunken range.
    pub fn evict(&self, key: &str) {
        let mut inner = self.lock();
        let Some(pos) = inner.available.iter().position(|k| k == key) else {
            return;
        };
        inner.available.remove(pos);
        if pos < inner.cursor {
            inner.cursor -= 1;
        }
        if inner.cursor >= inner.available.len() {
            inner.cursor = 0;
        }
        tracing::info!(remaining = inner.available.len(), "evicted API key from pool");
    }

    /// Number of keys currently available.
    pub fn count(&self) -> usize {
        self.lock().available.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(KeyPool::new(Vec::new()), Err(PoolError::NoKeys)));
    }

    #[test]
    fn test_shuffle_preserves_key_set() {
        let pool = KeyPool::new(keys(&["a", "b", "c", "d"])).unwrap();
        let mut seen = HashSet::new();
        for _ in 0..4 {
            seen.insert(pool.next_key().unwrap());
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(pool.count(), 4);
    }

    #[test]
    fn test_rotation_wraps_around() {
        let pool = KeyPool::new(keys(&["a", "b"])).unwrap();
        let first = pool.next_key().unwrap();
        let second = pool.next_key().unwrap();
        assert_ne!(first, second);
        // Third call wraps back to the first key.
        assert_eq!(pool.next_key().unwrap(), first);
    }

    #[test]
    fn test_evicted_key_never_returned() {
        let pool = KeyPool::new(keys(&["a", "b", "c"])).unwrap();
        pool.evict("b");
        assert_eq!(pool.count(), 2);
        for _ in 0..10 {
            assert_ne!(pool.next_key().unwrap(), "b");
        }
    }

    #[test]
    fn test_duplicates_collapsed() {
        let pool = KeyPool::new(keys(&["a", "b", "a", "a"])).unwrap();
        assert_eq!(pool.count(), 2);
        pool.evict("a");
        // No second copy of "a" survives the eviction.
        assert_eq!(pool.count(), 1);
        assert_eq!(pool.next_key().unwrap(), "b");
    }

    #[test]
    fn test_evict_is_idempotent() {
        let pool = KeyPool::new(keys(&["a", "b"])).unwrap();
        pool.evict("b");
        pool.evict("b");
        pool.evict("nope");
        assert_eq!(pool.count(), 1);
        assert_eq!(pool.next_key().unwrap(), "a");
    }

    #[test]
    fn test_exhausted_after_full_eviction() {
        let pool = KeyPool::new(keys(&["a"])).unwrap();
        pool.evict("a");
        assert_eq!(pool.count(), 0);
        assert!(matches!(pool.next_key(), Err(PoolError::Exhausted)));
    }

    #[test]
    fn test_cursor_clamped_after_eviction() {
        let pool = KeyPool::new(keys(&["a", "b", "c"])).unwrap();
        // Advance the cursor to the end of the range, then shrink the pool
        // underneath it. next_key must still succeed.
        pool.next_key().unwrap();
        pool.next_key().unwrap();
        let last = pool.next_key().unwrap();
        pool.evict(&last);
        let remaining = pool.next_key().unwrap();
        assert_ne!(remaining, last);
    }

    #[test]
    fn test_single_key_repeats() {
        let pool = KeyPool::new(keys(&["only"])).unwrap();
        assert_eq!(pool.next_key().unwrap(), "only");
        assert_eq!(pool.next_key().unwrap(), "only");
    }
}

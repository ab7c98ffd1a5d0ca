//! Expiration index: per-kind ordered set keyed by `(expire_at, key)`.
//!
//! Only entries with a non-null `expire_at` are members; the eviction
//! sweep walks each index from its minimum.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::clock::MonoTime;

#[derive(Debug, Default)]
pub struct ExpirationIndex<K: Ord + Clone> {
    tree: BTreeSet<(MonoTime, K)>,
}

impl<K: Ord + Clone> ExpirationIndex<K> {
    pub fn new() -> Self {
        Self {
            tree: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn insert(&mut self, at: MonoTime, key: K) {
        self.tree.insert((at, key));
    }

    pub fn remove(&mut self, at: MonoTime, key: &K) -> bool {
        self.tree.remove(&(at, key.clone()))
    }

    pub fn contains(&self, at: MonoTime, key: &K) -> bool {
        self.tree.contains(&(at, key.clone()))
    }

    /// Minimum entry if it is due at `now`.
    pub fn first_due(&self, now: MonoTime) -> Option<&K> {
        self.tree
            .iter()
            .next()
            .filter(|(at, _)| *at <= now)
            .map(|(_, k)| k)
    }

    /// Remove and return the minimum entry if it is due at `now`.
    pub fn pop_due(&mut self, now: MonoTime) -> Option<(MonoTime, K)> {
        match self.tree.first() {
            Some((at, _)) if *at <= now => self.tree.pop_first(),
            _ => None,
        }
    }
}

/// Result of the shared expiration routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    Keep,
    DeleteNow,
}

/// The common expiration algorithm.
///
/// Removes the entry from its index, then either re-arms `slot` at
/// `now + expire_in` (capped unless `ignore_max`) or clears it. A zero
/// effective TTL asks the caller to delete the entry immediately.
pub fn expire_slot<K: Ord + Clone>(
    index: &mut ExpirationIndex<K>,
    key: &K,
    slot: &mut Option<MonoTime>,
    now: MonoTime,
    expire_in: Option<Duration>,
    cap: Option<Duration>,
    ignore_max: bool,
) -> ExpireOutcome {
    if let Some(at) = slot.take() {
        index.remove(at, key);
    }
    let Some(mut expire_in) = expire_in else {
        return ExpireOutcome::Keep;
    };
    if !ignore_max {
        if let Some(max) = cap {
            if expire_in > max {
                expire_in = max;
            }
        }
    }
    if expire_in.is_zero() {
        return ExpireOutcome::DeleteNow;
    }
    let at = now + expire_in;
    *slot = Some(at);
    index.insert(at, key.clone());
    ExpireOutcome::Keep
}

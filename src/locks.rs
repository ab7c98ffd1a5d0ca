//! Named reentrant locks.
//!
//! "Distributed" in the framework's vocabulary, process-local in fact.
//! Locks do not flow through the dispatcher (a command must never block
//! waiting for one); they live in their own concurrent table. Owner
//! identity is the opaque id of the acquiring connection, never a thread
//! or task id: fetch and transaction flows cross threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::config::StringComparer;
use crate::error::{EngineError, EngineResult};

pub(crate) type OwnerId = u64;

#[derive(Debug, Default)]
struct LockState {
    owner: Option<OwnerId>,
    depth: u32,
    waiters: u32,
    /// Set when the slot is removed from the table; late arrivals retry.
    dead: bool,
}

#[derive(Debug, Default)]
struct LockSlot {
    state: Mutex<LockState>,
    notify: Notify,
}

#[derive(Debug)]
pub(crate) struct LockRegistry {
    comparer: StringComparer,
    locks: DashMap<String, Arc<LockSlot>>,
}

impl LockRegistry {
    pub(crate) fn new(comparer: StringComparer) -> Arc<Self> {
        Arc::new(Self {
            comparer,
            locks: DashMap::new(),
        })
    }

    /// Acquire `resource` for `owner`, waiting up to `timeout`.
    /// Reentrant per owner: each successful call returns a handle whose
    /// release decrements the depth once.
    pub(crate) async fn acquire(
        self: Arc<Self>,
        resource: &str,
        owner: OwnerId,
        timeout: Duration,
    ) -> EngineResult<LockHandle> {
        let key = self.comparer.normalize(resource).into_owned();
        let deadline = Instant::now() + timeout;
        loop {
            let slot = self.locks.entry(key.clone()).or_default().clone();
            {
                let mut state = slot.state.lock();
                if state.dead {
                    continue;
                }
                if state.owner.is_none() {
                    state.owner = Some(owner);
                    state.depth = 1;
                    trace!(resource = %key, owner, "lock acquired");
                    drop(state);
                    return Ok(LockHandle {
                        registry: self,
                        resource: key,
                        owner,
                        released: AtomicBool::new(false),
                    });
                }
                if state.owner == Some(owner) {
                    state.depth += 1;
                    drop(state);
                    return Ok(LockHandle {
                        registry: self,
                        resource: key,
                        owner,
                        released: AtomicBool::new(false),
                    });
                }
                if Instant::now() >= deadline {
                    drop(state);
                    self.collect_if_unused(&key, &slot);
                    return Err(EngineError::LockTimeout {
                        resource: resource.to_string(),
                        timeout,
                    });
                }
                state.waiters += 1;
            }
            let _ = tokio::time::timeout_at(deadline, slot.notify.notified()).await;
            slot.state.lock().waiters -= 1;
        }
    }

    fn release(&self, key: &str, owner: OwnerId) {
        let Some(slot) = self.locks.get(key).map(|e| e.value().clone()) else {
            return;
        };
        let mut state = slot.state.lock();
        if state.dead || state.owner != Some(owner) {
            return;
        }
        state.depth -= 1;
        if state.depth > 0 {
            return;
        }
        state.owner = None;
        let has_waiters = state.waiters > 0;
        drop(state);
        trace!(resource = %key, owner, "lock released");
        if has_waiters {
            slot.notify.notify_one();
        } else {
            self.collect_if_unused(key, &slot);
        }
    }

    fn collect_if_unused(&self, key: &str, slot: &Arc<LockSlot>) {
        self.locks.remove_if(key, |_, current| {
            if !Arc::ptr_eq(current, slot) {
                return false;
            }
            let mut state = current.state.lock();
            if state.owner.is_none() && state.waiters == 0 {
                state.dead = true;
                true
            } else {
                false
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Release handle for a single acquisition. Releasing twice is a no-op;
/// an unreleased handle releases on drop.
#[derive(Debug)]
pub struct LockHandle {
    registry: Arc<LockRegistry>,
    resource: String,
    owner: OwnerId,
    released: AtomicBool,
}

impl LockHandle {
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.registry.release(&self.resource, self.owner);
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

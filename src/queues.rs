//! Queue wait registry.
//!
//! The queue FIFOs live inside the memory state; this registry holds the
//! shared-mutable wait-lists that blocked fetchers park on. After a
//! write commits, the dispatcher signals each queue whose content grew,
//! waking at most one waiter per queue to avoid a thundering herd.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use compact_str::CompactString;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::StringComparer;

/// A blocked fetcher. One waiter is shared across every queue the
/// fetcher serves; a signal on any of them wakes it.
pub(crate) struct QueueWaiter {
    notify: Notify,
}

impl QueueWaiter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            notify: Notify::new(),
        })
    }

    pub(crate) async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[derive(Default)]
struct WaitList {
    waiters: Mutex<VecDeque<Weak<QueueWaiter>>>,
}

pub(crate) struct QueueWaitRegistry {
    comparer: StringComparer,
    queues: DashMap<CompactString, Arc<WaitList>>,
}

impl QueueWaitRegistry {
    pub(crate) fn new(comparer: StringComparer) -> Self {
        Self {
            comparer,
            queues: DashMap::new(),
        }
    }

    #[inline]
    fn norm(&self, queue: &str) -> CompactString {
        CompactString::from(self.comparer.normalize(queue).as_ref())
    }

    /// Park `waiter` at the back of each queue's wait-list (FIFO among
    /// waiters of the same queue).
    pub(crate) fn register(&self, queues: &[CompactString], waiter: &Arc<QueueWaiter>) {
        for queue in queues {
            let list = self.queues.entry(self.norm(queue)).or_default().clone();
            list.waiters.lock().push_back(Arc::downgrade(waiter));
        }
    }

    pub(crate) fn unregister(&self, queues: &[CompactString], waiter: &Arc<QueueWaiter>) {
        for queue in queues {
            if let Some(list) = self.queues.get(&self.norm(queue)) {
                list.waiters
                    .lock()
                    .retain(|w| w.as_ptr() != Arc::as_ptr(waiter) && w.strong_count() > 0);
            }
        }
    }

    /// Wake at most one live waiter. The signaled waiter leaves this
    /// queue's wait-list immediately; dead entries are skipped.
    pub(crate) fn signal_one(&self, queue: &str) {
        let Some(list) = self.queues.get(&self.norm(queue)) else {
            return;
        };
        let mut waiters = list.waiters.lock();
        while let Some(weak) = waiters.pop_front() {
            if let Some(waiter) = weak.upgrade() {
                waiter.notify.notify_one();
                break;
            }
        }
    }
}

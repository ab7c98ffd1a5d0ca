//! Single-writer dispatcher.
//!
//! Exactly one worker task owns the memory state. Submitters post
//! envelopes into the mailbox and await a typed reply; commands execute
//! one at a time in arrival order, so writes are globally linearizable
//! and reads never reorder past a write. The worker also runs the
//! periodic eviction sweep.

pub mod command;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace};

use crate::clock::MonotonicClock;
use crate::config::EngineOptions;
use crate::error::{EngineError, EngineResult};
use crate::queues::QueueWaitRegistry;
use crate::state::MemoryState;

use command::{answer_monitor, answer_read, apply_write, Envelope, FetchedJob};

/// Cloneable submission handle to the dispatcher task.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
    command_timeout: Duration,
}

impl Dispatcher {
    /// Spawn the worker task owning the memory state. Must be called
    /// from within a tokio runtime.
    pub(crate) fn spawn(
        options: Arc<EngineOptions>,
        clock: MonotonicClock,
        wait_registry: Arc<QueueWaitRegistry>,
    ) -> Dispatcher {
        let (tx, rx) = mpsc::unbounded_channel();
        let command_timeout = options.command_timeout;
        let eviction_interval = options.eviction_interval;
        let state = MemoryState::new(options);
        tokio::spawn(run(rx, state, clock, wait_registry, eviction_interval));
        Dispatcher {
            tx,
            command_timeout,
        }
    }

    /// Post a command and block until the dispatcher answers. Dropping
    /// the returned future cancels the wait, not the command: it still
    /// executes and its result is discarded.
    pub(crate) async fn submit<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Envelope,
    ) -> EngineResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| EngineError::Command("storage engine is shut down".into()))?;
        match tokio::time::timeout(self.command_timeout, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(EngineError::Command(
                "command was dropped by the dispatcher".into(),
            )),
            Err(_) => Err(EngineError::CommandTimeout(self.command_timeout)),
        }
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    mut state: MemoryState,
    clock: MonotonicClock,
    wait_registry: Arc<QueueWaitRegistry>,
    eviction_interval: Duration,
) {
    debug!(?eviction_interval, "dispatcher started");
    let mut tick = tokio::time::interval(eviction_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                execute(&mut state, &clock, &wait_registry, envelope);
                // Drain whatever arrived while the previous command ran.
                while let Ok(envelope) = rx.try_recv() {
                    execute(&mut state, &clock, &wait_registry, envelope);
                }
            }
            _ = tick.tick() => {
                let evicted = state.evict_expired(clock.now());
                if evicted > 0 {
                    trace!(evicted, "evicted expired entries");
                }
            }
        }
    }
    debug!("dispatcher stopped");
}

fn execute(
    state: &mut MemoryState,
    clock: &MonotonicClock,
    wait_registry: &QueueWaitRegistry,
    envelope: Envelope,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match envelope {
        Envelope::Read(cmd) => answer_read(state, clock, cmd),
        Envelope::Monitor(cmd) => answer_monitor(state, clock, cmd),
        Envelope::Commit { ops, reply } => {
            let now = clock.now();
            let mut fed_queues = Vec::new();
            let mut result = Ok(());
            for (index, op) in ops.into_iter().enumerate() {
                if let Err(err) = apply_write(state, now, op, &mut fed_queues) {
                    // No rollback: earlier sub-commands stay applied.
                    result = Err(EngineError::Command(format!(
                        "sub-command {index} failed: {err}"
                    )));
                    break;
                }
            }
            let _ = reply.send(result);
            for queue in fed_queues {
                wait_registry.signal_one(&queue);
            }
        }
        Envelope::PollQueues { queues, reply } => {
            let fetched = queues.iter().find_map(|queue| {
                state.dequeue(queue).map(|job_id| FetchedJob {
                    job_id,
                    queue: queue.to_string(),
                })
            });
            let _ = reply.send(fetched);
        }
    }));
    if outcome.is_err() {
        error!("command panicked; submitter is notified through its dropped reply channel");
    }
}

//! Storage root and the connection/transaction facades.
//!
//! Facades translate framework calls into commands: reads and writes go
//! through the dispatcher, lock acquisition goes straight to the lock
//! registry, and a blocking fetch alternates between a non-blocking
//! dispatcher poll and parking on the queue wait registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::clock::MonotonicClock;
use crate::config::EngineOptions;
use crate::dispatch::command::{
    Envelope, FetchedJob, JobData, ReadCommand, Reply, StateData, WriteOp,
};
use crate::dispatch::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::key::JobId;
use crate::locks::{LockHandle, LockRegistry, OwnerId};
use crate::monitoring::MonitoringApi;
use crate::queues::{QueueWaitRegistry, QueueWaiter};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

pub(crate) struct StorageInner {
    pub(crate) clock: MonotonicClock,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) wait_registry: Arc<QueueWaitRegistry>,
    pub(crate) locks: Arc<LockRegistry>,
}

/// Engine root: owns the dispatcher task and the shared registries.
/// Construct once at engine start; dropping the last clone of the root
/// and every connection shuts the dispatcher down.
pub struct JobStorage {
    pub(crate) inner: Arc<StorageInner>,
}

impl JobStorage {
    /// Spawn the engine. Must be called from within a tokio runtime.
    pub fn new(options: EngineOptions) -> Self {
        let options = Arc::new(options);
        let clock = MonotonicClock::new();
        let wait_registry = Arc::new(QueueWaitRegistry::new(options.string_comparer));
        let locks = LockRegistry::new(options.string_comparer);
        let dispatcher = Dispatcher::spawn(Arc::clone(&options), clock, Arc::clone(&wait_registry));
        debug!("job storage engine started");
        Self {
            inner: Arc::new(StorageInner {
                clock,
                dispatcher,
                wait_registry,
                locks,
            }),
        }
    }

    /// A connection with a fresh opaque owner identity for locks.
    pub fn connection(&self) -> StorageConnection {
        StorageConnection {
            inner: Arc::clone(&self.inner),
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn monitoring(&self) -> MonitoringApi {
        MonitoringApi::new(Arc::clone(&self.inner))
    }
}

impl Default for JobStorage {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

/// Per-worker facade. Cheap to create; the owner id is the identity
/// under which distributed locks are held.
pub struct StorageConnection {
    inner: Arc<StorageInner>,
    owner: OwnerId,
}

impl StorageConnection {
    async fn read<T>(&self, build: impl FnOnce(Reply<T>) -> ReadCommand) -> EngineResult<T> {
        self.inner
            .dispatcher
            .submit(|reply| Envelope::Read(build(reply)))
            .await
    }

    async fn commit_one(&self, op: WriteOp) -> EngineResult<()> {
        self.inner
            .dispatcher
            .submit(|reply| Envelope::Commit {
                ops: vec![op],
                reply,
            })
            .await?
    }

    // ===== Locks =====

    pub async fn acquire_lock(&self, resource: &str, timeout: Duration) -> EngineResult<LockHandle> {
        if resource.is_empty() {
            return Err(EngineError::InvalidArgument(
                "lock resource must not be empty".into(),
            ));
        }
        Arc::clone(&self.inner.locks)
            .acquire(resource, self.owner, timeout)
            .await
    }

    // ===== Job reads =====

    pub async fn job_data(&self, id: &str) -> EngineResult<Option<JobData>> {
        let Some(id) = JobId::parse(id) else {
            return Ok(None);
        };
        self.read(|reply| ReadCommand::JobData { id, reply }).await
    }

    pub async fn state_data(&self, id: &str) -> EngineResult<Option<StateData>> {
        let Some(id) = JobId::parse(id) else {
            return Ok(None);
        };
        self.read(|reply| ReadCommand::StateData { id, reply })
            .await
    }

    pub async fn job_parameter(&self, id: &str, name: &str) -> EngineResult<Option<String>> {
        let Some(id) = JobId::parse(id) else {
            return Ok(None);
        };
        let name = name.to_string();
        self.read(|reply| ReadCommand::JobParameter { id, name, reply })
            .await
    }

    // ===== Counter / set / hash / list reads =====

    pub async fn counter(&self, key: &str) -> EngineResult<i64> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::Counter { key, reply }).await
    }

    pub async fn set_count(&self, key: &str) -> EngineResult<usize> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::SetCount { key, reply })
            .await
    }

    pub async fn set_contains(&self, key: &str, value: &str) -> EngineResult<bool> {
        let (key, value) = (key.to_string(), value.to_string());
        self.read(|reply| ReadCommand::SetContains { key, value, reply })
            .await
    }

    /// Inclusive rank range over the `(score, value)` order.
    pub async fn set_range(&self, key: &str, from: usize, to: usize) -> EngineResult<Vec<String>> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::SetRange {
            key,
            from,
            to,
            reply,
        })
        .await
    }

    pub async fn all_set_items(&self, key: &str) -> EngineResult<Vec<String>> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::AllSetItems { key, reply })
            .await
    }

    /// Lowest-scored member within `[from_score, to_score]`.
    pub async fn first_set_value_by_score(
        &self,
        key: &str,
        from_score: f64,
        to_score: f64,
    ) -> EngineResult<Option<String>> {
        if to_score < from_score {
            return Err(EngineError::InvalidArgument(
                "to_score must not be less than from_score".into(),
            ));
        }
        let key = key.to_string();
        self.read(|reply| ReadCommand::FirstSetValueByScore {
            key,
            from_score,
            to_score,
            reply,
        })
        .await
    }

    pub async fn set_ttl(&self, key: &str) -> EngineResult<Option<Duration>> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::SetTtl { key, reply }).await
    }

    pub async fn hash_fields(
        &self,
        key: &str,
    ) -> EngineResult<Option<std::collections::HashMap<String, String>>> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::HashFields { key, reply })
            .await
    }

    pub async fn hash_field(&self, key: &str, name: &str) -> EngineResult<Option<String>> {
        let (key, name) = (key.to_string(), name.to_string());
        self.read(|reply| ReadCommand::HashField { key, name, reply })
            .await
    }

    pub async fn hash_count(&self, key: &str) -> EngineResult<usize> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::HashCount { key, reply })
            .await
    }

    pub async fn hash_ttl(&self, key: &str) -> EngineResult<Option<Duration>> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::HashTtl { key, reply }).await
    }

    pub async fn list_items(&self, key: &str) -> EngineResult<Vec<String>> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::ListItems { key, reply })
            .await
    }

    pub async fn list_range(&self, key: &str, from: usize, to: usize) -> EngineResult<Vec<String>> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::ListRange {
            key,
            from,
            to,
            reply,
        })
        .await
    }

    pub async fn list_count(&self, key: &str) -> EngineResult<usize> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::ListCount { key, reply })
            .await
    }

    pub async fn list_ttl(&self, key: &str) -> EngineResult<Option<Duration>> {
        let key = key.to_string();
        self.read(|reply| ReadCommand::ListTtl { key, reply }).await
    }

    // ===== Servers =====

    pub async fn announce_server(
        &self,
        server_id: &str,
        worker_count: usize,
        queues: &[&str],
    ) -> EngineResult<()> {
        if server_id.is_empty() {
            return Err(EngineError::InvalidArgument(
                "server id must not be empty".into(),
            ));
        }
        self.commit_one(WriteOp::AnnounceServer {
            server_id: server_id.to_string(),
            worker_count,
            queues: queues.iter().map(|q| q.to_string()).collect(),
        })
        .await
    }

    pub async fn server_heartbeat(&self, server_id: &str) -> EngineResult<()> {
        if server_id.is_empty() {
            return Err(EngineError::InvalidArgument(
                "server id must not be empty".into(),
            ));
        }
        self.commit_one(WriteOp::ServerHeartbeat {
            server_id: server_id.to_string(),
        })
        .await
    }

    pub async fn remove_server(&self, server_id: &str) -> EngineResult<()> {
        self.commit_one(WriteOp::RemoveServer {
            server_id: server_id.to_string(),
        })
        .await
    }

    /// Purge servers whose last heartbeat is older than `older_than`.
    pub async fn remove_timed_out_servers(&self, older_than: Duration) -> EngineResult<()> {
        self.commit_one(WriteOp::RemoveTimedOutServers { older_than })
            .await
    }

    // ===== Fetch =====

    /// Blocking fetch across `queues`, presented in randomized order per
    /// poll round for fairness. Returns [`EngineError::FetchTimeout`]
    /// when no job arrives before the deadline.
    pub async fn fetch_next_job(
        &self,
        queues: &[&str],
        timeout: Duration,
    ) -> EngineResult<FetchedJob> {
        if queues.is_empty() {
            return Err(EngineError::InvalidArgument(
                "queue list must not be empty".into(),
            ));
        }
        let names: Vec<CompactString> = queues.iter().map(|q| CompactString::from(*q)).collect();
        let deadline = Instant::now() + timeout;
        let waiter = QueueWaiter::new();
        loop {
            self.inner.wait_registry.register(&names, &waiter);
            let mut order = names.clone();
            order.shuffle(&mut rand::rng());
            let polled = self
                .inner
                .dispatcher
                .submit(|reply| Envelope::PollQueues {
                    queues: order,
                    reply,
                })
                .await;
            match polled {
                Ok(Some(job)) => {
                    self.inner.wait_registry.unregister(&names, &waiter);
                    return Ok(job);
                }
                Ok(None) => {}
                Err(err) => {
                    self.inner.wait_registry.unregister(&names, &waiter);
                    return Err(err);
                }
            }
            if Instant::now() >= deadline {
                self.inner.wait_registry.unregister(&names, &waiter);
                return Err(EngineError::FetchTimeout(timeout));
            }
            let _ = tokio::time::timeout_at(deadline, waiter.wait()).await;
            self.inner.wait_registry.unregister(&names, &waiter);
        }
    }

    // ===== Transactions =====

    pub fn begin_transaction(&self) -> StorageTransaction {
        StorageTransaction {
            inner: Arc::clone(&self.inner),
            ops: Vec::new(),
        }
    }
}

/// Write-command accumulator. Nothing is applied until [`commit`]; the
/// accumulated sub-commands then execute in order, atomically with
/// respect to every other command. A sub-command failure aborts the
/// remainder without rolling back what already applied. Dropping an
/// uncommitted transaction discards it.
///
/// [`commit`]: StorageTransaction::commit
pub struct StorageTransaction {
    inner: Arc<StorageInner>,
    ops: Vec<WriteOp>,
}

impl StorageTransaction {
    /// Create a job entry and return its fresh identifier. The id is
    /// valid for use in later sub-commands of the same transaction.
    pub fn create_job(
        &mut self,
        payload: Value,
        parameters: impl IntoIterator<Item = (String, String)>,
        expire_in: Option<Duration>,
    ) -> JobId {
        let id = JobId::next();
        self.ops.push(WriteOp::CreateJob {
            id,
            payload: Arc::new(payload),
            parameters: parameters.into_iter().collect(),
            expire_in,
        });
        id
    }

    pub fn set_job_parameter(&mut self, id: &str, name: &str, value: &str) {
        if let Some(id) = JobId::parse(id) {
            self.ops.push(WriteOp::SetJobParameter {
                id,
                name: name.to_string(),
                value: value.to_string(),
            });
        }
    }

    pub fn expire_job(&mut self, id: &str, expire_in: Duration) {
        if let Some(id) = JobId::parse(id) {
            self.ops.push(WriteOp::ExpireJob { id, expire_in });
        }
    }

    pub fn persist_job(&mut self, id: &str) {
        if let Some(id) = JobId::parse(id) {
            self.ops.push(WriteOp::PersistJob { id });
        }
    }

    /// Make `name` the job's current state and move it between state
    /// buckets.
    pub fn set_job_state(
        &mut self,
        id: &str,
        name: &str,
        reason: Option<&str>,
        data: impl IntoIterator<Item = (String, String)>,
    ) {
        if let Some(id) = JobId::parse(id) {
            self.ops.push(WriteOp::SetJobState {
                id,
                name: CompactString::from(name),
                reason: reason.map(str::to_string),
                data: data.into_iter().collect(),
            });
        }
    }

    /// Record a state in the job's history without making it current.
    pub fn add_job_state(
        &mut self,
        id: &str,
        name: &str,
        reason: Option<&str>,
        data: impl IntoIterator<Item = (String, String)>,
    ) {
        if let Some(id) = JobId::parse(id) {
            self.ops.push(WriteOp::AddJobState {
                id,
                name: CompactString::from(name),
                reason: reason.map(str::to_string),
                data: data.into_iter().collect(),
            });
        }
    }

    pub fn add_to_queue(&mut self, queue: &str, id: &str) {
        if let Some(id) = JobId::parse(id) {
            self.ops.push(WriteOp::AddToQueue {
                queue: CompactString::from(queue),
                id,
            });
        }
    }

    /// No-op: fetched jobs are already delivered (no invisibility
    /// timeout), so there is nothing to remove.
    pub fn remove_from_queue(&mut self, queue: &str, id: &str) {
        if let Some(id) = JobId::parse(id) {
            self.ops.push(WriteOp::RemoveFromQueue {
                queue: CompactString::from(queue),
                id,
            });
        }
    }

    pub fn increment_counter(&mut self, key: &str) {
        self.ops.push(WriteOp::IncrementCounter {
            key: key.to_string(),
            expire_in: None,
        });
    }

    pub fn increment_counter_with_expiry(&mut self, key: &str, expire_in: Duration) {
        self.ops.push(WriteOp::IncrementCounter {
            key: key.to_string(),
            expire_in: Some(expire_in),
        });
    }

    pub fn decrement_counter(&mut self, key: &str) {
        self.ops.push(WriteOp::DecrementCounter {
            key: key.to_string(),
            expire_in: None,
        });
    }

    pub fn decrement_counter_with_expiry(&mut self, key: &str, expire_in: Duration) {
        self.ops.push(WriteOp::DecrementCounter {
            key: key.to_string(),
            expire_in: Some(expire_in),
        });
    }

    pub fn expire_counter(&mut self, key: &str, expire_in: Duration) {
        self.ops.push(WriteOp::ExpireCounter {
            key: key.to_string(),
            expire_in,
        });
    }

    pub fn add_to_set(&mut self, key: &str, value: &str) {
        self.add_to_set_with_score(key, value, 0.0);
    }

    pub fn add_to_set_with_score(&mut self, key: &str, value: &str, score: f64) {
        self.ops.push(WriteOp::AddToSet {
            key: key.to_string(),
            value: value.to_string(),
            score,
        });
    }

    pub fn add_range_to_set(&mut self, key: &str, values: impl IntoIterator<Item = String>) {
        self.ops.push(WriteOp::AddRangeToSet {
            key: key.to_string(),
            values: values.into_iter().collect(),
        });
    }

    pub fn remove_from_set(&mut self, key: &str, value: &str) {
        self.ops.push(WriteOp::RemoveFromSet {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    pub fn remove_set(&mut self, key: &str) {
        self.ops.push(WriteOp::RemoveSet {
            key: key.to_string(),
        });
    }

    pub fn expire_set(&mut self, key: &str, expire_in: Duration) {
        self.ops.push(WriteOp::ExpireSet {
            key: key.to_string(),
            expire_in,
        });
    }

    pub fn persist_set(&mut self, key: &str) {
        self.ops.push(WriteOp::PersistSet {
            key: key.to_string(),
        });
    }

    pub fn insert_to_list(&mut self, key: &str, value: &str) {
        self.ops.push(WriteOp::InsertToList {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    pub fn remove_from_list(&mut self, key: &str, value: &str) {
        self.ops.push(WriteOp::RemoveFromList {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// Keep only the inclusive index range `keep_from..=keep_to`.
    pub fn trim_list(&mut self, key: &str, keep_from: usize, keep_to: usize) {
        self.ops.push(WriteOp::TrimList {
            key: key.to_string(),
            keep_from,
            keep_to,
        });
    }

    pub fn expire_list(&mut self, key: &str, expire_in: Duration) {
        self.ops.push(WriteOp::ExpireList {
            key: key.to_string(),
            expire_in,
        });
    }

    pub fn persist_list(&mut self, key: &str) {
        self.ops.push(WriteOp::PersistList {
            key: key.to_string(),
        });
    }

    pub fn set_range_in_hash(
        &mut self,
        key: &str,
        fields: impl IntoIterator<Item = (String, String)>,
    ) {
        self.ops.push(WriteOp::SetRangeInHash {
            key: key.to_string(),
            fields: fields.into_iter().collect(),
        });
    }

    pub fn remove_hash(&mut self, key: &str) {
        self.ops.push(WriteOp::RemoveHash {
            key: key.to_string(),
        });
    }

    pub fn expire_hash(&mut self, key: &str, expire_in: Duration) {
        self.ops.push(WriteOp::ExpireHash {
            key: key.to_string(),
            expire_in,
        });
    }

    pub fn persist_hash(&mut self, key: &str) {
        self.ops.push(WriteOp::PersistHash {
            key: key.to_string(),
        });
    }

    /// Execute every accumulated sub-command in order against the same
    /// state snapshot.
    pub async fn commit(self) -> EngineResult<()> {
        let ops = self.ops;
        self.inner
            .dispatcher
            .submit(|reply| Envelope::Commit { ops, reply })
            .await?
    }
}

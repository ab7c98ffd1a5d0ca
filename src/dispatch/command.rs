//! Command catalog: reifiable units of work executed by the dispatcher.
//!
//! Write commands are plain data so a transaction can hold an ordered
//! list of them; read and monitoring commands carry their typed reply
//! channel. Every command is a pure function from state to result plus,
//! for enqueues, a post-commit signal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::clock::{MonotonicClock, MonoTime};
use crate::error::{EngineError, EngineResult};
use crate::key::JobId;
use crate::monitoring::{
    JobDetailsDto, JobSummaryDto, QueueDetailsDto, ServerDto, StateHistoryDto, StatisticsDto,
};
use crate::state::{MemoryState, MemoryStats, StateRecord};
use crate::states;

pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Job snapshot returned by the connection facade.
#[derive(Debug, Clone)]
pub struct JobData {
    pub payload: Arc<Value>,
    pub state_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub parameters: HashMap<String, String>,
}

/// Current-state snapshot returned by the connection facade.
#[derive(Debug, Clone)]
pub struct StateData {
    pub name: String,
    pub reason: Option<String>,
    pub data: HashMap<String, String>,
}

/// A job handed to a worker. Delivery is final: there is no invisibility
/// timeout, retrying is handled by higher-level state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedJob {
    pub job_id: JobId,
    pub queue: String,
}

/// The write-command catalog. A transaction is an ordered list of these.
#[derive(Debug, Clone)]
pub enum WriteOp {
    CreateJob {
        id: JobId,
        payload: Arc<Value>,
        parameters: Vec<(String, String)>,
        expire_in: Option<Duration>,
    },
    SetJobParameter {
        id: JobId,
        name: String,
        value: String,
    },
    ExpireJob {
        id: JobId,
        expire_in: Duration,
    },
    PersistJob {
        id: JobId,
    },
    SetJobState {
        id: JobId,
        name: CompactString,
        reason: Option<String>,
        data: Vec<(String, String)>,
    },
    AddJobState {
        id: JobId,
        name: CompactString,
        reason: Option<String>,
        data: Vec<(String, String)>,
    },
    AddToQueue {
        queue: CompactString,
        id: JobId,
    },
    /// Kept for catalog completeness; fetched jobs are already delivered.
    RemoveFromQueue {
        queue: CompactString,
        id: JobId,
    },
    IncrementCounter {
        key: String,
        expire_in: Option<Duration>,
    },
    DecrementCounter {
        key: String,
        expire_in: Option<Duration>,
    },
    ExpireCounter {
        key: String,
        expire_in: Duration,
    },
    AddToSet {
        key: String,
        value: String,
        score: f64,
    },
    AddRangeToSet {
        key: String,
        values: Vec<String>,
    },
    RemoveFromSet {
        key: String,
        value: String,
    },
    RemoveSet {
        key: String,
    },
    ExpireSet {
        key: String,
        expire_in: Duration,
    },
    PersistSet {
        key: String,
    },
    InsertToList {
        key: String,
        value: String,
    },
    RemoveFromList {
        key: String,
        value: String,
    },
    TrimList {
        key: String,
        keep_from: usize,
        keep_to: usize,
    },
    ExpireList {
        key: String,
        expire_in: Duration,
    },
    PersistList {
        key: String,
    },
    SetRangeInHash {
        key: String,
        fields: Vec<(String, String)>,
    },
    RemoveHash {
        key: String,
    },
    ExpireHash {
        key: String,
        expire_in: Duration,
    },
    PersistHash {
        key: String,
    },
    AnnounceServer {
        server_id: String,
        worker_count: usize,
        queues: Vec<String>,
    },
    ServerHeartbeat {
        server_id: String,
    },
    RemoveServer {
        server_id: String,
    },
    RemoveTimedOutServers {
        older_than: Duration,
    },
}

/// Read commands fabricate an output from state without mutating it.
pub(crate) enum ReadCommand {
    JobData {
        id: JobId,
        reply: Reply<Option<JobData>>,
    },
    StateData {
        id: JobId,
        reply: Reply<Option<StateData>>,
    },
    JobParameter {
        id: JobId,
        name: String,
        reply: Reply<Option<String>>,
    },
    Counter {
        key: String,
        reply: Reply<i64>,
    },
    Counters {
        keys: Vec<String>,
        reply: Reply<Vec<i64>>,
    },
    SetCount {
        key: String,
        reply: Reply<usize>,
    },
    SetContains {
        key: String,
        value: String,
        reply: Reply<bool>,
    },
    SetRange {
        key: String,
        from: usize,
        to: usize,
        reply: Reply<Vec<String>>,
    },
    AllSetItems {
        key: String,
        reply: Reply<Vec<String>>,
    },
    FirstSetValueByScore {
        key: String,
        from_score: f64,
        to_score: f64,
        reply: Reply<Option<String>>,
    },
    SetTtl {
        key: String,
        reply: Reply<Option<Duration>>,
    },
    HashFields {
        key: String,
        reply: Reply<Option<HashMap<String, String>>>,
    },
    HashField {
        key: String,
        name: String,
        reply: Reply<Option<String>>,
    },
    HashCount {
        key: String,
        reply: Reply<usize>,
    },
    HashTtl {
        key: String,
        reply: Reply<Option<Duration>>,
    },
    ListItems {
        key: String,
        reply: Reply<Vec<String>>,
    },
    ListRange {
        key: String,
        from: usize,
        to: usize,
        reply: Reply<Vec<String>>,
    },
    ListCount {
        key: String,
        reply: Reply<usize>,
    },
    ListTtl {
        key: String,
        reply: Reply<Option<Duration>>,
    },
}

/// Monitoring commands project entities to DTO shapes.
pub(crate) enum MonitorCommand {
    Queues {
        reply: Reply<Vec<QueueDetailsDto>>,
    },
    Servers {
        reply: Reply<Vec<ServerDto>>,
    },
    JobDetails {
        id: JobId,
        reply: Reply<Option<JobDetailsDto>>,
    },
    Statistics {
        reply: Reply<StatisticsDto>,
    },
    JobsByState {
        state: String,
        from: usize,
        count: usize,
        reply: Reply<Vec<JobSummaryDto>>,
    },
    EnqueuedJobs {
        queue: String,
        from: usize,
        count: usize,
        reply: Reply<Vec<JobSummaryDto>>,
    },
    EnqueuedCount {
        queue: String,
        reply: Reply<usize>,
    },
    StateCount {
        state: String,
        reply: Reply<usize>,
    },
    MemoryStats {
        reply: Reply<MemoryStats>,
    },
}

/// Dispatcher mailbox envelope. One lane per variant, identical
/// serialization discipline: arrival order is execution order.
pub(crate) enum Envelope {
    Read(ReadCommand),
    Monitor(MonitorCommand),
    Commit {
        ops: Vec<WriteOp>,
        reply: Reply<EngineResult<()>>,
    },
    PollQueues {
        queues: Vec<CompactString>,
        reply: Reply<Option<FetchedJob>>,
    },
}

/// Apply one write against the state. Queues that received a job are
/// recorded in `fed_queues` for post-commit signaling.
pub(crate) fn apply_write(
    state: &mut MemoryState,
    now: MonoTime,
    op: WriteOp,
    fed_queues: &mut Vec<CompactString>,
) -> EngineResult<()> {
    match op {
        WriteOp::CreateJob {
            id,
            payload,
            parameters,
            expire_in,
        } => state.job_create(id, payload, parameters, now, expire_in),
        WriteOp::SetJobParameter { id, name, value } => {
            state.job_set_parameter(id, &name, value);
        }
        WriteOp::ExpireJob { id, expire_in } => state.job_expire(id, now, Some(expire_in)),
        WriteOp::PersistJob { id } => state.job_expire(id, now, None),
        WriteOp::SetJobState {
            id,
            name,
            reason,
            data,
        } => {
            if name.is_empty() {
                return Err(EngineError::Command("state name must not be empty".into()));
            }
            state.job_apply_state(
                id,
                StateRecord {
                    name,
                    reason,
                    created_at: now,
                    data,
                },
                true,
            );
        }
        WriteOp::AddJobState {
            id,
            name,
            reason,
            data,
        } => {
            state.job_apply_state(
                id,
                StateRecord {
                    name,
                    reason,
                    created_at: now,
                    data,
                },
                false,
            );
        }
        WriteOp::AddToQueue { queue, id } => {
            state.enqueue(&queue, id);
            if !fed_queues.contains(&queue) {
                fed_queues.push(queue);
            }
        }
        WriteOp::RemoveFromQueue { .. } => {}
        WriteOp::IncrementCounter { key, expire_in } => {
            state.counter_add(&key, 1, now, expire_in);
        }
        WriteOp::DecrementCounter { key, expire_in } => {
            state.counter_add(&key, -1, now, expire_in);
        }
        WriteOp::ExpireCounter { key, expire_in } => {
            state.counter_expire(&key, now, Some(expire_in));
        }
        WriteOp::AddToSet { key, value, score } => state.set_add(&key, &value, score),
        WriteOp::AddRangeToSet { key, values } => {
            for value in values {
                state.set_add(&key, &value, 0.0);
            }
        }
        WriteOp::RemoveFromSet { key, value } => state.set_remove_value(&key, &value),
        WriteOp::RemoveSet { key } => state.set_delete(&key),
        WriteOp::ExpireSet { key, expire_in } => state.set_expire(&key, now, Some(expire_in)),
        WriteOp::PersistSet { key } => state.set_expire(&key, now, None),
        WriteOp::InsertToList { key, value } => state.list_prepend(&key, value),
        WriteOp::RemoveFromList { key, value } => state.list_remove_value(&key, &value),
        WriteOp::TrimList {
            key,
            keep_from,
            keep_to,
        } => state.list_trim(&key, keep_from, keep_to),
        WriteOp::ExpireList { key, expire_in } => state.list_expire(&key, now, Some(expire_in)),
        WriteOp::PersistList { key } => state.list_expire(&key, now, None),
        WriteOp::SetRangeInHash { key, fields } => state.hash_update(&key, fields),
        WriteOp::RemoveHash { key } => state.hash_delete(&key),
        WriteOp::ExpireHash { key, expire_in } => state.hash_expire(&key, now, Some(expire_in)),
        WriteOp::PersistHash { key } => state.hash_expire(&key, now, None),
        WriteOp::AnnounceServer {
            server_id,
            worker_count,
            queues,
        } => state.server_announce(server_id, worker_count, queues, now),
        WriteOp::ServerHeartbeat { server_id } => state.server_heartbeat(&server_id, now),
        WriteOp::RemoveServer { server_id } => state.server_remove(&server_id),
        WriteOp::RemoveTimedOutServers { older_than } => {
            state.servers_remove_timed_out(now, older_than);
        }
    }
    Ok(())
}

fn ttl(expire_at: Option<MonoTime>, now: MonoTime) -> Option<Duration> {
    expire_at.map(|at| at.saturating_since(now))
}

pub(crate) fn answer_read(state: &MemoryState, clock: &MonotonicClock, cmd: ReadCommand) {
    let now = clock.now();
    match cmd {
        ReadCommand::JobData { id, reply } => {
            let data = state.job(id).map(|job| JobData {
                payload: job.payload.clone(),
                state_name: job.state_name().map(str::to_string),
                created_at: clock.to_utc(job.created_at),
                parameters: job
                    .parameters
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            });
            let _ = reply.send(data);
        }
        ReadCommand::StateData { id, reply } => {
            let data = state
                .job(id)
                .and_then(|job| job.current_state.as_deref())
                .map(|s| StateData {
                    name: s.name.to_string(),
                    reason: s.reason.clone(),
                    data: s.data.iter().cloned().collect(),
                });
            let _ = reply.send(data);
        }
        ReadCommand::JobParameter { id, name, reply } => {
            let value = state
                .job(id)
                .and_then(|job| job.parameters.get(&name))
                .cloned();
            let _ = reply.send(value);
        }
        ReadCommand::Counter { key, reply } => {
            let _ = reply.send(state.counter(&key));
        }
        ReadCommand::Counters { keys, reply } => {
            let values = keys.iter().map(|k| state.counter(k)).collect();
            let _ = reply.send(values);
        }
        ReadCommand::SetCount { key, reply } => {
            let _ = reply.send(state.set(&key).map_or(0, |s| s.members.len()));
        }
        ReadCommand::SetContains { key, value, reply } => {
            let _ = reply.send(state.set(&key).is_some_and(|s| s.members.contains(&value)));
        }
        ReadCommand::SetRange {
            key,
            from,
            to,
            reply,
        } => {
            let items = state
                .set(&key)
                .map_or_else(Vec::new, |s| s.members.range_by_rank(from, to));
            let _ = reply.send(items);
        }
        ReadCommand::AllSetItems { key, reply } => {
            let items = state.set(&key).map_or_else(Vec::new, |s| {
                s.members.iter_ordered().map(str::to_string).collect()
            });
            let _ = reply.send(items);
        }
        ReadCommand::FirstSetValueByScore {
            key,
            from_score,
            to_score,
            reply,
        } => {
            let value = state
                .set(&key)
                .and_then(|s| s.members.first_by_score(from_score, to_score));
            let _ = reply.send(value);
        }
        ReadCommand::SetTtl { key, reply } => {
            let _ = reply.send(state.set(&key).and_then(|s| ttl(s.expire_at, now)));
        }
        ReadCommand::HashFields { key, reply } => {
            let fields = state.hash(&key).map(|h| {
                h.fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect()
            });
            let _ = reply.send(fields);
        }
        ReadCommand::HashField { key, name, reply } => {
            let _ = reply.send(state.hash(&key).and_then(|h| h.fields.get(&name).cloned()));
        }
        ReadCommand::HashCount { key, reply } => {
            let _ = reply.send(state.hash(&key).map_or(0, |h| h.fields.len()));
        }
        ReadCommand::HashTtl { key, reply } => {
            let _ = reply.send(state.hash(&key).and_then(|h| ttl(h.expire_at, now)));
        }
        ReadCommand::ListItems { key, reply } => {
            let items = state.list(&key).map_or_else(Vec::new, |l| {
                l.iter().map(str::to_string).collect()
            });
            let _ = reply.send(items);
        }
        ReadCommand::ListRange {
            key,
            from,
            to,
            reply,
        } => {
            let items = state
                .list(&key)
                .map_or_else(Vec::new, |l| l.range(from, to));
            let _ = reply.send(items);
        }
        ReadCommand::ListCount { key, reply } => {
            let _ = reply.send(state.list(&key).map_or(0, |l| l.len()));
        }
        ReadCommand::ListTtl { key, reply } => {
            let _ = reply.send(state.list(&key).and_then(|l| ttl(l.expire_at, now)));
        }
    }
}

fn job_summary(state: &MemoryState, clock: &MonotonicClock, id: JobId) -> Option<JobSummaryDto> {
    state.job(id).map(|job| {
        let current = job.current_state.as_deref();
        JobSummaryDto {
            id,
            payload: job.payload.clone(),
            state_name: current.map(|s| s.name.to_string()),
            state_reason: current.and_then(|s| s.reason.clone()),
            state_data: current
                .map(|s| s.data.iter().cloned().collect())
                .unwrap_or_default(),
            created_at: clock.to_utc(job.created_at),
            state_created_at: current.map(|s| clock.to_utc(s.created_at)),
        }
    })
}

pub(crate) fn answer_monitor(state: &MemoryState, clock: &MonotonicClock, cmd: MonitorCommand) {
    match cmd {
        MonitorCommand::Queues { reply } => {
            let mut queues: Vec<QueueDetailsDto> = state
                .queues
                .iter()
                .map(|(name, fifo)| QueueDetailsDto {
                    name: name.to_string(),
                    length: fifo.len(),
                    first_jobs: fifo
                        .iter()
                        .take(5)
                        .filter_map(|id| job_summary(state, clock, *id))
                        .collect(),
                })
                .collect();
            queues.sort_by(|a, b| a.name.cmp(&b.name));
            let _ = reply.send(queues);
        }
        MonitorCommand::Servers { reply } => {
            let mut servers: Vec<ServerDto> = state
                .servers
                .iter()
                .map(|(id, s)| ServerDto {
                    id: id.clone(),
                    worker_count: s.worker_count,
                    queues: s.queues.clone(),
                    started_at: clock.to_utc(s.started_at),
                    heartbeat_at: clock.to_utc(s.heartbeat_at),
                })
                .collect();
            servers.sort_by(|a, b| a.id.cmp(&b.id));
            let _ = reply.send(servers);
        }
        MonitorCommand::JobDetails { id, reply } => {
            let details = state.job(id).map(|job| JobDetailsDto {
                id,
                payload: job.payload.clone(),
                created_at: clock.to_utc(job.created_at),
                expire_at: job.expire_at.map(|at| clock.to_utc(at)),
                parameters: job
                    .parameters
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                history: job
                    .history
                    .iter()
                    .map(|s| StateHistoryDto {
                        name: s.name.to_string(),
                        reason: s.reason.clone(),
                        created_at: clock.to_utc(s.created_at),
                        data: s.data.iter().cloned().collect(),
                    })
                    .collect(),
            });
            let _ = reply.send(details);
        }
        MonitorCommand::Statistics { reply } => {
            let stats = StatisticsDto {
                enqueued: state.state_count(states::ENQUEUED),
                scheduled: state.state_count(states::SCHEDULED),
                processing: state.state_count(states::PROCESSING),
                failed: state.state_count(states::FAILED),
                awaiting: state.state_count(states::AWAITING),
                succeeded: state.counter("stats:succeeded"),
                deleted: state.counter("stats:deleted"),
                recurring: state.set("recurring-jobs").map_or(0, |s| s.members.len()),
                retries: state.set("retries").map_or(0, |s| s.members.len()),
                servers: state.servers.len(),
                queues: state.queues.len(),
            };
            let _ = reply.send(stats);
        }
        MonitorCommand::JobsByState {
            state: name,
            from,
            count,
            reply,
        } => {
            let jobs = state
                .state_bucket(&name)
                .skip(from)
                .take(count)
                .filter_map(|id| job_summary(state, clock, id))
                .collect();
            let _ = reply.send(jobs);
        }
        MonitorCommand::EnqueuedJobs {
            queue,
            from,
            count,
            reply,
        } => {
            let jobs = state.queues.get(&queue).map_or_else(Vec::new, |fifo| {
                fifo.iter()
                    .skip(from)
                    .take(count)
                    .filter_map(|id| job_summary(state, clock, *id))
                    .collect()
            });
            let _ = reply.send(jobs);
        }
        MonitorCommand::EnqueuedCount { queue, reply } => {
            let _ = reply.send(state.queue_len(&queue));
        }
        MonitorCommand::StateCount { state: name, reply } => {
            let _ = reply.send(state.state_count(&name));
        }
        MonitorCommand::MemoryStats { reply } => {
            let _ = reply.send(state.memory_stats());
        }
    }
}

//! Monitoring facade: read-only projections for dashboards.
//!
//! Listings are paged with `from`/`count`; timelines read the
//! `stats:{type}:*` counters maintained by the framework's state
//! transitions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::dispatch::command::{Envelope, MonitorCommand, ReadCommand, Reply};
use crate::error::EngineResult;
use crate::key::JobId;
use crate::state::MemoryStats;
use crate::states;
use crate::storage::StorageInner;

#[derive(Debug, Clone, Serialize)]
pub struct JobSummaryDto {
    pub id: JobId,
    pub payload: Arc<Value>,
    pub state_name: Option<String>,
    pub state_reason: Option<String>,
    pub state_data: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub state_created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueDetailsDto {
    pub name: String,
    pub length: usize,
    /// Up to the first five enqueued jobs.
    pub first_jobs: Vec<JobSummaryDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerDto {
    pub id: String,
    pub worker_count: usize,
    pub queues: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateHistoryDto {
    pub name: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub data: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDetailsDto {
    pub id: JobId,
    pub payload: Arc<Value>,
    pub created_at: DateTime<Utc>,
    pub expire_at: Option<DateTime<Utc>>,
    pub parameters: HashMap<String, String>,
    /// Most recent transition first.
    pub history: Vec<StateHistoryDto>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatisticsDto {
    pub enqueued: usize,
    pub scheduled: usize,
    pub processing: usize,
    pub failed: usize,
    pub awaiting: usize,
    pub succeeded: i64,
    pub deleted: i64,
    pub recurring: usize,
    pub retries: usize,
    pub servers: usize,
    pub queues: usize,
}

/// Read-only projections over the live state.
pub struct MonitoringApi {
    inner: Arc<StorageInner>,
}

impl MonitoringApi {
    pub(crate) fn new(inner: Arc<StorageInner>) -> Self {
        Self { inner }
    }

    async fn monitor<T>(&self, build: impl FnOnce(Reply<T>) -> MonitorCommand) -> EngineResult<T> {
        self.inner
            .dispatcher
            .submit(|reply| Envelope::Monitor(build(reply)))
            .await
    }

    pub async fn queues(&self) -> EngineResult<Vec<QueueDetailsDto>> {
        self.monitor(|reply| MonitorCommand::Queues { reply }).await
    }

    pub async fn servers(&self) -> EngineResult<Vec<ServerDto>> {
        self.monitor(|reply| MonitorCommand::Servers { reply })
            .await
    }

    pub async fn job_details(&self, id: &str) -> EngineResult<Option<JobDetailsDto>> {
        let Some(id) = JobId::parse(id) else {
            return Ok(None);
        };
        self.monitor(|reply| MonitorCommand::JobDetails { id, reply })
            .await
    }

    pub async fn statistics(&self) -> EngineResult<StatisticsDto> {
        self.monitor(|reply| MonitorCommand::Statistics { reply })
            .await
    }

    /// Jobs currently sitting in `queue`, oldest first.
    pub async fn enqueued_jobs(
        &self,
        queue: &str,
        from: usize,
        count: usize,
    ) -> EngineResult<Vec<JobSummaryDto>> {
        let queue = queue.to_string();
        self.monitor(|reply| MonitorCommand::EnqueuedJobs {
            queue,
            from,
            count,
            reply,
        })
        .await
    }

    /// Always empty: fetched jobs are not tracked distinctly from
    /// queued jobs.
    pub async fn fetched_jobs(
        &self,
        _queue: &str,
        _from: usize,
        _count: usize,
    ) -> EngineResult<Vec<JobSummaryDto>> {
        Ok(Vec::new())
    }

    async fn jobs_by_state(
        &self,
        state: &str,
        from: usize,
        count: usize,
    ) -> EngineResult<Vec<JobSummaryDto>> {
        let state = state.to_string();
        self.monitor(|reply| MonitorCommand::JobsByState {
            state,
            from,
            count,
            reply,
        })
        .await
    }

    async fn state_count(&self, state: &str) -> EngineResult<usize> {
        let state = state.to_string();
        self.monitor(|reply| MonitorCommand::StateCount { state, reply })
            .await
    }

    pub async fn scheduled_jobs(&self, from: usize, count: usize) -> EngineResult<Vec<JobSummaryDto>> {
        self.jobs_by_state(states::SCHEDULED, from, count).await
    }

    pub async fn processing_jobs(
        &self,
        from: usize,
        count: usize,
    ) -> EngineResult<Vec<JobSummaryDto>> {
        self.jobs_by_state(states::PROCESSING, from, count).await
    }

    pub async fn succeeded_jobs(&self, from: usize, count: usize) -> EngineResult<Vec<JobSummaryDto>> {
        self.jobs_by_state(states::SUCCEEDED, from, count).await
    }

    pub async fn failed_jobs(&self, from: usize, count: usize) -> EngineResult<Vec<JobSummaryDto>> {
        self.jobs_by_state(states::FAILED, from, count).await
    }

    pub async fn deleted_jobs(&self, from: usize, count: usize) -> EngineResult<Vec<JobSummaryDto>> {
        self.jobs_by_state(states::DELETED, from, count).await
    }

    pub async fn awaiting_jobs(&self, from: usize, count: usize) -> EngineResult<Vec<JobSummaryDto>> {
        self.jobs_by_state(states::AWAITING, from, count).await
    }

    /// Queue length; fetched jobs are not tracked, so this equals the
    /// enqueued count.
    pub async fn enqueued_and_fetched_count(&self, queue: &str) -> EngineResult<usize> {
        let queue = queue.to_string();
        self.monitor(|reply| MonitorCommand::EnqueuedCount { queue, reply })
            .await
    }

    pub async fn scheduled_count(&self) -> EngineResult<usize> {
        self.state_count(states::SCHEDULED).await
    }

    pub async fn processing_count(&self) -> EngineResult<usize> {
        self.state_count(states::PROCESSING).await
    }

    pub async fn succeeded_list_count(&self) -> EngineResult<usize> {
        self.state_count(states::SUCCEEDED).await
    }

    pub async fn failed_count(&self) -> EngineResult<usize> {
        self.state_count(states::FAILED).await
    }

    pub async fn deleted_list_count(&self) -> EngineResult<usize> {
        self.state_count(states::DELETED).await
    }

    pub async fn awaiting_count(&self) -> EngineResult<usize> {
        self.state_count(states::AWAITING).await
    }

    // ===== Timelines =====

    async fn counters(&self, keys: Vec<String>) -> EngineResult<Vec<i64>> {
        self.inner
            .dispatcher
            .submit(|reply| Envelope::Read(ReadCommand::Counters { keys, reply }))
            .await
    }

    /// Daily buckets for the last 7 days, keys `stats:{type}:%Y-%m-%d`.
    async fn daily_counts(&self, kind: &str) -> EngineResult<Vec<(NaiveDate, i64)>> {
        let today = self.inner.clock.to_utc(self.inner.clock.now()).date_naive();
        let dates: Vec<NaiveDate> = (0..7).map(|d| today - chrono::Duration::days(d)).collect();
        let keys = dates
            .iter()
            .map(|d| format!("stats:{kind}:{}", d.format("%Y-%m-%d")))
            .collect();
        let counts = self.counters(keys).await?;
        Ok(dates.into_iter().zip(counts).collect())
    }

    /// Hourly buckets for the last 24 hours, keys
    /// `stats:{type}:%Y-%m-%d-%H`.
    async fn hourly_counts(&self, kind: &str) -> EngineResult<Vec<(DateTime<Utc>, i64)>> {
        let now = self.inner.clock.to_utc(self.inner.clock.now());
        let hours: Vec<DateTime<Utc>> = (0..24).map(|h| now - chrono::Duration::hours(h)).collect();
        let keys = hours
            .iter()
            .map(|h| format!("stats:{kind}:{}", h.format("%Y-%m-%d-%H")))
            .collect();
        let counts = self.counters(keys).await?;
        Ok(hours.into_iter().zip(counts).collect())
    }

    pub async fn succeeded_by_dates_count(&self) -> EngineResult<Vec<(NaiveDate, i64)>> {
        self.daily_counts("succeeded").await
    }

    pub async fn failed_by_dates_count(&self) -> EngineResult<Vec<(NaiveDate, i64)>> {
        self.daily_counts("failed").await
    }

    pub async fn hourly_succeeded_jobs(&self) -> EngineResult<Vec<(DateTime<Utc>, i64)>> {
        self.hourly_counts("succeeded").await
    }

    pub async fn hourly_failed_jobs(&self) -> EngineResult<Vec<(DateTime<Utc>, i64)>> {
        self.hourly_counts("failed").await
    }

    /// Collection sizes, for diagnostics and invariant checks.
    pub async fn memory_stats(&self) -> EngineResult<MemoryStats> {
        self.monitor(|reply| MonitorCommand::MemoryStats { reply })
            .await
    }
}

//! Engine test suite.
//!
//! Covers the command catalog, transaction semantics (including the
//! documented no-rollback behavior), blocking fetch, locks, eviction,
//! and the monitoring projections.

use std::time::Duration;

use serde_json::json;

use crate::config::EngineOptions;
use crate::states;
use crate::storage::JobStorage;

mod commands;
mod eviction;
mod locks;

fn storage() -> JobStorage {
    JobStorage::default()
}

/// Engine with a fast eviction tick for expiry tests.
fn fast_storage() -> JobStorage {
    JobStorage::new(EngineOptions {
        eviction_interval: Duration::from_millis(10),
        ..EngineOptions::default()
    })
}

/// Create a job, mark it Enqueued, and push it to `queue`.
async fn enqueue_job(storage: &JobStorage, queue: &str) -> String {
    let conn = storage.connection();
    let mut tx = conn.begin_transaction();
    let id = tx
        .create_job(
            json!({"type": "test"}),
            Vec::new(),
            Some(Duration::from_secs(3600)),
        )
        .to_string();
    tx.set_job_state(&id, states::ENQUEUED, None, Vec::new());
    tx.add_to_queue(queue, &id);
    tx.commit().await.unwrap();
    id
}

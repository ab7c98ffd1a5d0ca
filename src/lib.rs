//! emberq - In-memory job storage engine.
//!
//! Holds the entire runtime state of a background-job framework (jobs,
//! queues, server registrations, and auxiliary hashes, lists, sorted sets,
//! counters, locks) in process memory and serves concurrent worker and
//! monitoring clients through a strictly serialized command pipeline.
//!
//! All interfaces are in-process: embedders construct a [`JobStorage`],
//! hand out [`StorageConnection`]s to workers, and read projections
//! through the [`MonitoringApi`].

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod key;
pub mod locks;
pub mod monitoring;
pub mod queues;
pub mod state;
pub mod states;
pub mod storage;
pub mod telemetry;

pub use config::{EngineOptions, StringComparer};
pub use dispatch::command::{FetchedJob, JobData, StateData};
pub use error::{EngineError, EngineResult};
pub use key::JobId;
pub use locks::LockHandle;
pub use monitoring::MonitoringApi;
pub use storage::{JobStorage, StorageConnection, StorageTransaction};

#[cfg(test)]
mod tests;

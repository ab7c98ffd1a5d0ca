//! Well-known job state names.
//!
//! State-name comparisons are case-insensitive throughout the engine, so
//! these constants are a convenience, not a requirement.

pub const ENQUEUED: &str = "Enqueued";
pub const SCHEDULED: &str = "Scheduled";
pub const PROCESSING: &str = "Processing";
pub const SUCCEEDED: &str = "Succeeded";
pub const FAILED: &str = "Failed";
pub const DELETED: &str = "Deleted";
pub const AWAITING: &str = "Awaiting";

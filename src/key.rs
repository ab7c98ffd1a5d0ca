//! Job identifier generation and parsing.
//!
//! Identifiers are process-local, strictly increasing, and carry a
//! canonical decimal string form for external identification. Order is
//! irrelevant for correctness but serves as a deterministic tie-break in
//! the secondary indexes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, totally ordered job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    /// Fresh identifier, unique within the process.
    pub fn next() -> JobId {
        JobId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Parse the canonical form. Unparseable input yields `None`; callers
    /// treat that as an unknown job.
    pub fn parse(s: &str) -> Option<JobId> {
        if s.is_empty() || s.len() > 20 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse::<u64>().ok().map(JobId)
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_increase() {
        let a = JobId::next();
        let b = JobId::next();
        assert!(b > a);
    }

    #[test]
    fn string_form_round_trips() {
        let id = JobId::next();
        assert_eq!(JobId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(JobId::parse(""), None);
        assert_eq!(JobId::parse("abc"), None);
        assert_eq!(JobId::parse("12x"), None);
        assert_eq!(JobId::parse("-5"), None);
        assert_eq!(JobId::parse("999999999999999999999999"), None);
    }
}

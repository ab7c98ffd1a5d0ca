//! Engine configuration.

use std::borrow::Cow;
use std::time::Duration;

/// How user-supplied keys, fields, and sorted-set values compare.
///
/// Applied to entity keys, hash fields, set values, job parameters, and
/// queue names. The job-state index is case-insensitive regardless of
/// this setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringComparer {
    /// Byte-exact comparison (Redis-like). Default.
    #[default]
    Ordinal,
    /// Case-insensitive comparison (SQL-Server-like).
    OrdinalIgnoreCase,
}

impl StringComparer {
    /// Lookup key used by the keyed collections. Entries keep their
    /// original spelling; only the map key is normalized.
    #[inline]
    pub fn normalize<'a>(self, s: &'a str) -> Cow<'a, str> {
        match self {
            StringComparer::Ordinal => Cow::Borrowed(s),
            StringComparer::OrdinalIgnoreCase => Cow::Owned(s.to_lowercase()),
        }
    }

    #[inline]
    pub fn eq(self, a: &str, b: &str) -> bool {
        self.normalize(a) == self.normalize(b)
    }
}

/// Engine tuning options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Cap applied to any user-requested TTL. Counters are exempt so
    /// multi-day timeline statistics survive. `None` disables capping;
    /// a zero cap forces immediate deletion.
    pub max_expiration_time: Option<Duration>,
    pub string_comparer: StringComparer,
    /// Bound on retained state records per job.
    pub max_state_history_length: usize,
    /// How long a submitter waits on the dispatcher before giving up.
    pub command_timeout: Duration,
    /// Period of the expired-entry sweep.
    pub eviction_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_expiration_time: Some(Duration::from_secs(3 * 60 * 60)),
            string_comparer: StringComparer::Ordinal,
            max_state_history_length: 10,
            command_timeout: Duration::from_secs(30),
            eviction_interval: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_is_byte_exact() {
        let c = StringComparer::Ordinal;
        assert!(c.eq("Key", "Key"));
        assert!(!c.eq("Key", "key"));
        assert_eq!(c.normalize("MiXeD"), "MiXeD");
    }

    #[test]
    fn ignore_case_folds() {
        let c = StringComparer::OrdinalIgnoreCase;
        assert!(c.eq("Key", "kEY"));
        assert_eq!(c.normalize("MiXeD"), "mixed");
    }
}

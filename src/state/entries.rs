//! Entity model: jobs, hashes, lists, sorted sets, counters, servers.
//!
//! Entries are exclusively owned by the memory state; every secondary
//! index holds lookup keys, never object references.

use std::collections::VecDeque;
use std::sync::Arc;

use compact_str::CompactString;
use serde_json::Value;

use crate::clock::MonoTime;
use crate::config::StringComparer;
use crate::key::JobId;

use super::keymap::KeyedMap;
use super::sorted_set::SortedSet;

/// A recorded state transition.
#[derive(Debug, Clone)]
pub struct StateRecord {
    pub name: CompactString,
    pub reason: Option<String>,
    pub created_at: MonoTime,
    pub data: Vec<(String, String)>,
}

impl StateRecord {
    pub fn data_value(&self, comparer: StringComparer, name: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|(k, _)| comparer.eq(k, name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct JobEntry {
    pub id: JobId,
    /// Opaque invocation payload, cheap to clone across DTOs.
    pub payload: Arc<Value>,
    pub created_at: MonoTime,
    pub expire_at: Option<MonoTime>,
    pub current_state: Option<Arc<StateRecord>>,
    /// Front is the most recent transition; when a current state exists
    /// it is the front element.
    pub history: VecDeque<Arc<StateRecord>>,
    pub parameters: KeyedMap<String>,
}

impl JobEntry {
    pub fn state_name(&self) -> Option<&str> {
        self.current_state.as_deref().map(|s| s.name.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HashEntry {
    pub expire_at: Option<MonoTime>,
    pub fields: KeyedMap<String>,
}

impl HashEntry {
    pub fn new(comparer: StringComparer) -> Self {
        Self {
            expire_at: None,
            fields: KeyedMap::new(comparer),
        }
    }
}

/// Ordered string list with head-prepend semantics: index 0 is the most
/// recently inserted element.
#[derive(Debug, Clone, Default)]
pub struct ListEntry {
    pub expire_at: Option<MonoTime>,
    items: VecDeque<String>,
}

impl ListEntry {
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn prepend(&mut self, value: String) {
        self.items.push_front(value);
    }

    /// Remove every element comparing equal to `value`.
    pub fn remove_value(&mut self, comparer: StringComparer, value: &str) {
        self.items.retain(|v| !comparer.eq(v, value));
    }

    /// Keep only the inclusive index range `keep_from..=keep_to`.
    pub fn trim(&mut self, keep_from: usize, keep_to: usize) {
        if keep_to < keep_from || keep_from >= self.items.len() {
            self.items.clear();
            return;
        }
        let end = keep_to.min(self.items.len() - 1);
        self.items = self
            .items
            .iter()
            .skip(keep_from)
            .take(end - keep_from + 1)
            .cloned()
            .collect();
    }

    pub fn range(&self, from: usize, to: usize) -> Vec<String> {
        if to < from {
            return Vec::new();
        }
        self.items
            .iter()
            .skip(from)
            .take(to - from + 1)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct SetEntry {
    pub expire_at: Option<MonoTime>,
    pub members: SortedSet,
}

impl SetEntry {
    pub fn new(comparer: StringComparer) -> Self {
        Self {
            expire_at: None,
            members: SortedSet::new(comparer),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CounterEntry {
    pub expire_at: Option<MonoTime>,
    pub value: i64,
}

#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub worker_count: usize,
    pub queues: Vec<String>,
    pub started_at: MonoTime,
    pub heartbeat_at: MonoTime,
}

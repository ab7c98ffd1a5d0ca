//! Memory state: the sole owner and mutator of every entity.
//!
//! Aggregates the primary collections, the per-state job index, and one
//! expiration index per expirable kind behind a single mutable owner.
//! Only the dispatcher task touches this type; no locking happens here.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;
use gxhash::GxHasher;
use serde_json::Value;
use tracing::error;

use crate::clock::MonoTime;
use crate::config::EngineOptions;
use crate::key::JobId;

pub mod entries;
pub mod index;
pub mod keymap;
pub mod sorted_set;

pub use entries::{
    CounterEntry, HashEntry, JobEntry, ListEntry, ServerEntry, SetEntry, StateRecord,
};
pub use index::{expire_slot, ExpirationIndex, ExpireOutcome};
pub use keymap::KeyedMap;
pub use sorted_set::{Score, SortedSet};

pub type GxHashMap<K, V> = HashMap<K, V, BuildHasherDefault<GxHasher>>;
pub type GxHashSet<T> = HashSet<T, BuildHasherDefault<GxHasher>>;

/// Collection sizes for diagnostics and invariant checks.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MemoryStats {
    pub jobs: usize,
    pub hashes: usize,
    pub lists: usize,
    pub sets: usize,
    pub counters: usize,
    pub servers: usize,
    pub queues: usize,
    pub state_buckets: usize,
    pub expiring_jobs: usize,
    pub expiring_hashes: usize,
    pub expiring_lists: usize,
    pub expiring_sets: usize,
    pub expiring_counters: usize,
}

pub struct MemoryState {
    options: Arc<EngineOptions>,
    pub(crate) jobs: GxHashMap<JobId, JobEntry>,
    pub(crate) hashes: KeyedMap<HashEntry>,
    pub(crate) lists: KeyedMap<ListEntry>,
    pub(crate) sets: KeyedMap<SetEntry>,
    pub(crate) counters: KeyedMap<CounterEntry>,
    pub(crate) servers: GxHashMap<String, ServerEntry>,
    pub(crate) queues: KeyedMap<VecDeque<JobId>>,
    /// Jobs bucketed by lowercased state name, ordered by
    /// `(state.created_at, id)`. Framework-internal, so always
    /// case-insensitive.
    state_index: GxHashMap<CompactString, BTreeSet<(MonoTime, JobId)>>,
    expiring_jobs: ExpirationIndex<JobId>,
    expiring_hashes: ExpirationIndex<String>,
    expiring_lists: ExpirationIndex<String>,
    expiring_sets: ExpirationIndex<String>,
    expiring_counters: ExpirationIndex<String>,
}

#[inline]
fn state_key(name: &str) -> CompactString {
    CompactString::from(name.to_lowercase())
}

impl MemoryState {
    pub fn new(options: Arc<EngineOptions>) -> Self {
        let comparer = options.string_comparer;
        Self {
            options,
            jobs: GxHashMap::default(),
            hashes: KeyedMap::new(comparer),
            lists: KeyedMap::new(comparer),
            sets: KeyedMap::new(comparer),
            counters: KeyedMap::new(comparer),
            servers: GxHashMap::default(),
            queues: KeyedMap::new(comparer),
            state_index: GxHashMap::default(),
            expiring_jobs: ExpirationIndex::new(),
            expiring_hashes: ExpirationIndex::new(),
            expiring_lists: ExpirationIndex::new(),
            expiring_sets: ExpirationIndex::new(),
            expiring_counters: ExpirationIndex::new(),
        }
    }

    #[inline]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    #[inline]
    fn cap(&self) -> Option<Duration> {
        self.options.max_expiration_time
    }

    // ===== Jobs =====

    pub fn job(&self, id: JobId) -> Option<&JobEntry> {
        self.jobs.get(&id)
    }

    pub fn job_create(
        &mut self,
        id: JobId,
        payload: Arc<Value>,
        parameters: Vec<(String, String)>,
        now: MonoTime,
        expire_in: Option<Duration>,
    ) {
        let mut params = KeyedMap::new(self.options.string_comparer);
        for (name, value) in parameters {
            params.insert(&name, value);
        }
        self.jobs.insert(
            id,
            JobEntry {
                id,
                payload,
                created_at: now,
                expire_at: None,
                current_state: None,
                history: VecDeque::new(),
                parameters: params,
            },
        );
        self.job_expire(id, now, expire_in);
    }

    pub fn job_set_parameter(&mut self, id: JobId, name: &str, value: String) {
        if let Some(job) = self.jobs.get_mut(&id) {
            job.parameters.insert(name, value);
        }
    }

    /// Apply a state record. `make_current` moves the job between state
    /// buckets and puts the record at the head of its history; otherwise
    /// the record is appended to the history only.
    pub fn job_apply_state(&mut self, id: JobId, record: StateRecord, make_current: bool) {
        let max_history = self.options.max_state_history_length;
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        let record = Arc::new(record);
        if make_current {
            if let Some(old) = job.current_state.take() {
                let key = state_key(&old.name);
                if let Some(bucket) = self.state_index.get_mut(&key) {
                    bucket.remove(&(old.created_at, id));
                    if bucket.is_empty() {
                        self.state_index.remove(&key);
                    }
                }
            }
            job.history.push_front(record.clone());
            self.state_index
                .entry(state_key(&record.name))
                .or_default()
                .insert((record.created_at, id));
            job.current_state = Some(record);
        } else {
            job.history.push_back(record);
        }
        while job.history.len() > max_history.max(1) {
            job.history.pop_back();
        }
    }

    pub fn job_expire(&mut self, id: JobId, now: MonoTime, expire_in: Option<Duration>) {
        let cap = self.cap();
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        let outcome = expire_slot(
            &mut self.expiring_jobs,
            &id,
            &mut job.expire_at,
            now,
            expire_in,
            cap,
            false,
        );
        if outcome == ExpireOutcome::DeleteNow {
            self.job_delete(id);
        }
    }

    pub fn job_delete(&mut self, id: JobId) {
        let Some(job) = self.jobs.remove(&id) else {
            return;
        };
        if let Some(at) = job.expire_at {
            self.expiring_jobs.remove(at, &id);
        }
        if let Some(current) = &job.current_state {
            let key = state_key(&current.name);
            if let Some(bucket) = self.state_index.get_mut(&key) {
                bucket.remove(&(current.created_at, id));
                if bucket.is_empty() {
                    self.state_index.remove(&key);
                }
            }
        }
    }

    // ===== State index =====

    pub fn state_count(&self, name: &str) -> usize {
        self.state_index
            .get(&state_key(name))
            .map_or(0, BTreeSet::len)
    }

    /// Jobs in the bucket, ordered by `(state.created_at, id)`.
    pub fn state_bucket(&self, name: &str) -> impl Iterator<Item = JobId> + '_ {
        self.state_index
            .get(&state_key(name))
            .into_iter()
            .flat_map(|bucket| bucket.iter().map(|(_, id)| *id))
    }

    // ===== Queues =====

    pub fn enqueue(&mut self, queue: &str, id: JobId) {
        self.queues
            .get_or_insert_with(queue, VecDeque::new)
            .push_back(id);
    }

    pub fn dequeue(&mut self, queue: &str) -> Option<JobId> {
        self.queues.get_mut(queue).and_then(VecDeque::pop_front)
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.queues.get(queue).map_or(0, VecDeque::len)
    }

    // ===== Hashes =====

    pub fn hash(&self, key: &str) -> Option<&HashEntry> {
        self.hashes.get(key)
    }

    pub fn hash_update(&mut self, key: &str, fields: Vec<(String, String)>) {
        let comparer = self.options.string_comparer;
        let entry = self
            .hashes
            .get_or_insert_with(key, || HashEntry::new(comparer));
        for (name, value) in fields {
            entry.fields.insert(&name, value);
        }
    }

    pub fn hash_expire(&mut self, key: &str, now: MonoTime, expire_in: Option<Duration>) {
        let cap = self.cap();
        let norm = self.hashes.norm(key);
        let Some(entry) = self.hashes.get_mut_norm(&norm) else {
            return;
        };
        let outcome = expire_slot(
            &mut self.expiring_hashes,
            &norm,
            &mut entry.expire_at,
            now,
            expire_in,
            cap,
            false,
        );
        if outcome == ExpireOutcome::DeleteNow {
            self.hash_delete_norm(&norm);
        }
    }

    pub fn hash_delete(&mut self, key: &str) {
        let norm = self.hashes.norm(key);
        self.hash_delete_norm(&norm);
    }

    fn hash_delete_norm(&mut self, norm: &str) {
        if let Some(entry) = self.hashes.remove_norm(norm) {
            if let Some(at) = entry.expire_at {
                self.expiring_hashes.remove(at, &norm.to_string());
            }
        }
    }

    // ===== Lists =====

    pub fn list(&self, key: &str) -> Option<&ListEntry> {
        self.lists.get(key)
    }

    pub fn list_prepend(&mut self, key: &str, value: String) {
        self.lists
            .get_or_insert_with(key, ListEntry::default)
            .prepend(value);
    }

    pub fn list_remove_value(&mut self, key: &str, value: &str) {
        let comparer = self.options.string_comparer;
        let norm = self.lists.norm(key);
        let Some(entry) = self.lists.get_mut_norm(&norm) else {
            return;
        };
        entry.remove_value(comparer, value);
        if entry.is_empty() {
            self.list_delete_norm(&norm);
        }
    }

    pub fn list_trim(&mut self, key: &str, keep_from: usize, keep_to: usize) {
        let norm = self.lists.norm(key);
        let Some(entry) = self.lists.get_mut_norm(&norm) else {
            return;
        };
        entry.trim(keep_from, keep_to);
        if entry.is_empty() {
            self.list_delete_norm(&norm);
        }
    }

    pub fn list_expire(&mut self, key: &str, now: MonoTime, expire_in: Option<Duration>) {
        let cap = self.cap();
        let norm = self.lists.norm(key);
        let Some(entry) = self.lists.get_mut_norm(&norm) else {
            return;
        };
        let outcome = expire_slot(
            &mut self.expiring_lists,
            &norm,
            &mut entry.expire_at,
            now,
            expire_in,
            cap,
            false,
        );
        if outcome == ExpireOutcome::DeleteNow {
            self.list_delete_norm(&norm);
        }
    }

    fn list_delete_norm(&mut self, norm: &str) {
        if let Some(entry) = self.lists.remove_norm(norm) {
            if let Some(at) = entry.expire_at {
                self.expiring_lists.remove(at, &norm.to_string());
            }
        }
    }

    // ===== Sorted sets =====

    pub fn set(&self, key: &str) -> Option<&SetEntry> {
        self.sets.get(key)
    }

    pub fn set_add(&mut self, key: &str, value: &str, score: f64) {
        let comparer = self.options.string_comparer;
        let entry = self.sets.get_or_insert_with(key, || SetEntry::new(comparer));
        entry.members.add(value, score);
    }

    pub fn set_remove_value(&mut self, key: &str, value: &str) {
        let norm = self.sets.norm(key);
        let Some(entry) = self.sets.get_mut_norm(&norm) else {
            return;
        };
        entry.members.remove(value);
        if entry.members.is_empty() {
            self.set_delete_norm(&norm);
        }
    }

    pub fn set_expire(&mut self, key: &str, now: MonoTime, expire_in: Option<Duration>) {
        let cap = self.cap();
        let norm = self.sets.norm(key);
        let Some(entry) = self.sets.get_mut_norm(&norm) else {
            return;
        };
        let outcome = expire_slot(
            &mut self.expiring_sets,
            &norm,
            &mut entry.expire_at,
            now,
            expire_in,
            cap,
            false,
        );
        if outcome == ExpireOutcome::DeleteNow {
            self.set_delete_norm(&norm);
        }
    }

    pub fn set_delete(&mut self, key: &str) {
        let norm = self.sets.norm(key);
        self.set_delete_norm(&norm);
    }

    fn set_delete_norm(&mut self, norm: &str) {
        if let Some(entry) = self.sets.remove_norm(norm) {
            if let Some(at) = entry.expire_at {
                self.expiring_sets.remove(at, &norm.to_string());
            }
        }
    }

    // ===== Counters =====

    pub fn counter(&self, key: &str) -> i64 {
        self.counters.get(key).map_or(0, |c| c.value)
    }

    /// Counters vanish at zero and bypass the expiration cap: timeline
    /// statistics require multi-day retention.
    pub fn counter_add(
        &mut self,
        key: &str,
        delta: i64,
        now: MonoTime,
        expire_in: Option<Duration>,
    ) {
        let norm = self.counters.norm(key);
        let value = {
            let entry = self.counters.get_or_insert_with(key, CounterEntry::default);
            entry.value += delta;
            entry.value
        };
        if value == 0 {
            self.counter_delete_norm(&norm);
        } else if expire_in.is_some() {
            self.counter_expire(key, now, expire_in);
        }
    }

    pub fn counter_expire(&mut self, key: &str, now: MonoTime, expire_in: Option<Duration>) {
        let norm = self.counters.norm(key);
        let Some(entry) = self.counters.get_mut_norm(&norm) else {
            return;
        };
        let outcome = expire_slot(
            &mut self.expiring_counters,
            &norm,
            &mut entry.expire_at,
            now,
            expire_in,
            None,
            true,
        );
        if outcome == ExpireOutcome::DeleteNow {
            self.counter_delete_norm(&norm);
        }
    }

    fn counter_delete_norm(&mut self, norm: &str) {
        if let Some(entry) = self.counters.remove_norm(norm) {
            if let Some(at) = entry.expire_at {
                self.expiring_counters.remove(at, &norm.to_string());
            }
        }
    }

    // ===== Servers =====

    pub fn server_announce(
        &mut self,
        server_id: String,
        worker_count: usize,
        queues: Vec<String>,
        now: MonoTime,
    ) {
        self.servers.insert(
            server_id,
            ServerEntry {
                worker_count,
                queues,
                started_at: now,
                heartbeat_at: now,
            },
        );
    }

    pub fn server_heartbeat(&mut self, server_id: &str, now: MonoTime) {
        if let Some(server) = self.servers.get_mut(server_id) {
            server.heartbeat_at = now;
        }
    }

    pub fn server_remove(&mut self, server_id: &str) {
        self.servers.remove(server_id);
    }

    pub fn servers_remove_timed_out(&mut self, now: MonoTime, older_than: Duration) -> usize {
        let before = self.servers.len();
        self.servers
            .retain(|_, s| now.saturating_since(s.heartbeat_at) <= older_than);
        before - self.servers.len()
    }

    // ===== Eviction =====

    /// Delete every entry whose `expire_at` is due. Each minimum is
    /// popped from its index, then the entry goes through the normal
    /// delete path so the remaining indexes stay consistent.
    pub fn evict_expired(&mut self, now: MonoTime) -> usize {
        let mut evicted = 0;
        while let Some((_, id)) = self.expiring_jobs.pop_due(now) {
            if !self.jobs.contains_key(&id) {
                error!(job = %id, "jobs expiration index out of sync");
                continue;
            }
            self.job_delete(id);
            evicted += 1;
        }
        while let Some((_, norm)) = self.expiring_hashes.pop_due(now) {
            self.hash_delete_norm(&norm);
            evicted += 1;
        }
        while let Some((_, norm)) = self.expiring_lists.pop_due(now) {
            self.list_delete_norm(&norm);
            evicted += 1;
        }
        while let Some((_, norm)) = self.expiring_sets.pop_due(now) {
            self.set_delete_norm(&norm);
            evicted += 1;
        }
        while let Some((_, norm)) = self.expiring_counters.pop_due(now) {
            self.counter_delete_norm(&norm);
            evicted += 1;
        }
        evicted
    }

    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            jobs: self.jobs.len(),
            hashes: self.hashes.len(),
            lists: self.lists.len(),
            sets: self.sets.len(),
            counters: self.counters.len(),
            servers: self.servers.len(),
            queues: self.queues.len(),
            state_buckets: self.state_index.len(),
            expiring_jobs: self.expiring_jobs.len(),
            expiring_hashes: self.expiring_hashes.len(),
            expiring_lists: self.expiring_lists.len(),
            expiring_sets: self.expiring_sets.len(),
            expiring_counters: self.expiring_counters.len(),
        }
    }
}

//! String-keyed map honoring the configured comparer.
//!
//! Lookup keys are normalized through the comparer; each slot keeps the
//! original spelling for read-back, so display casing is
//! first-writer-wins under the case-insensitive comparer.

use crate::config::StringComparer;

use super::GxHashMap;

#[derive(Debug, Clone)]
struct Slot<V> {
    key: String,
    value: V,
}

#[derive(Debug, Clone)]
pub struct KeyedMap<V> {
    comparer: StringComparer,
    inner: GxHashMap<String, Slot<V>>,
}

impl<V> KeyedMap<V> {
    pub fn new(comparer: StringComparer) -> Self {
        Self {
            comparer,
            inner: GxHashMap::default(),
        }
    }

    #[inline]
    pub fn norm(&self, key: &str) -> String {
        self.comparer.normalize(key).into_owned()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.inner
            .get(self.comparer.normalize(key).as_ref())
            .map(|s| &s.value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.inner
            .get_mut(self.comparer.normalize(key).as_ref())
            .map(|s| &mut s.value)
    }

    pub fn get_norm(&self, norm: &str) -> Option<&V> {
        self.inner.get(norm).map(|s| &s.value)
    }

    pub fn get_mut_norm(&mut self, norm: &str) -> Option<&mut V> {
        self.inner.get_mut(norm).map(|s| &mut s.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .contains_key(self.comparer.normalize(key).as_ref())
    }

    /// Insert or update. An existing slot keeps its original spelling.
    pub fn insert(&mut self, key: &str, value: V) -> Option<V> {
        let norm = self.norm(key);
        match self.inner.get_mut(&norm) {
            Some(slot) => Some(std::mem::replace(&mut slot.value, value)),
            None => {
                self.inner.insert(
                    norm,
                    Slot {
                        key: key.to_string(),
                        value,
                    },
                );
                None
            }
        }
    }

    pub fn get_or_insert_with(&mut self, key: &str, default: impl FnOnce() -> V) -> &mut V {
        let norm = self.norm(key);
        &mut self
            .inner
            .entry(norm)
            .or_insert_with(|| Slot {
                key: key.to_string(),
                value: default(),
            })
            .value
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let norm = self.norm(key);
        self.inner.remove(&norm).map(|s| s.value)
    }

    pub fn remove_norm(&mut self, norm: &str) -> Option<V> {
        self.inner.remove(norm).map(|s| s.value)
    }

    /// Entries with their original key spelling.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.inner.values().map(|s| (s.key.as_str(), &s.value))
    }
}

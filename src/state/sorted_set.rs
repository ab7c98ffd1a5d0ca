//! Dual-indexed sorted set.
//!
//! Keeps a value-to-score hash for O(1) membership and a `(score, value)`
//! ordered tree for range queries. Every insertion that replaces an
//! existing value removes the old tree node before inserting the new one,
//! so both structures stay in lockstep.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::config::StringComparer;

use super::GxHashMap;

/// Sorted-set score. `f64` ordered by `total_cmp` so it can key the tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(f64);

impl Score {
    #[inline]
    pub fn new(v: f64) -> Self {
        Score(v)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone)]
struct Member {
    /// Original spelling, returned by queries.
    value: String,
    score: Score,
}

#[derive(Debug, Clone)]
pub struct SortedSet {
    comparer: StringComparer,
    members: GxHashMap<String, Member>,
    by_score: BTreeSet<(Score, String)>,
}

impl SortedSet {
    pub fn new(comparer: StringComparer) -> Self {
        Self {
            comparer,
            members: GxHashMap::default(),
            by_score: BTreeSet::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[inline]
    pub fn tree_len(&self) -> usize {
        self.by_score.len()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.members
            .contains_key(self.comparer.normalize(value).as_ref())
    }

    pub fn score_of(&self, value: &str) -> Option<f64> {
        self.members
            .get(self.comparer.normalize(value).as_ref())
            .map(|m| m.score.get())
    }

    /// Insert or update a member. The second write for an equal value
    /// replaces the score; the set never holds two members comparing
    /// equal under the configured comparer.
    pub fn add(&mut self, value: &str, score: f64) {
        let norm = self.comparer.normalize(value).into_owned();
        let score = Score::new(score);
        if let Some(existing) = self.members.get_mut(&norm) {
            self.by_score.remove(&(existing.score, norm.clone()));
            existing.score = score;
        } else {
            self.members.insert(
                norm.clone(),
                Member {
                    value: value.to_string(),
                    score,
                },
            );
        }
        self.by_score.insert((score, norm));
    }

    pub fn remove(&mut self, value: &str) -> bool {
        let norm = self.comparer.normalize(value).into_owned();
        match self.members.remove(&norm) {
            Some(member) => {
                self.by_score.remove(&(member.score, norm));
                true
            }
            None => false,
        }
    }

    /// Members ordered by `(score, value)`, original spellings.
    pub fn iter_ordered(&self) -> impl Iterator<Item = &str> {
        self.by_score
            .iter()
            .filter_map(|(_, norm)| self.members.get(norm).map(|m| m.value.as_str()))
    }

    /// Inclusive rank range over the `(score, value)` order.
    pub fn range_by_rank(&self, from: usize, to: usize) -> Vec<String> {
        if to < from {
            return Vec::new();
        }
        self.iter_ordered()
            .skip(from)
            .take(to - from + 1)
            .map(str::to_string)
            .collect()
    }

    /// Lowest-scored member with `from <= score <= to`.
    pub fn first_by_score(&self, from: f64, to: f64) -> Option<String> {
        let low = (Score::new(from), String::new());
        self.by_score
            .range(low..)
            .take_while(|(score, _)| score.get() <= to)
            .next()
            .and_then(|(_, norm)| self.members.get(norm).map(|m| m.value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> SortedSet {
        SortedSet::new(StringComparer::Ordinal)
    }

    #[test]
    fn add_replaces_existing_value() {
        let mut s = set();
        s.add("v", 1.0);
        s.add("v", 2.0);
        assert_eq!(s.len(), 1);
        assert_eq!(s.tree_len(), 1);
        assert_eq!(s.score_of("v"), Some(2.0));
    }

    #[test]
    fn ordered_by_score_then_value() {
        let mut s = set();
        s.add("b", 2.0);
        s.add("a", 2.0);
        s.add("c", 1.0);
        let items: Vec<_> = s.iter_ordered().collect();
        assert_eq!(items, ["c", "a", "b"]);
    }

    #[test]
    fn first_by_score_picks_lowest_in_range() {
        let mut s = set();
        s.add("early", 10.0);
        s.add("late", 30.0);
        assert_eq!(s.first_by_score(5.0, 20.0), Some("early".into()));
        assert_eq!(s.first_by_score(11.0, 20.0), None);
        assert_eq!(s.first_by_score(10.0, 10.0), Some("early".into()));
    }

    #[test]
    fn case_insensitive_values_collapse() {
        let mut s = SortedSet::new(StringComparer::OrdinalIgnoreCase);
        s.add("Value", 1.0);
        s.add("VALUE", 5.0);
        assert_eq!(s.len(), 1);
        assert_eq!(s.score_of("value"), Some(5.0));
    }

    #[test]
    fn rank_range_is_inclusive() {
        let mut s = set();
        for (v, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            s.add(v, score);
        }
        assert_eq!(s.range_by_rank(1, 2), vec!["b".to_string(), "c".to_string()]);
        assert_eq!(s.range_by_rank(3, 10), vec!["d".to_string()]);
        assert!(s.range_by_rank(2, 1).is_empty());
    }
}

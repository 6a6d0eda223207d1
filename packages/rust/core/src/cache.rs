//! Exact-match answer memoization.

use std::collections::HashMap;

use chatbox_shared::{Answer, Query};

/// Hit/miss counters for an [`AnswerCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// In-memory `Query -> Answer` map for the lifetime of one session.
///
/// Unbounded, no eviction, no TTL. Keys compare byte-for-byte.
#[derive(Debug, Default)]
pub struct AnswerCache {
    entries: HashMap<Query, Answer>,
    stats: CacheStats,
}

impl AnswerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `query`, counting the hit or miss.
    pub fn lookup(&mut self, query: &Query) -> Option<Answer> {
        match self.entries.get(query) {
            Some(answer) => {
                self.stats.hits += 1;
                Some(answer.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Store `answer`, replacing any previous answer for `query`.
    pub fn insert(&mut self, query: Query, answer: Answer) {
        self.entries.insert(query, answer);
    }

    pub fn contains(&self, query: &Query) -> bool {
        self.entries.contains_key(query)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

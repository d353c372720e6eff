use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Sliding time window of failure timestamps
///
/// Entries are kept in non-decreasing order. Pruning is lazy: callers prune
/// against their own `now` before reading the count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureWindow {
    entries: VecDeque<DateTime<Utc>>,
}

impl FailureWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a window from arbitrary timestamps, sorting them
    pub fn from_timestamps<I>(timestamps: I) -> Self
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let mut entries: Vec<_> = timestamps.into_iter().collect();
        entries.sort_unstable();
        Self {
            entries: entries.into(),
        }
    }

    /// Record a failure at `at`
    ///
    /// A timestamp older than the newest entry is clamped to it so the
    /// sequence never goes backwards when the clock steps back.
    pub fn record(&mut self, at: DateTime<Utc>) {
        let at = match self.entries.back() {
            Some(&newest) if at < newest => newest,
            _ => at,
        };
        self.entries.push_back(at);
    }

    /// Drop entries strictly older than `now - window`
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self, now: DateTime<Utc>, window: chrono::Duration) -> usize {
        let Some(cutoff) = now.checked_sub_signed(window) else {
            return 0;
        };
        let before = self.entries.len();
        while matches!(self.entries.front(), Some(&oldest) if oldest < cutoff) {
            self.entries.pop_front();
        }
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.entries.front().copied()
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.entries.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DateTime<Utc>> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<DateTime<Utc>> {
        self.entries.iter().copied().collect()
    }
}

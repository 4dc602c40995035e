//! Time-bounded state owned by windowed rules.
//!
//! All structures share one expiry test: an entry stamped `ts` is expired
//! at `now` iff `now - ts > timeframe`. Garbage collection removes every
//! expired entry and nothing else.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

pub fn is_expired(ts: DateTime<Utc>, now: DateTime<Utc>, timeframe: Duration) -> bool {
    now - ts > timeframe
}

/// Observations ordered by timestamp.
#[derive(Debug, Clone)]
pub struct EventWindow<T> {
    timeframe: Duration,
    entries: VecDeque<(DateTime<Utc>, T)>,
}

impl<T> EventWindow<T> {
    pub fn new(timeframe: Duration) -> Self {
        Self { timeframe, entries: VecDeque::new() }
    }

    /// Insert keeping timestamp order; equal timestamps keep arrival order.
    pub fn append(&mut self, ts: DateTime<Utc>, item: T) {
        let pos = self.entries.partition_point(|(t, _)| *t <= ts);
        self.entries.insert(pos, (ts, item));
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DateTime<Utc>, T)> {
        self.entries.iter()
    }

    /// Drop expired entries; returns how many were removed.
    pub fn garbage_collect(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        while let Some((ts, _)) = self.entries.front() {
            if !is_expired(*ts, now, self.timeframe) {
                break;
            }
            self.entries.pop_front();
        }
        before - self.entries.len()
    }
}

/// One [`EventWindow`] per grouping key, created lazily.
#[derive(Debug, Clone)]
pub struct KeyedWindows<T> {
    timeframe: Duration,
    windows: HashMap<String, EventWindow<T>>,
}

impl<T> KeyedWindows<T> {
    pub fn new(timeframe: Duration) -> Self {
        Self { timeframe, windows: HashMap::new() }
    }

    pub fn entry(&mut self, key: &str) -> &mut EventWindow<T> {
        let timeframe = self.timeframe;
        self.windows
            .entry(key.to_string())
            .or_insert_with(|| EventWindow::new(timeframe))
    }

    pub fn get(&self, key: &str) -> Option<&EventWindow<T>> {
        self.windows.get(key)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Collect every window and forget keys whose window became empty.
    pub fn garbage_collect(&mut self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.windows.retain(|_, w| {
            removed += w.garbage_collect(now);
            !w.is_empty()
        });
        removed
    }
}

/// First-seen timestamp per key.
#[derive(Debug, Clone)]
pub struct FirstSeen {
    timeframe: Duration,
    first: HashMap<String, DateTime<Utc>>,
}

impl FirstSeen {
    pub fn new(timeframe: Duration) -> Self {
        Self { timeframe, first: HashMap::new() }
    }

    /// Record `key` at `ts` unless already known. Returns true for a new key.
    pub fn observe(&mut self, key: &str, ts: DateTime<Utc>) -> bool {
        if self.first.contains_key(key) {
            return false;
        }
        self.first.insert(key.to_string(), ts);
        true
    }

    pub fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        self.first.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }

    /// Evict keys first seen more than `timeframe` ago; returns the evicted keys.
    pub fn garbage_collect(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let timeframe = self.timeframe;
        let expired: Vec<String> = self
            .first
            .iter()
            .filter(|(_, ts)| is_expired(**ts, now, timeframe))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            self.first.remove(k);
        }
        expired
    }
}

/// Document ids already processed, so overlapping polls count each hit once.
#[derive(Debug, Clone)]
pub struct SeenIds {
    retention: Duration,
    ids: HashMap<String, DateTime<Utc>>,
}

impl SeenIds {
    pub fn new(retention: Duration) -> Self {
        Self { retention, ids: HashMap::new() }
    }

    /// Returns true if `id` was not seen before.
    pub fn insert(&mut self, id: &str, ts: DateTime<Utc>) -> bool {
        self.ids.insert(id.to_string(), ts).is_none()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn garbage_collect(&mut self, now: DateTime<Utc>) {
        let retention = self.retention;
        self.ids.retain(|_, ts| !is_expired(*ts, now, retention));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn expiry_boundary() {
        let tf = Duration::minutes(10);
        assert!(!is_expired(t0(), t0() + tf, tf));
        assert!(is_expired(t0(), t0() + tf + Duration::seconds(1), tf));
    }

    #[test]
    fn event_window_keeps_order_and_collects() {
        let mut w = EventWindow::new(Duration::minutes(5));
        w.append(t0() + Duration::minutes(3), "c");
        w.append(t0(), "a");
        w.append(t0() + Duration::minutes(1), "b");
        let order: Vec<_> = w.iter().map(|(_, v)| *v).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        let removed = w.garbage_collect(t0() + Duration::minutes(6) + Duration::seconds(30));
        assert_eq!(removed, 2);
        assert_eq!(w.count(), 1);

        w.clear();
        assert!(w.is_empty());
    }

    #[test]
    fn keyed_windows_drop_empty_keys() {
        let mut kw = KeyedWindows::new(Duration::minutes(1));
        kw.entry("a").append(t0(), ());
        kw.entry("b").append(t0() + Duration::minutes(2), ());
        assert_eq!(kw.len(), 2);

        kw.garbage_collect(t0() + Duration::minutes(2));
        assert_eq!(kw.len(), 1);
        assert!(kw.get("a").is_none());
        assert_eq!(kw.get("b").map(EventWindow::count), Some(1));
    }

    #[test]
    fn first_seen_evicts_only_expired_keys() {
        let tf = Duration::hours(1);
        let now = t0() + Duration::hours(5);
        let mut fs = FirstSeen::new(tf);
        assert!(fs.observe("old", now - tf - Duration::seconds(1)));
        assert!(fs.observe("fresh", now - tf + Duration::seconds(1)));
        assert!(!fs.observe("fresh", now));

        let evicted = fs.garbage_collect(now);
        assert_eq!(evicted, vec!["old".to_string()]);
        assert!(fs.get("fresh").is_some());
        assert_eq!(fs.len(), 1);
    }

    #[test]
    fn seen_ids_age_out() {
        let mut ids = SeenIds::new(Duration::minutes(10));
        assert!(ids.insert("doc-1", t0()));
        assert!(!ids.insert("doc-1", t0()));
        ids.garbage_collect(t0() + Duration::minutes(11));
        assert!(ids.is_empty());
        assert!(ids.insert("doc-1", t0() + Duration::minutes(11)));
    }
}

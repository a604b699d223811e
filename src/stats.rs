//! Fixed-window traffic statistics
//!
//! Maintains requests-per-second and distinct-source counts over a
//! trailing window using one bucket per second. Rolling the window
//! forward only touches the buckets that fell out of it, so recording
//! stays O(1) amortized regardless of traffic volume.

use chrono::{TimeZone, Utc};
use std::collections::HashMap;

use crate::models::Snapshot;

/// Default trailing window length in seconds
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Sliding-window request counter with exact unique-source tracking.
///
/// Sources are tracked by last-seen second and evicted lazily during the
/// roll-forward both `record` and `snapshot` perform, so a snapshot never
/// reports a source whose most recent event left the window.
#[derive(Debug)]
pub struct WindowedCounter {
    window_secs: u64,
    /// Per-second counts, indexed by epoch second modulo window length
    buckets: Vec<u64>,
    /// Epoch second the window was last rolled to; None until first use
    last_sec: Option<i64>,
    total_in_window: u64,
    /// Source id -> epoch second of its most recent event
    sources: HashMap<String, i64>,
}

impl WindowedCounter {
    pub fn new(window_secs: u64) -> Self {
        let window_secs = window_secs.max(1);
        Self {
            window_secs,
            buckets: vec![0; window_secs as usize],
            last_sec: None,
            total_in_window: 0,
            sources: HashMap::new(),
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Record one event for `source` at the current wall-clock second.
    pub fn record(&mut self, source: &str) {
        self.record_at(source, Utc::now().timestamp());
    }

    /// Record one event at an explicit epoch second.
    ///
    /// Timestamps are assumed non-decreasing (events arrive in order); a
    /// timestamp behind the window position counts into the current second.
    pub fn record_at(&mut self, source: &str, now_sec: i64) {
        let now_sec = self.clamp(now_sec);
        self.roll_to(now_sec);

        let idx = self.bucket_index(now_sec);
        self.buckets[idx] += 1;
        self.total_in_window += 1;
        self.sources.insert(source.to_string(), now_sec);
    }

    /// Current window statistics at the wall clock.
    pub fn snapshot(&mut self) -> Snapshot {
        self.snapshot_at(Utc::now().timestamp())
    }

    /// Window statistics at an explicit epoch second. Performs the same
    /// roll-forward as `record_at` and nothing else.
    pub fn snapshot_at(&mut self, now_sec: i64) -> Snapshot {
        let now_sec = self.clamp(now_sec);
        self.roll_to(now_sec);

        Snapshot {
            ts: Utc
                .timestamp_opt(now_sec, 0)
                .single()
                .unwrap_or_else(Utc::now),
            rps: self.total_in_window as f64 / self.window_secs as f64,
            unique_sources: self.sources.len(),
            total_in_window: self.total_in_window,
        }
    }

    fn clamp(&self, now_sec: i64) -> i64 {
        match self.last_sec {
            Some(last) => now_sec.max(last),
            None => now_sec,
        }
    }

    fn bucket_index(&self, sec: i64) -> usize {
        (sec.rem_euclid(self.window_secs as i64)) as usize
    }

    /// Advance the window to `now_sec`, clearing buckets that fell out of
    /// it and dropping sources whose last event is older than the window.
    fn roll_to(&mut self, now_sec: i64) {
        let last = match self.last_sec {
            Some(last) => last,
            None => {
                self.last_sec = Some(now_sec);
                return;
            }
        };

        let elapsed = now_sec - last;
        if elapsed <= 0 {
            return;
        }

        if elapsed >= self.window_secs as i64 {
            // The whole window slid past; nothing carries over.
            self.buckets.fill(0);
            self.total_in_window = 0;
        } else {
            for sec in (last + 1)..=now_sec {
                let idx = self.bucket_index(sec);
                self.total_in_window -= self.buckets[idx];
                self.buckets[idx] = 0;
            }
        }
        self.last_sec = Some(now_sec);

        let cutoff = now_sec - self.window_secs as i64;
        self.sources.retain(|_, last_seen| *last_seen >= cutoff);
    }
}

impl Default for WindowedCounter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000;

    #[test]
    fn test_uniform_events_report_expected_rps() {
        let mut counter = WindowedCounter::new(60);

        // 30 events spaced one second apart, three distinct sources
        for i in 0..30 {
            let source = format!("10.0.0.{}", i % 3);
            counter.record_at(&source, T0 + i);
        }

        let snap = counter.snapshot_at(T0 + 29);
        assert!((snap.rps - 30.0 / 60.0).abs() < 1e-9);
        assert_eq!(snap.unique_sources, 3);
        assert_eq!(snap.total_in_window, 30);
    }

    #[test]
    fn test_source_evicted_after_window() {
        let mut counter = WindowedCounter::new(60);
        counter.record_at("192.168.1.5", T0);

        let snap = counter.snapshot_at(T0 + 61);
        assert_eq!(snap.unique_sources, 0);
        assert_eq!(snap.rps, 0.0);
        assert_eq!(snap.total_in_window, 0);
    }

    #[test]
    fn test_gap_longer_than_window_resets_everything() {
        let mut counter = WindowedCounter::new(10);
        for i in 0..10 {
            counter.record_at("a", T0 + i);
        }
        assert_eq!(counter.snapshot_at(T0 + 9).total_in_window, 10);

        counter.record_at("b", T0 + 200);
        let snap = counter.snapshot_at(T0 + 200);
        assert_eq!(snap.total_in_window, 1);
        assert_eq!(snap.unique_sources, 1);
    }

    #[test]
    fn test_partial_roll_drops_only_expired_buckets() {
        let mut counter = WindowedCounter::new(10);
        counter.record_at("a", T0);
        counter.record_at("a", T0 + 5);

        // T0 leaves the window by T0 + 12; the T0+5 event stays.
        let snap = counter.snapshot_at(T0 + 12);
        assert_eq!(snap.total_in_window, 1);
        assert_eq!(snap.unique_sources, 1);
    }

    #[test]
    fn test_multiple_events_same_second() {
        let mut counter = WindowedCounter::new(60);
        for _ in 0..5 {
            counter.record_at("a", T0);
        }
        counter.record_at("b", T0);

        let snap = counter.snapshot_at(T0);
        assert_eq!(snap.total_in_window, 6);
        assert_eq!(snap.unique_sources, 2);
        assert!((snap.rps - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_is_repeatable() {
        let mut counter = WindowedCounter::new(60);
        counter.record_at("a", T0);

        let first = counter.snapshot_at(T0 + 3);
        let second = counter.snapshot_at(T0 + 3);
        assert_eq!(first.total_in_window, second.total_in_window);
        assert_eq!(first.unique_sources, second.unique_sources);
    }
}

//! Sliding-window restart counter for `restart-count` pod rules.
//!
//! Samples live only in this process; a restart of the controller starts
//! every window from scratch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Sample {
    count: u32,
    observed_at: Instant,
}

#[derive(Debug, Default)]
pub struct RestartTracker {
    tracks: HashMap<String, VecDeque<Sample>>,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `count` for `key` and return how many restarts happened since
    /// the oldest sample still inside `window`. Samples older than the window
    /// are dropped first; an empty track yields 0.
    ///
    /// A count below the newest sample means the pod was recreated, so the
    /// window starts over from the new count.
    pub fn observe(&mut self, key: &str, count: u32, now: Instant, window: Duration) -> u32 {
        let samples = self.tracks.entry(key.to_string()).or_default();
        if samples.back().is_some_and(|s| count < s.count) {
            samples.clear();
        }
        while samples
            .front()
            .is_some_and(|s| now.saturating_duration_since(s.observed_at) > window)
        {
            samples.pop_front();
        }

        let baseline = samples.front().map_or(count, |s| s.count);
        samples.push_back(Sample {
            count,
            observed_at: now,
        });
        count.saturating_sub(baseline)
    }

    /// Drop the tracks of keys not in `live`.
    pub fn retain(&mut self, live: &HashSet<String>) {
        self.tracks.retain(|key, _| live.contains(key));
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

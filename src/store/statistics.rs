//! # Statistics Recorder
//!
//! Per-entity counters and rates derived from a monotonic and a wall clock.
//! Timestamps are passed in by the caller so updates stay deterministic
//! under test.

use std::sync::OnceLock;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

/// Process-wide origin of the monotonic clock
static EPOCH: OnceLock<Instant> = OnceLock::new();

/// A pair of clock readings taken at the same instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp {
    /// Seconds since the process started, never goes backwards
    pub monotonic: f64,
    /// Seconds since the Unix epoch
    pub wall: f64,
}

impl Timestamp {
    pub fn now() -> Self {
        let epoch = EPOCH.get_or_init(Instant::now);
        let wall = Utc::now().timestamp_micros() as f64 / 1e6;

        Self {
            monotonic: epoch.elapsed().as_secs_f64(),
            wall,
        }
    }

    pub fn at(monotonic: f64, wall: f64) -> Self {
        Self { monotonic, wall }
    }
}

/// Event statistics of one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub counter: u64,
    /// Seconds since the previous event
    pub latency: f64,
    pub first: f64,
    pub first_monotonic: f64,
    pub last: f64,
    pub last_monotonic: f64,
    /// Seconds between the first and the last event
    pub duration: f64,
    pub instant_frequency: f64,
    pub average_frequency: f64,
}

impl Statistics {
    /// Statistics of an entity seen for the first time
    pub fn start(now: Timestamp) -> Self {
        Self {
            counter: 1,
            latency: 0.0,
            first: now.wall,
            first_monotonic: now.monotonic,
            last: now.wall,
            last_monotonic: now.monotonic,
            duration: 0.0,
            instant_frequency: 0.0,
            average_frequency: 0.0,
        }
    }

    /// Record one more event
    ///
    /// # Examples
    ///
    /// ```
    /// use mav_bridge::store::statistics::{Statistics, Timestamp};
    ///
    /// let mut stats = Statistics::start(Timestamp::at(10.0, 1000.0));
    /// stats.record(Timestamp::at(10.5, 1000.5));
    /// assert_eq!(stats.counter, 2);
    /// assert_eq!(stats.instant_frequency, 2.0);
    /// assert_eq!(stats.average_frequency, 4.0);
    /// ```
    pub fn record(&mut self, now: Timestamp) {
        self.counter = self.counter.saturating_add(1);
        self.latency = now.monotonic - self.last_monotonic;
        self.duration = now.monotonic - self.first_monotonic;
        self.instant_frequency = if self.latency != 0.0 { 1.0 / self.latency } else { 0.0 };
        self.average_frequency = if self.duration != 0.0 {
            self.counter as f64 / self.duration
        } else {
            0.0
        };
        self.last = now.wall;
        self.last_monotonic = now.monotonic;
    }

    /// Seconds since the last event
    pub fn age(&self, now: Timestamp) -> f64 {
        now.monotonic - self.last_monotonic
    }
}

/// Start or update optional statistics
pub fn record(slot: &mut Option<Statistics>, now: Timestamp) {
    match slot {
        Some(stats) => stats.record(now),
        None => *slot = Some(Statistics::start(now)),
    }
}

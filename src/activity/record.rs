use serde::Serialize;

/// Overhead of an activity that stops every application thread.
pub const STOP_THE_WORLD_PERCENT: f64 = 100.0;

/// A single GC activity: what ran, when it started and for how long.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecord {
    name: String,
    start_sec: f64,
    duration_sec: f64,
    overhead_percent: f64,
}

impl ActivityRecord {
    /// A stop-the-world activity.
    pub fn new(name: impl Into<String>, start_sec: f64, duration_sec: f64) -> Self {
        Self::concurrent(name, start_sec, duration_sec, STOP_THE_WORLD_PERCENT)
    }

    /// An activity that only took `overhead_percent` of the machine while it ran.
    pub fn concurrent(
        name: impl Into<String>,
        start_sec: f64,
        duration_sec: f64,
        overhead_percent: f64,
    ) -> Self {
        Self {
            name: name.into(),
            start_sec,
            duration_sec,
            overhead_percent,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_sec(&self) -> f64 {
        self.start_sec
    }

    pub fn duration_sec(&self) -> f64 {
        self.duration_sec
    }

    pub fn overhead_percent(&self) -> f64 {
        self.overhead_percent
    }

    pub fn end_sec(&self) -> f64 {
        self.start_sec + self.duration_sec
    }

    pub fn is_stop_the_world(&self) -> bool {
        self.overhead_percent == STOP_THE_WORLD_PERCENT
    }

    /// Application time lost to this activity, in seconds.
    pub fn overhead_sec(&self) -> f64 {
        self.duration_sec * self.overhead_percent / 100.0
    }
}

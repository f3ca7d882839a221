//! Summary statistics over GC activities, maintained incrementally.
//!
//! [`TraceStats`] follows a trace through a [`TraceCheckpoint`]: every
//! [`TraceStats::update`] folds only the records appended since the last
//! one, so refreshing a large trace stays cheap.

pub mod monitor;

pub use monitor::StatsMonitor;

use crate::activity::ActivityRecord;
use crate::error::{TraceError, TraceResult};
use crate::trace::{ALL_ACTIVITIES, Trace, TraceCheckpoint};
use serde::Serialize;
use std::sync::Arc;

/// Running count, total, extremes, mean and variance of activity durations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActivityStats {
    count: usize,
    total_sec: f64,
    min_sec: f64,
    max_sec: f64,
    mean_sec: f64,
    // Sum of squared deviations from the mean (Welford).
    m2: f64,
    overhead_sec: f64,
}

impl ActivityStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, record: &ActivityRecord) {
        let d = record.duration_sec();
        if self.count == 0 {
            self.min_sec = d;
            self.max_sec = d;
        } else {
            self.min_sec = self.min_sec.min(d);
            self.max_sec = self.max_sec.max(d);
        }
        self.count += 1;
        self.total_sec += d;
        let delta = d - self.mean_sec;
        self.mean_sec += delta / self.count as f64;
        self.m2 += delta * (d - self.mean_sec);
        self.overhead_sec += record.overhead_sec();
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn total_sec(&self) -> f64 {
        self.total_sec
    }

    /// Zero when empty.
    pub fn min_sec(&self) -> f64 {
        self.min_sec
    }

    pub fn max_sec(&self) -> f64 {
        self.max_sec
    }

    pub fn mean_sec(&self) -> f64 {
        self.mean_sec
    }

    /// Sample standard deviation; zero below two samples.
    pub fn sigma_sec(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        }
    }

    pub fn overhead_sec(&self) -> f64 {
        self.overhead_sec
    }
}

impl<'a> FromIterator<&'a ActivityRecord> for ActivityStats {
    fn from_iter<I: IntoIterator<Item = &'a ActivityRecord>>(iter: I) -> Self {
        let mut stats = Self::new();
        for record in iter {
            stats.add(record);
        }
        stats
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityStatsRow {
    pub name: String,
    pub count: usize,
    /// Share of all activities of the trace.
    pub count_percent: f64,
    pub total_sec: f64,
    /// Share of the total duration of all activities.
    pub total_percent: f64,
    pub min_sec: f64,
    pub max_sec: f64,
    pub mean_sec: f64,
    pub sigma_sec: f64,
    pub overhead_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceStatsReport {
    pub trace: String,
    pub origin: Option<String>,
    pub last_timestamp_sec: f64,
    /// Application time lost to GC, relative to the trace length.
    pub overhead_percent: f64,
    /// One row per activity kind in id order, then the "All" row.
    pub activities: Vec<ActivityStatsRow>,
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { 100.0 * part / whole } else { 0.0 }
}

pub struct TraceStats {
    checkpoint: TraceCheckpoint,
    names: Vec<String>,
    kinds: Vec<ActivityStats>,
    all: ActivityStats,
}

impl TraceStats {
    pub fn new(trace: Arc<Trace>) -> Self {
        let mut stats = Self {
            checkpoint: TraceCheckpoint::new(trace),
            names: Vec::new(),
            kinds: Vec::new(),
            all: ActivityStats::new(),
        };
        stats.adopt_new_kinds();
        stats
    }

    pub fn trace(&self) -> &Arc<Trace> {
        self.checkpoint.trace()
    }

    fn adopt_new_kinds(&mut self) {
        let trace = self.checkpoint.trace().clone();
        for id in self.names.len()..self.checkpoint.tracked_kinds() {
            self.names
                .push(trace.activity_name(id).unwrap_or_else(|| format!("#{}", id)));
            self.kinds.push(ActivityStats::new());
        }
    }

    /// Fold everything appended since the previous update. Returns whether
    /// anything changed.
    pub fn update(&mut self) -> TraceResult<bool> {
        if !self.checkpoint.needs_update() && self.names.len() == self.trace().bucket_count() {
            return Ok(false);
        }
        // A kind registered between extending and sampling makes the
        // refresh fail; extend again and retry.
        loop {
            self.checkpoint.extend_to_trace()?;
            self.adopt_new_kinds();
            match self.checkpoint.refresh() {
                Ok(()) => break,
                Err(TraceError::Protocol(msg)) => log::debug!("retrying stats refresh: {}", msg),
                Err(e) => return Err(e),
            }
        }

        let trace = self.checkpoint.trace().clone();
        for (id, stats) in self.kinds.iter_mut().enumerate() {
            if self.checkpoint.delta(id)? == 0 {
                continue;
            }
            let range = self.checkpoint.prev_size(id)?..self.checkpoint.size(id)?;
            for record in trace.records(id, range)? {
                stats.add(&record);
            }
        }
        let range = self.checkpoint.prev_all_size()..self.checkpoint.all_size();
        for record in trace.all_records(range) {
            self.all.add(&record);
        }
        Ok(true)
    }

    pub fn kind(&self, id: usize) -> Option<&ActivityStats> {
        self.kinds.get(id)
    }

    pub fn all(&self) -> &ActivityStats {
        &self.all
    }

    pub fn report(&self) -> TraceStatsReport {
        let trace = self.checkpoint.trace();
        let last = trace.last_timestamp_sec();
        let row = |name: &str, s: &ActivityStats| ActivityStatsRow {
            name: name.to_string(),
            count: s.count(),
            count_percent: percent(s.count() as f64, self.all.count() as f64),
            total_sec: s.total_sec(),
            total_percent: percent(s.total_sec(), self.all.total_sec()),
            min_sec: s.min_sec(),
            max_sec: s.max_sec(),
            mean_sec: s.mean_sec(),
            sigma_sec: s.sigma_sec(),
            overhead_sec: s.overhead_sec(),
        };
        let mut activities: Vec<ActivityStatsRow> = self
            .names
            .iter()
            .zip(&self.kinds)
            .map(|(name, s)| row(name, s))
            .collect();
        activities.push(row(ALL_ACTIVITIES, &self.all));

        TraceStatsReport {
            trace: trace.name(),
            origin: trace.origin().map(str::to_string),
            last_timestamp_sec: last,
            overhead_percent: percent(self.all.overhead_sec(), last),
            activities,
        }
    }
}

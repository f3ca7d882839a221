//! Keeps statistics of every trace in a set up to date in the background.

use crate::activity::{ActivityBucket, ActivityRecord};
use crate::stats::{TraceStats, TraceStatsReport};
use crate::trace::{Trace, TraceListener, TraceSet, TraceSetListener};
use crate::worker::TaskQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Listens to a [`TraceSet`] and its members. Change notifications only
/// schedule a refresh on the task queue; at most one is pending at a time,
/// so appending threads never wait for statistics.
pub struct StatsMonitor {
    me: Weak<StatsMonitor>,
    queue: Arc<TaskQueue>,
    /// Minimum time between two background refreshes.
    interval: Duration,
    pending: AtomicBool,
    last_refresh: Mutex<Option<Instant>>,
    /// In set order.
    stats: Mutex<Vec<TraceStats>>,
}

impl StatsMonitor {
    pub fn new(queue: Arc<TaskQueue>, interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            queue,
            interval,
            pending: AtomicBool::new(false),
            last_refresh: Mutex::new(None),
            stats: Mutex::new(Vec::new()),
        })
    }

    /// Follow `set`, including the traces already in it.
    pub fn attach(self: &Arc<Self>, set: &TraceSet) {
        set.add_listener(self.clone());
        for trace in set.traces() {
            self.track(&trace);
        }
        self.schedule();
    }

    pub fn detach(self: &Arc<Self>, set: &TraceSet) {
        let as_set_listener: Arc<dyn TraceSetListener> = self.clone();
        set.remove_listener(&as_set_listener);
        let as_listener: Arc<dyn TraceListener> = self.clone();
        for stats in self.stats.lock().drain(..) {
            stats.trace().remove_listener(&as_listener);
        }
    }

    fn track(self: &Arc<Self>, trace: &Arc<Trace>) {
        trace.add_listener(self.clone());
        self.stats.lock().push(TraceStats::new(trace.clone()));
    }

    fn position(stats: &[TraceStats], trace: &Arc<Trace>) -> Option<usize> {
        stats.iter().position(|s| Arc::ptr_eq(s.trace(), trace))
    }

    fn schedule(&self) {
        if self.pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let submitted = self.queue.submit(move || {
            me.pace();
            me.pending.store(false, Ordering::Release);
            me.refresh_now();
        });
        if let Err(e) = submitted {
            log::debug!("stats refresh not scheduled: {}", e);
            self.pending.store(false, Ordering::Release);
        }
    }

    fn pace(&self) {
        let last = *self.last_refresh.lock();
        if let Some(last) = last {
            let since = last.elapsed();
            if since < self.interval {
                std::thread::sleep(self.interval - since);
            }
        }
    }

    /// Fold pending changes of every trace on the calling thread.
    pub fn refresh_now(&self) {
        let mut stats = self.stats.lock();
        for s in stats.iter_mut() {
            if let Err(e) = s.update() {
                log::warn!("cannot refresh statistics of {}: {}", s.trace().name(), e);
            }
        }
        *self.last_refresh.lock() = Some(Instant::now());
    }

    /// Reports as of the last refresh, in set order.
    pub fn snapshot(&self) -> Vec<TraceStatsReport> {
        self.stats.lock().iter().map(TraceStats::report).collect()
    }
}

impl TraceListener for StatsMonitor {
    fn activity_appended(&self, _trace: &Trace, _bucket: &ActivityBucket, _record: &ActivityRecord) {
        self.schedule();
    }

    fn activity_kind_registered(&self, _trace: &Trace, _id: usize, _name: &str) {
        self.schedule();
    }
}

impl TraceSetListener for StatsMonitor {
    fn trace_added(&self, trace: &Arc<Trace>) {
        if let Some(me) = self.me.upgrade() {
            me.track(trace);
        }
        self.schedule();
    }

    fn trace_removed(&self, trace: &Arc<Trace>) {
        if let Some(me) = self.me.upgrade() {
            let as_listener: Arc<dyn TraceListener> = me;
            trace.remove_listener(&as_listener);
        }
        let mut stats = self.stats.lock();
        if let Some(i) = Self::position(&stats, trace) {
            stats.remove(i);
        }
    }

    fn trace_moved_up(&self, trace: &Arc<Trace>) {
        let mut stats = self.stats.lock();
        if let Some(i) = Self::position(&stats, trace).filter(|&i| i > 0) {
            stats.swap(i - 1, i);
        }
    }

    fn trace_moved_down(&self, trace: &Arc<Trace>) {
        let mut stats = self.stats.lock();
        if let Some(i) = Self::position(&stats, trace).filter(|&i| i + 1 < stats.len()) {
            stats.swap(i, i + 1);
        }
    }
}

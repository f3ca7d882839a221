//! The trace model: one [`Trace`] per ingested log, grouped by activity kind.
//!
//! A trace owns an [`ActivityNameRegistry`], one [`ActivityBucket`] per
//! registered kind and an aggregate "All" bucket. Mutations go through a
//! per-trace writer lock so that bucket and aggregate never disagree and
//! listeners see changes in the order they were serialized.

pub mod checkpoint;
pub mod listener;
pub mod set;

pub use checkpoint::TraceCheckpoint;
pub use listener::{TraceLifecycle, TraceListener, TraceSetListener};
pub use set::TraceSet;

use crate::activity::{ActivityBucket, ActivityNameRegistry, ActivityRecord};
use crate::error::{TraceError, TraceResult};
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

/// Name of the aggregate bucket.
pub const ALL_ACTIVITIES: &str = "All";

static NEXT_TRACE_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique trace identity. Display names can change, this cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraceId(u64);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct TraceData {
    registry: ActivityNameRegistry,
    buckets: Vec<ActivityBucket>,
    all: ActivityBucket,
    last_timestamp_sec: f64,
}

pub struct Trace {
    id: TraceId,
    suggested_name: String,
    origin: Option<String>,
    name: RwLock<String>,
    added_at: RwLock<Option<DateTime<Local>>>,

    /// Serializes mutations together with their notifications.
    writer: Mutex<()>,
    /// Thread currently delivering notifications, if any.
    notifying: Mutex<Option<ThreadId>>,
    data: RwLock<TraceData>,
    listeners: Mutex<Vec<Arc<dyn TraceListener>>>,
    lifecycle: Mutex<Option<Weak<dyn TraceLifecycle>>>,
}

/// Marks the current thread as notifying for the lifetime of the guard.
struct Notifying<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> Notifying<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *slot.lock() = Some(thread::current().id());
        Notifying(slot)
    }
}

impl Drop for Notifying<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

impl Trace {
    /// An empty trace with no activity kinds registered yet.
    pub fn new(suggested_name: impl Into<String>) -> Self {
        let suggested_name = suggested_name.into();
        Self {
            id: TraceId(NEXT_TRACE_ID.fetch_add(1, Ordering::Relaxed)),
            name: RwLock::new(suggested_name.clone()),
            suggested_name,
            origin: None,
            added_at: RwLock::new(None),
            writer: Mutex::new(()),
            notifying: Mutex::new(None),
            data: RwLock::new(TraceData {
                registry: ActivityNameRegistry::new(),
                buckets: Vec::new(),
                all: ActivityBucket::new(ALL_ACTIVITIES),
                last_timestamp_sec: 0.0,
            }),
            listeners: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(None),
        }
    }

    /// Describe where the trace came from (a file path, usually).
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn id(&self) -> TraceId {
        self.id
    }

    pub fn suggested_name(&self) -> &str {
        &self.suggested_name
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Display name, unique within the owning trace set.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    pub fn added_at(&self) -> Option<DateTime<Local>> {
        *self.added_at.read()
    }

    pub(crate) fn set_added_at(&self, at: DateTime<Local>) {
        *self.added_at.write() = Some(at);
    }

    pub fn info(&self) -> String {
        let mut out = format!("{}\n", self.name());
        if let Some(origin) = &self.origin {
            out.push_str(&format!("\nOrigin : {}", origin));
        }
        if let Some(at) = self.added_at() {
            out.push_str(&format!("\nAdded On : {}", at.format("%Y-%m-%d %H:%M:%S")));
        }
        out
    }

    fn check_reentrancy(&self) -> TraceResult<()> {
        if *self.notifying.lock() == Some(thread::current().id()) {
            return Err(TraceError::Reentrant(self.name()));
        }
        Ok(())
    }

    /// Register activity kind `name` under `id`, which must equal the number
    /// of kinds registered so far. Registering an existing `(id, name)` pair
    /// again is a no-op.
    pub fn register_activity_kind(&self, id: usize, name: &str) -> TraceResult<()> {
        self.check_reentrancy()?;
        let _writer = self.writer.lock();
        {
            let data = self.data.read();
            if data.registry.name_at(id) == Some(name) {
                return Ok(());
            }
        }
        self.register_locked(id, name)
    }

    /// Id of activity kind `name`, registering it as the next id if absent.
    pub fn ensure_activity_kind(&self, name: &str) -> TraceResult<usize> {
        self.check_reentrancy()?;
        let _writer = self.writer.lock();
        let id = {
            let data = self.data.read();
            if let Some(id) = data.registry.index_of(name) {
                return Ok(id);
            }
            data.registry.len()
        };
        self.register_locked(id, name)?;
        Ok(id)
    }

    // Caller holds the writer lock.
    fn register_locked(&self, id: usize, name: &str) -> TraceResult<()> {
        {
            let mut data = self.data.write();
            data.registry.register(id, name)?;
            data.buckets.push(ActivityBucket::new(name));
            debug_assert_eq!(data.buckets.len(), data.registry.len());
        }
        log::debug!("trace {} registered activity kind {} = {:?}", self.id, id, name);

        let listeners = self.listeners.lock().clone();
        let _notifying = Notifying::enter(&self.notifying);
        for listener in &listeners {
            listener.activity_kind_registered(self, id, name);
        }
        Ok(())
    }

    /// Append `record` to the bucket of kind `id` and to the aggregate.
    pub fn append(&self, id: usize, record: ActivityRecord) -> TraceResult<()> {
        self.check_reentrancy()?;
        let _writer = self.writer.lock();

        let mut data = self.data.write();
        let expected = data.registry.name_at(id).ok_or(TraceError::Range {
            what: "activity id",
            index: id,
            len: data.buckets.len(),
        })?;
        if expected != record.name() {
            return Err(TraceError::Argument(format!(
                "record {:?} appended to activity {} ({:?})",
                record.name(),
                id,
                expected
            )));
        }

        data.last_timestamp_sec = data.last_timestamp_sec.max(record.end_sec());
        data.all.push(record.clone());
        data.buckets[id].push(record);

        // Readers may proceed while listeners run; other writers stay out.
        let data = RwLockWriteGuard::downgrade(data);
        let bucket = &data.buckets[id];
        let Some(record) = bucket.records().last() else {
            return Ok(());
        };

        let listeners = self.listeners.lock().clone();
        let _notifying = Notifying::enter(&self.notifying);
        for listener in &listeners {
            listener.activity_appended(self, bucket, record);
        }
        Ok(())
    }

    pub fn add_listener(&self, listener: Arc<dyn TraceListener>) {
        listener::add_unique(&mut self.listeners.lock(), listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn TraceListener>) {
        listener::remove_by_identity(&mut self.listeners.lock(), listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Install the hooks run when the trace joins or leaves a trace set.
    pub fn set_lifecycle(&self, hook: Weak<dyn TraceLifecycle>) {
        *self.lifecycle.lock() = Some(hook);
    }

    fn lifecycle(&self) -> Option<Arc<dyn TraceLifecycle>> {
        self.lifecycle.lock().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn run_after_added(&self) {
        if let Some(hook) = self.lifecycle() {
            hook.after_added(self);
        }
    }

    pub(crate) fn run_before_removal(&self) {
        if let Some(hook) = self.lifecycle() {
            hook.before_removal(self);
        }
    }

    // Readers use recursive read locks so listeners can call them while the
    // notifying thread still holds its read guard.

    pub fn bucket_count(&self) -> usize {
        self.data.read_recursive().buckets.len()
    }

    pub fn bucket_len(&self, id: usize) -> TraceResult<usize> {
        let data = self.data.read_recursive();
        data.buckets
            .get(id)
            .map(ActivityBucket::len)
            .ok_or(TraceError::Range {
                what: "activity id",
                index: id,
                len: data.buckets.len(),
            })
    }

    pub fn all_len(&self) -> usize {
        self.data.read_recursive().all.len()
    }

    pub fn last_timestamp_sec(&self) -> f64 {
        self.data.read_recursive().last_timestamp_sec
    }

    pub fn activity_names(&self) -> ActivityNameRegistry {
        self.data.read_recursive().registry.clone()
    }

    pub fn activity_id(&self, name: &str) -> Option<usize> {
        self.data.read_recursive().registry.index_of(name)
    }

    pub fn activity_name(&self, id: usize) -> Option<String> {
        self.data
            .read_recursive()
            .registry
            .name_at(id)
            .map(str::to_string)
    }

    /// Copies of the records of kind `id` within `range` (clamped).
    pub fn records(&self, id: usize, range: Range<usize>) -> TraceResult<Vec<ActivityRecord>> {
        let data = self.data.read_recursive();
        let bucket = data.buckets.get(id).ok_or(TraceError::Range {
            what: "activity id",
            index: id,
            len: data.buckets.len(),
        })?;
        Ok(bucket.slice(range).to_vec())
    }

    pub fn all_records(&self, range: Range<usize>) -> Vec<ActivityRecord> {
        self.data.read_recursive().all.slice(range).to_vec()
    }

    /// Bucket sizes and aggregate size sampled under one read lock.
    pub(crate) fn sample_sizes(&self, into: &mut [usize]) -> TraceResult<usize> {
        let data = self.data.read_recursive();
        if into.len() > data.buckets.len() {
            return Err(TraceError::Range {
                what: "tracked activity count",
                index: into.len(),
                len: data.buckets.len(),
            });
        }
        for (slot, bucket) in into.iter_mut().zip(&data.buckets) {
            *slot = bucket.len();
        }
        Ok(data.all.len())
    }
}

impl PartialEq for Trace {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Trace {}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("kinds", &self.bucket_count())
            .field("activities", &self.all_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn trace_with(kinds: &[&str]) -> Trace {
        let trace = Trace::new("test");
        for (id, name) in kinds.iter().enumerate() {
            trace.register_activity_kind(id, name).unwrap();
        }
        trace
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl TraceListener for Recorder {
        fn activity_appended(&self, _trace: &Trace, bucket: &ActivityBucket, record: &ActivityRecord) {
            self.events
                .lock()
                .push(format!("append {} {} #{}", bucket.name(), record.start_sec(), bucket.len()));
        }

        fn activity_kind_registered(&self, _trace: &Trace, id: usize, name: &str) {
            self.events.lock().push(format!("kind {} {}", id, name));
        }
    }

    #[test]
    fn sequential_registration_keeps_buckets_parallel() {
        let trace = Trace::new("t");
        for (id, name) in ["Young GC", "Full GC", "Remark"].iter().enumerate() {
            trace.register_activity_kind(id, name).unwrap();
            assert_eq!(trace.bucket_count(), trace.activity_names().len());
        }
        assert_eq!(trace.bucket_count(), 3);
    }

    #[test]
    fn out_of_order_registration_is_a_protocol_error() {
        let trace = trace_with(&["Young GC"]);
        assert!(matches!(
            trace.register_activity_kind(2, "Full GC"),
            Err(TraceError::Protocol(_))
        ));
        assert!(matches!(
            trace.register_activity_kind(0, "Full GC"),
            Err(TraceError::Protocol(_))
        ));
        assert_eq!(trace.bucket_count(), 1);
    }

    #[test]
    fn re_registration_is_idempotent() {
        let trace = trace_with(&["Young GC", "Full GC"]);
        trace.register_activity_kind(1, "Full GC").unwrap();
        assert_eq!(trace.bucket_count(), 2);

        assert_eq!(trace.ensure_activity_kind("Full GC").unwrap(), 1);
        assert_eq!(trace.ensure_activity_kind("Remark").unwrap(), 2);
        assert_eq!(trace.bucket_count(), 3);
    }

    #[test]
    fn append_validates_id_and_name() {
        let trace = trace_with(&["Young GC"]);
        assert!(matches!(
            trace.append(1, ActivityRecord::new("Young GC", 0.0, 0.1)),
            Err(TraceError::Range { index: 1, .. })
        ));
        assert!(matches!(
            trace.append(0, ActivityRecord::new("Full GC", 0.0, 0.1)),
            Err(TraceError::Argument(_))
        ));
        assert_eq!(trace.all_len(), 0);
    }

    #[test]
    fn append_updates_bucket_aggregate_and_last_timestamp() {
        let trace = trace_with(&["Young GC", "Full GC"]);
        trace.append(0, ActivityRecord::new("Young GC", 1.0, 0.5)).unwrap();
        trace.append(1, ActivityRecord::new("Full GC", 3.0, 2.0)).unwrap();
        // An earlier-ending record does not move the timestamp back.
        trace.append(0, ActivityRecord::new("Young GC", 2.0, 0.1)).unwrap();

        assert_eq!(trace.bucket_len(0).unwrap(), 2);
        assert_eq!(trace.bucket_len(1).unwrap(), 1);
        assert_eq!(trace.all_len(), 3);
        assert_eq!(trace.last_timestamp_sec(), 5.0);
        assert_eq!(trace.records(0, 1..2).unwrap()[0].start_sec(), 2.0);
    }

    #[test]
    fn listeners_run_in_order_after_mutation() {
        let trace = trace_with(&["Young GC"]);
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn TraceListener> = recorder.clone();
        trace.add_listener(listener.clone());
        trace.add_listener(listener.clone());
        assert_eq!(trace.listener_count(), 1);

        trace.append(0, ActivityRecord::new("Young GC", 0.0, 0.1)).unwrap();
        trace.register_activity_kind(1, "Full GC").unwrap();
        trace.append(1, ActivityRecord::new("Full GC", 1.0, 0.1)).unwrap();

        trace.remove_listener(&listener);
        trace.append(0, ActivityRecord::new("Young GC", 2.0, 0.1)).unwrap();

        assert_eq!(
            *recorder.events.lock(),
            vec![
                "append Young GC 0 #1".to_string(),
                "kind 1 Full GC".to_string(),
                "append Full GC 1 #1".to_string(),
            ]
        );
    }

    struct Reentrant {
        result: Mutex<Option<TraceResult<()>>>,
    }

    impl TraceListener for Reentrant {
        fn activity_appended(&self, trace: &Trace, _bucket: &ActivityBucket, _record: &ActivityRecord) {
            let res = trace.append(0, ActivityRecord::new("Young GC", 9.0, 0.1));
            *self.result.lock() = Some(res);
        }
    }

    #[test]
    fn listener_cannot_append_to_notifying_trace() {
        let trace = trace_with(&["Young GC"]);
        let listener = Arc::new(Reentrant {
            result: Mutex::new(None),
        });
        trace.add_listener(listener.clone());
        trace.append(0, ActivityRecord::new("Young GC", 0.0, 0.1)).unwrap();

        assert!(matches!(
            listener.result.lock().take(),
            Some(Err(TraceError::Reentrant(_)))
        ));
        assert_eq!(trace.all_len(), 1);
    }

    #[test]
    fn concurrent_appends_keep_aggregate_consistent() {
        let trace = Arc::new(trace_with(&["Young GC", "Full GC", "Remark"]));
        let names = ["Young GC", "Full GC", "Remark"];

        let handles: Vec<_> = (0..6)
            .map(|t| {
                let trace = trace.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let id = (t + i) % names.len();
                        trace
                            .append(id, ActivityRecord::new(names[id], i as f64, 0.01))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let sum: usize = (0..3).map(|id| trace.bucket_len(id).unwrap()).sum();
        assert_eq!(trace.all_len(), 3000);
        assert_eq!(sum, trace.all_len());
    }

    #[test]
    fn info_lists_origin_and_added_time() {
        let trace = Trace::new("gc.log").with_origin("/var/log/gc.log");
        assert_eq!(trace.info(), "gc.log\n\nOrigin : /var/log/gc.log");
        trace.set_added_at(Local::now());
        assert!(trace.info().contains("Added On : "));
    }

    #[test]
    fn traces_have_distinct_identities() {
        let a = Trace::new("run");
        let b = Trace::new("run");
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
    }
}

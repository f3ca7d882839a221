//! Observer interfaces for traces and trace sets.
//!
//! Listeners are plain `Arc<dyn ...>` values kept in registration order and
//! identified by pointer, so any type with the right callbacks qualifies.

use crate::activity::{ActivityBucket, ActivityRecord};
use crate::trace::Trace;
use std::sync::Arc;

/// Receives every structural and volume change of a [`Trace`].
///
/// Callbacks run synchronously on the thread that mutated the trace, after
/// the mutation is visible. They must not mutate the notifying trace.
pub trait TraceListener: Send + Sync {
    fn activity_appended(&self, _trace: &Trace, _bucket: &ActivityBucket, _record: &ActivityRecord) {
    }

    fn activity_kind_registered(&self, _trace: &Trace, _id: usize, _name: &str) {}
}

/// Receives membership and ordering changes of a [`TraceSet`](crate::trace::TraceSet).
pub trait TraceSetListener: Send + Sync {
    fn trace_added(&self, _trace: &Arc<Trace>) {}
    fn trace_renamed(&self, _trace: &Arc<Trace>) {}
    fn trace_removed(&self, _trace: &Arc<Trace>) {}
    fn trace_moved_up(&self, _trace: &Arc<Trace>) {}
    fn trace_moved_down(&self, _trace: &Arc<Trace>) {}
}

/// Hooks a trace's owner runs around set membership (a playback-backed trace
/// uses them to expose its controls and to wind down before removal).
pub trait TraceLifecycle: Send + Sync {
    fn after_added(&self, _trace: &Trace) {}

    /// Must not return until the trace is quiescent.
    fn before_removal(&self, _trace: &Trace) {}
}

pub(crate) fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Insert `listener` unless it is already registered.
pub(crate) fn add_unique<T: ?Sized>(list: &mut Vec<Arc<T>>, listener: Arc<T>) -> bool {
    if list.iter().any(|l| same_listener(l, &listener)) {
        return false;
    }
    list.push(listener);
    true
}

pub(crate) fn remove_by_identity<T: ?Sized>(list: &mut Vec<Arc<T>>, listener: &Arc<T>) -> bool {
    let before = list.len();
    list.retain(|l| !same_listener(l, listener));
    list.len() != before
}

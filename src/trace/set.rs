//! An ordered collection of uniquely named traces.
//!
//! The set listens to every member so it can keep a merged activity-name
//! registry (the union of all member registries, rebuilt from scratch on
//! every structural change) and fans its own membership changes out to
//! [`TraceSetListener`]s.

use crate::activity::ActivityNameRegistry;
use crate::error::{TraceError, TraceResult};
use crate::trace::listener::{self, TraceListener, TraceSetListener};
use crate::trace::Trace;
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// State shared with member traces, which notify it from their own threads.
#[derive(Default)]
struct Members {
    traces: RwLock<Vec<Arc<Trace>>>,
    merged: RwLock<ActivityNameRegistry>,
}

impl Members {
    // Compute and store under one guard, or a stale union can land last.
    fn recompute_merged(&self) {
        let mut merged = self.merged.write();
        let mut union = ActivityNameRegistry::new();
        for trace in self.traces.read().iter() {
            union.merge(&trace.activity_names());
        }
        *merged = union;
    }

    fn find(&self, name: &str) -> Option<(usize, Arc<Trace>)> {
        self.traces
            .read()
            .iter()
            .enumerate()
            .find(|(_, t)| t.name() == name)
            .map(|(i, t)| (i, t.clone()))
    }
}

impl TraceListener for Members {
    fn activity_kind_registered(&self, _trace: &Trace, _id: usize, _name: &str) {
        self.recompute_merged();
    }
}

#[derive(Default)]
pub struct TraceSet {
    /// Serializes add/remove/rename/move.
    structure: Mutex<()>,
    members: Arc<Members>,
    listeners: Mutex<Vec<Arc<dyn TraceSetListener>>>,
}

impl TraceSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn as_listener(&self) -> Arc<dyn TraceListener> {
        self.members.clone()
    }

    fn unique_name(&self, suggested: &str) -> String {
        let mut name = suggested.to_string();
        let mut i = 0;
        while self.members.find(&name).is_some() {
            i += 1;
            name = format!("{}.{}", suggested, i);
        }
        name
    }

    fn fire(&self, f: impl Fn(&dyn TraceSetListener)) {
        let listeners = self.listeners.lock().clone();
        for l in &listeners {
            f(l.as_ref());
        }
    }

    fn lookup(&self, name: &str, op: &str) -> TraceResult<(usize, Arc<Trace>)> {
        self.members.find(name).ok_or_else(|| {
            log::warn!("cannot {} {:?}: no such trace in the set", op, name);
            TraceError::NotFound(format!("trace {:?}", name))
        })
    }

    /// Add `trace` under a unique name derived from its suggested name.
    /// Returns the assigned name.
    pub fn add(&self, trace: Arc<Trace>) -> TraceResult<String> {
        let _structure = self.structure.lock();
        if self.members.traces.read().iter().any(|t| Arc::ptr_eq(t, &trace)) {
            return Err(TraceError::Argument(format!(
                "trace {} is already in the set",
                trace.name()
            )));
        }

        let name = self.unique_name(trace.suggested_name());
        trace.set_name(&name);
        trace.set_added_at(Local::now());
        trace.add_listener(self.as_listener());
        self.members.traces.write().push(trace.clone());
        self.members.recompute_merged();
        log::info!("added trace {:?} ({})", name, trace.id());

        self.fire(|l| l.trace_added(&trace));
        trace.run_after_added();
        Ok(name)
    }

    /// Remove the trace called `name`, after its before-removal hook returns.
    pub fn remove(&self, name: &str) -> TraceResult<Arc<Trace>> {
        let _structure = self.structure.lock();
        let (_, trace) = self.lookup(name, "remove")?;

        // Runs without the member lock: a winding-down playback may still
        // register kinds, which notifies us.
        trace.run_before_removal();

        self.members
            .traces
            .write()
            .retain(|t| !Arc::ptr_eq(t, &trace));
        trace.remove_listener(&self.as_listener());
        self.members.recompute_merged();
        log::info!("removed trace {:?} ({})", name, trace.id());

        self.fire(|l| l.trace_removed(&trace));
        Ok(trace)
    }

    /// Rename a trace. Returns `false` (and changes nothing) when `new_name`
    /// is taken by another trace. Renaming to the current name is a no-op.
    pub fn rename(&self, name: &str, new_name: &str) -> TraceResult<bool> {
        let _structure = self.structure.lock();
        let (_, trace) = self.lookup(name, "rename")?;
        if name == new_name {
            return Ok(true);
        }
        if self.members.find(new_name).is_some() {
            log::warn!("trace name {:?} already exists", new_name);
            return Ok(false);
        }
        trace.set_name(new_name);
        self.fire(|l| l.trace_renamed(&trace));
        Ok(true)
    }

    /// Swap the trace with its predecessor. Returns `false` at the front.
    pub fn move_up(&self, name: &str) -> TraceResult<bool> {
        let _structure = self.structure.lock();
        let (index, trace) = self.lookup(name, "move up")?;
        if index == 0 {
            log::warn!("trace {:?} is already first", name);
            return Ok(false);
        }
        self.members.traces.write().swap(index - 1, index);
        self.fire(|l| l.trace_moved_up(&trace));
        Ok(true)
    }

    /// Swap the trace with its successor. Returns `false` at the back.
    pub fn move_down(&self, name: &str) -> TraceResult<bool> {
        let _structure = self.structure.lock();
        let (index, trace) = self.lookup(name, "move down")?;
        if index + 1 >= self.len() {
            log::warn!("trace {:?} is already last", name);
            return Ok(false);
        }
        self.members.traces.write().swap(index, index + 1);
        self.fire(|l| l.trace_moved_down(&trace));
        Ok(true)
    }

    pub fn add_listener(&self, listener: Arc<dyn TraceSetListener>) {
        listener::add_unique(&mut self.listeners.lock(), listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn TraceSetListener>) {
        listener::remove_by_identity(&mut self.listeners.lock(), listener);
    }

    pub fn find(&self, name: &str) -> Option<Arc<Trace>> {
        self.members.find(name).map(|(_, t)| t)
    }

    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.members.find(name).map(|(i, _)| i)
    }

    pub fn get(&self, index: usize) -> TraceResult<Arc<Trace>> {
        let traces = self.members.traces.read();
        traces.get(index).cloned().ok_or(TraceError::Range {
            what: "trace index",
            index,
            len: traces.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.members.traces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the members in set order.
    pub fn traces(&self) -> Vec<Arc<Trace>> {
        self.members.traces.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.members.traces.read().iter().map(|t| t.name()).collect()
    }

    pub fn merged_names(&self) -> ActivityNameRegistry {
        self.members.merged.read().clone()
    }

    /// Id of `name` in the merged registry.
    pub fn activity_id(&self, name: &str) -> Option<usize> {
        self.members.merged.read().index_of(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityRecord;
    use crate::trace::TraceLifecycle;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl TraceSetListener for Events {
        fn trace_added(&self, t: &Arc<Trace>) {
            self.0.lock().push(format!("added {}", t.name()));
        }
        fn trace_renamed(&self, t: &Arc<Trace>) {
            self.0.lock().push(format!("renamed {}", t.name()));
        }
        fn trace_removed(&self, t: &Arc<Trace>) {
            self.0.lock().push(format!("removed {}", t.name()));
        }
        fn trace_moved_up(&self, t: &Arc<Trace>) {
            self.0.lock().push(format!("up {}", t.name()));
        }
        fn trace_moved_down(&self, t: &Arc<Trace>) {
            self.0.lock().push(format!("down {}", t.name()));
        }
    }

    fn set_with(names: &[&str]) -> (TraceSet, Arc<Events>) {
        let set = TraceSet::new();
        let events = Arc::new(Events::default());
        set.add_listener(events.clone());
        for name in names {
            set.add(Arc::new(Trace::new(*name))).unwrap();
        }
        (set, events)
    }

    #[test]
    fn colliding_suggestions_get_numbered() {
        let (set, events) = set_with(&["run", "run", "run"]);
        assert_eq!(set.names(), vec!["run", "run.1", "run.2"]);
        assert!(set.get(1).unwrap().added_at().is_some());
        assert_eq!(
            *events.0.lock(),
            vec!["added run", "added run.1", "added run.2"]
        );
    }

    #[test]
    fn adding_the_same_trace_twice_is_rejected() {
        let set = TraceSet::new();
        let trace = Arc::new(Trace::new("run"));
        set.add(trace.clone()).unwrap();
        assert!(matches!(set.add(trace), Err(TraceError::Argument(_))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn rename_refuses_taken_names() {
        let (set, events) = set_with(&["a", "b"]);
        assert_eq!(set.rename("a", "b").unwrap(), false);
        assert_eq!(set.rename("a", "c").unwrap(), true);
        assert!(matches!(set.rename("zzz", "d"), Err(TraceError::NotFound(_))));
        assert_eq!(set.names(), vec!["c", "b"]);
        assert_eq!(events.0.lock().last().unwrap(), "renamed c");
    }

    #[test]
    fn rename_to_same_name_changes_nothing() {
        let (set, events) = set_with(&["a"]);
        assert_eq!(set.rename("a", "a").unwrap(), true);
        assert_eq!(set.names(), vec!["a"]);
        assert_eq!(*events.0.lock(), vec!["added a"]);
    }

    #[test]
    fn merged_registry_survives_concurrent_registration() {
        for _ in 0..200 {
            let set = TraceSet::new();
            let traces = [Arc::new(Trace::new("x")), Arc::new(Trace::new("y"))];
            for trace in &traces {
                set.add(trace.clone()).unwrap();
            }

            let handles: Vec<_> = traces
                .iter()
                .map(|trace| {
                    let trace = trace.clone();
                    std::thread::spawn(move || {
                        for i in 0..20 {
                            let name = format!("{} kind {}", trace.suggested_name(), i);
                            trace.ensure_activity_kind(&name).unwrap();
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            let merged = set.merged_names();
            assert_eq!(merged.len(), 40);
            for i in 0..20 {
                assert!(merged.contains(&format!("x kind {}", i)));
                assert!(merged.contains(&format!("y kind {}", i)));
            }
        }
    }

    #[rstest]
    #[case::up_from_middle("b", true, vec!["b", "a", "c"])]
    #[case::up_at_front("a", false, vec!["a", "b", "c"])]
    fn move_up(#[case] name: &str, #[case] moved: bool, #[case] order: Vec<&str>) {
        let (set, events) = set_with(&["a", "b", "c"]);
        assert_eq!(set.move_up(name).unwrap(), moved);
        assert_eq!(set.names(), order);
        assert_eq!(events.0.lock().len(), 3 + moved as usize);
    }

    #[rstest]
    #[case::down_from_middle("b", true, vec!["a", "c", "b"])]
    #[case::down_at_back("c", false, vec!["a", "b", "c"])]
    fn move_down(#[case] name: &str, #[case] moved: bool, #[case] order: Vec<&str>) {
        let (set, events) = set_with(&["a", "b", "c"]);
        assert_eq!(set.move_down(name).unwrap(), moved);
        assert_eq!(set.names(), order);
        assert_eq!(events.0.lock().len(), 3 + moved as usize);
    }

    #[test]
    fn merged_registry_follows_membership_and_registration() {
        let set = TraceSet::new();
        let a = Arc::new(Trace::new("a"));
        a.ensure_activity_kind("Young GC").unwrap();
        a.ensure_activity_kind("Full GC").unwrap();
        let b = Arc::new(Trace::new("b"));
        b.ensure_activity_kind("Young GC").unwrap();

        set.add(a.clone()).unwrap();
        set.add(b.clone()).unwrap();
        assert_eq!(set.merged_names().names(), &["Young GC", "Full GC"]);

        b.ensure_activity_kind("Remark").unwrap();
        assert_eq!(set.activity_id("Remark"), Some(2));

        // Volume changes do not touch the registry.
        a.append(0, ActivityRecord::new("Young GC", 0.0, 0.1)).unwrap();
        assert_eq!(set.merged_names().len(), 3);

        set.remove("a").unwrap();
        assert_eq!(set.merged_names().names(), &["Young GC", "Remark"]);
        assert_eq!(a.listener_count(), 0);
        assert!(matches!(set.remove("a"), Err(TraceError::NotFound(_))));
    }

    struct Hooks(Mutex<Vec<&'static str>>);

    impl TraceLifecycle for Hooks {
        fn after_added(&self, _trace: &Trace) {
            self.0.lock().push("after_added");
        }
        fn before_removal(&self, _trace: &Trace) {
            self.0.lock().push("before_removal");
        }
    }

    #[test]
    fn lifecycle_hooks_bracket_membership() {
        let set = TraceSet::new();
        let hooks = Arc::new(Hooks(Mutex::new(Vec::new())));
        let trace = Arc::new(Trace::new("dyn"));
        let weak: std::sync::Weak<Hooks> = Arc::downgrade(&hooks);
        let hook: std::sync::Weak<dyn TraceLifecycle> = weak;
        trace.set_lifecycle(hook);

        set.add(trace).unwrap();
        set.remove("dyn").unwrap();
        assert_eq!(*hooks.0.lock(), vec!["after_added", "before_removal"]);
        assert!(set.is_empty());
        assert!(matches!(set.get(0), Err(TraceError::Range { .. })));
    }
}

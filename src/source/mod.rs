//! Event sources: where decoded GC events come from.
//!
//! The trace model does not know log grammars. A source yields
//! [`DecodedEvent`]s one at a time; playback pulls from it and decides the
//! pace. Sources are selected through the explicit [`SourceKind`] list.

pub mod datastore;
pub mod merge;
pub mod simple;

pub use datastore::DataStoreSource;
pub use merge::{MetricMerge, MetricStream};
pub use simple::SimpleLogSource;

use crate::activity::ActivityRecord;
use crate::error::{SourceError, TraceResult};
use crate::trace::Trace;
use clap::ValueEnum;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// One event as decoded from a log, before it is bound to a trace.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub name: String,
    pub start_sec: f64,
    pub duration_sec: f64,
    /// `None` for stop-the-world activities.
    pub overhead_percent: Option<f64>,
}

impl DecodedEvent {
    pub fn new(name: impl Into<String>, start_sec: f64, duration_sec: f64) -> Self {
        Self {
            name: name.into(),
            start_sec,
            duration_sec,
            overhead_percent: None,
        }
    }

    pub fn with_overhead(mut self, percent: f64) -> Self {
        self.overhead_percent = Some(percent);
        self
    }

    pub fn into_record(self) -> ActivityRecord {
        match self.overhead_percent {
            Some(p) => ActivityRecord::concurrent(self.name, self.start_sec, self.duration_sec, p),
            None => ActivityRecord::new(self.name, self.start_sec, self.duration_sec),
        }
    }
}

/// A lazily decoded sequence of events. `Ok(None)` means exhausted.
pub trait EventSource: Send {
    fn next_event(&mut self) -> Result<Option<DecodedEvent>, SourceError>;
}

/// Something that can (re)open an event source; playback opens a fresh one
/// for every session.
pub trait OpenSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn EventSource>, SourceError>;

    fn describe(&self) -> String;

    fn kinds(&self) -> KindPolicy {
        KindPolicy::gc_defaults()
    }
}

/// Adapts a closure into an [`OpenSource`].
pub struct FnSource<F> {
    description: String,
    open: F,
}

impl<F> FnSource<F>
where
    F: Fn() -> Result<Box<dyn EventSource>, SourceError> + Send + Sync,
{
    pub fn new(description: impl Into<String>, open: F) -> Self {
        Self {
            description: description.into(),
            open,
        }
    }
}

impl<F> OpenSource for FnSource<F>
where
    F: Fn() -> Result<Box<dyn EventSource>, SourceError> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn EventSource>, SourceError> {
        (self.open)()
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Which activity kinds a source registers up front, and which kinds must
/// exist before another one is registered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KindPolicy {
    shared: Vec<String>,
    implied: Vec<(String, String)>,
}

impl KindPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Young and full collections are registered first so every trace agrees
    /// on their ids; a remark pause always comes with an initial mark.
    pub fn gc_defaults() -> Self {
        Self::new()
            .with_shared(["Young GC", "Full GC"])
            .implies("Remark", "Initial Mark")
    }

    pub fn with_shared<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.extend(names.into_iter().map(Into::into));
        self
    }

    /// Registering `kind` first registers `prerequisite`.
    pub fn implies(mut self, kind: impl Into<String>, prerequisite: impl Into<String>) -> Self {
        self.implied.push((kind.into(), prerequisite.into()));
        self
    }

    pub fn setup(&self, trace: &Trace) -> TraceResult<()> {
        for name in &self.shared {
            self.ensure(trace, name)?;
        }
        Ok(())
    }

    /// Id of `name` in `trace`, registering it (and its prerequisites) if new.
    pub fn ensure(&self, trace: &Trace, name: &str) -> TraceResult<usize> {
        if let Some(id) = trace.activity_id(name) {
            return Ok(id);
        }
        for (kind, prerequisite) in &self.implied {
            if kind == name && prerequisite != name {
                self.ensure(trace, prerequisite)?;
            }
        }
        trace.ensure_activity_kind(name)
    }
}

/// Supported log formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// One `Name start duration [overhead] [before after]` event per line.
    Simple,
    /// A directory of per-metric `timestamp value` files.
    #[value(name = "datastore")]
    DataStore,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Simple, SourceKind::DataStore];

    /// Guess the format: directories are data stores, files are simple logs.
    pub fn detect(path: &Path) -> Self {
        if path.is_dir() {
            SourceKind::DataStore
        } else {
            SourceKind::Simple
        }
    }

    /// Open `path` as a log of this format.
    pub fn open_path(self, path: &Path) -> Result<Box<dyn EventSource>, SourceError> {
        match self {
            SourceKind::Simple => {
                let file = File::open(path)?;
                Ok(Box::new(SimpleLogSource::new(
                    path.display().to_string(),
                    BufReader::new(file),
                )))
            }
            SourceKind::DataStore => Ok(Box::new(DataStoreSource::open_dir(path)?)),
        }
    }
}

/// A log on disk together with its format.
#[derive(Debug, Clone)]
pub struct LogSource {
    kind: SourceKind,
    path: PathBuf,
}

impl LogSource {
    pub fn new(kind: SourceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// A fresh trace for this log, with the shared kinds already registered.
    pub fn new_trace(&self) -> TraceResult<Trace> {
        let suggested = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        let trace = Trace::new(suggested).with_origin(self.path.display().to_string());
        self.kinds().setup(&trace)?;
        Ok(trace)
    }
}

impl OpenSource for LogSource {
    fn open(&self) -> Result<Box<dyn EventSource>, SourceError> {
        self.kind.open_path(&self.path)
    }

    fn describe(&self) -> String {
        format!("{:?} log {}", self.kind, self.path.display())
    }
}

/// Events held in memory, optionally failing after a number of events.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    events: VecDeque<DecodedEvent>,
    fail_after: Option<(usize, String)>,
    served: usize,
}

impl VecSource {
    pub fn new(events: impl IntoIterator<Item = DecodedEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            fail_after: None,
            served: 0,
        }
    }

    /// Report an I/O error once `n` events have been served.
    pub fn failing_after(mut self, n: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((n, message.into()));
        self
    }
}

impl EventSource for VecSource {
    fn next_event(&mut self) -> Result<Option<DecodedEvent>, SourceError> {
        if let Some((n, message)) = &self.fail_after {
            if self.served >= *n {
                return Err(SourceError::Io(std::io::Error::other(message.clone())));
            }
        }
        let next = self.events.pop_front();
        if next.is_some() {
            self.served += 1;
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn remark_brings_initial_mark_along() {
        let trace = Trace::new("t");
        let kinds = KindPolicy::gc_defaults();
        kinds.setup(&trace).unwrap();
        assert_eq!(kinds.ensure(&trace, "Remark").unwrap(), 3);
        assert_eq!(
            trace.activity_names().names(),
            &["Young GC", "Full GC", "Initial Mark", "Remark"]
        );
        assert_eq!(kinds.ensure(&trace, "Initial Mark").unwrap(), 2);
    }

    #[test]
    fn decoded_events_become_records() {
        let stw = DecodedEvent::new("Full GC", 1.0, 2.0).into_record();
        assert!(stw.is_stop_the_world());
        let conc = DecodedEvent::new("Concurrent Mark", 1.0, 2.0)
            .with_overhead(50.0)
            .into_record();
        assert_eq!(conc.overhead_percent(), 50.0);
    }

    #[test]
    fn vec_source_fails_on_schedule() {
        let mut src = VecSource::new([
            DecodedEvent::new("Young GC", 0.0, 0.1),
            DecodedEvent::new("Young GC", 1.0, 0.1),
        ])
        .failing_after(1, "disk gone");
        assert!(src.next_event().unwrap().is_some());
        assert!(matches!(src.next_event(), Err(SourceError::Io(_))));
    }

    #[test]
    fn log_source_reads_simple_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gc.log");
        std::fs::write(&path, "YoungGC 0.5 0.01\nRemark 1.0 0.2\n").unwrap();

        let log = LogSource::new(SourceKind::detect(&path), &path);
        let trace = log.new_trace().unwrap();
        assert_eq!(trace.suggested_name(), "gc.log");
        assert_eq!(trace.bucket_count(), 2);

        let mut events = log.open().unwrap();
        let mut names = Vec::new();
        while let Some(ev) = events.next_event().unwrap() {
            names.push(ev.name);
        }
        assert_eq!(names, vec!["Young GC", "Remark"]);
        assert!(matches!(
            SourceKind::Simple.open_path(&dir.path().join("missing.log")),
            Err(SourceError::Io(_))
        ));
    }

    #[test]
    fn directories_are_data_stores() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(SourceKind::detect(dir.path()), SourceKind::DataStore);
        assert_eq!(SourceKind::detect(&dir.path().join("gc.log")), SourceKind::Simple);
    }
}

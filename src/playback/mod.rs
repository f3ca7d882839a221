//! Feeds a trace from an event source on a dedicated ingestion thread.
//!
//! The engine owns one session at a time. Controls (`pause`, `resume`,
//! `stop`) only flip shared state; the ingestion thread observes them at
//! its checkpoints, so a stop never interrupts an append halfway.

mod control;
pub mod throttle;

pub use throttle::{
    BatchThrottle, NoThrottle, Pacer, RealTimeThrottle, Throttle, ThrottleStrategy,
};

use crate::error::{PlaybackError, TraceError, TraceResult};
use crate::source::OpenSource;
use crate::trace::{Trace, TraceLifecycle};
use control::Control;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the ingestion thread sleeps between pause/stop checks.
pub const DEFAULT_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Pausing,
    Paused,
    Finishing,
    Failed,
}

impl PlaybackState {
    /// A session is running (possibly parked).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PlaybackState::Playing
                | PlaybackState::Pausing
                | PlaybackState::Paused
                | PlaybackState::Finishing
        )
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Pausing => "pausing",
            PlaybackState::Paused => "paused",
            PlaybackState::Finishing => "finishing",
            PlaybackState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Callbacks from a playback session. They run on the ingestion thread,
/// except `state_changed` for transitions a control call makes.
pub trait PlaybackObserver: Send + Sync {
    fn state_changed(&self, _state: PlaybackState) {}

    fn status(&self, _text: &str) {}

    fn started(&self) {}

    fn finished(&self) {}

    /// Called once per failed session, before the state turns `Failed`.
    fn failed(&self, _error: &PlaybackError) {}
}

pub struct NopObserver;

impl PlaybackObserver for NopObserver {}

pub struct PlaybackEngine {
    trace: Arc<Trace>,
    source: Arc<dyn OpenSource>,
    control: Arc<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackEngine {
    /// Create an engine and install it as the trace's lifecycle hook.
    pub fn new(
        trace: Arc<Trace>,
        source: Arc<dyn OpenSource>,
        observer: Arc<dyn PlaybackObserver>,
        slice: Duration,
    ) -> Arc<Self> {
        let engine = Arc::new(Self {
            trace: trace.clone(),
            source,
            control: Arc::new(Control::new(slice, observer)),
            worker: Mutex::new(None),
        });
        let weak: Weak<PlaybackEngine> = Arc::downgrade(&engine);
        let hook: Weak<dyn TraceLifecycle> = weak;
        trace.set_lifecycle(hook);
        engine
    }

    pub fn trace(&self) -> &Arc<Trace> {
        &self.trace
    }

    pub fn state(&self) -> PlaybackState {
        self.control.phase()
    }

    /// Start a session. Allowed from `Idle` or after a failure.
    pub fn play(&self, strategy: ThrottleStrategy) -> TraceResult<()> {
        let throttle = strategy.build()?;
        self.control.begin()?;
        self.reap();

        let trace = self.trace.clone();
        let source = self.source.clone();
        let control = self.control.clone();
        let spawned = thread::Builder::new()
            .name(format!("playback-{}", self.trace.id()))
            .spawn(move || run_session(trace, source, control, throttle));
        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                log::info!(
                    "playing {} into {} ({:?})",
                    self.source.describe(),
                    self.trace.name(),
                    strategy
                );
                Ok(())
            }
            Err(e) => {
                self.control.abort();
                Err(TraceError::Worker(format!(
                    "cannot start playback thread: {}",
                    e
                )))
            }
        }
    }

    pub fn play_real(&self, speed_percent: u32) -> TraceResult<()> {
        self.play(ThrottleStrategy::RealTime { speed_percent })
    }

    pub fn play_fast(&self, events_per_tick: usize, tick_secs: f64) -> TraceResult<()> {
        let tick = Duration::try_from_secs_f64(tick_secs).map_err(|_| {
            TraceError::Argument(format!("bad tick length {} secs", tick_secs))
        })?;
        self.play(ThrottleStrategy::Batch {
            events_per_tick,
            tick,
        })
    }

    /// Ask the session to park at its next checkpoint.
    pub fn pause(&self) -> TraceResult<()> {
        self.control.request_pause()
    }

    pub fn resume(&self) -> TraceResult<()> {
        self.control.resume()
    }

    /// Ask the session to stop. Returns without waiting; see `wait_for_stop`.
    pub fn stop(&self) -> TraceResult<()> {
        self.control.request_stop()
    }

    /// Block until the running session (if any) has ended.
    pub fn wait_for_stop(&self) {
        self.control.wait_for_stop();
        self.reap();
    }

    fn reap(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("playback thread for {} panicked", self.trace.name());
            }
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        if self.control.request_stop().is_ok() {
            self.control.wait_for_stop();
        }
    }
}

impl TraceLifecycle for PlaybackEngine {
    fn after_added(&self, trace: &Trace) {
        log::debug!("{} attached to {}", self.source.describe(), trace.name());
    }

    fn before_removal(&self, trace: &Trace) {
        if self.control.request_stop().is_ok() {
            log::info!("stopping playback into {} before removal", trace.name());
        }
        self.wait_for_stop();
    }
}

fn run_session(
    trace: Arc<Trace>,
    source: Arc<dyn OpenSource>,
    control: Arc<Control>,
    mut throttle: Box<dyn Throttle>,
) {
    let observer = control.observer().clone();
    let mut pacer = Pacer::new(control.clone());
    observer.started();
    pacer.publish_status();

    let result = ingest(&trace, source.as_ref(), &control, throttle.as_mut(), &mut pacer);
    pacer.publish_completed();
    match result {
        Ok(()) => {
            log::info!("{} events played into {}", pacer.count(), trace.name());
            control.finish(false);
            observer.finished();
        }
        Err(e) => {
            log::error!("playback into {} failed: {}", trace.name(), e);
            observer.failed(&e);
            control.finish(true);
        }
    }
}

fn ingest(
    trace: &Trace,
    source: &dyn OpenSource,
    control: &Control,
    throttle: &mut dyn Throttle,
    pacer: &mut Pacer,
) -> Result<(), PlaybackError> {
    let kinds = source.kinds();
    kinds.setup(trace)?;
    let mut events = source.open()?;
    while !control.stop_requested() {
        let Some(event) = events.next_event()? else {
            break;
        };
        let start_sec = event.start_sec;
        throttle.before_append(pacer, start_sec);
        if control.stop_requested() {
            break;
        }
        let id = kinds.ensure(trace, &event.name)?;
        trace.append(id, event.into_record())?;
        pacer.appended();
        throttle.after_append(pacer, start_sec);
    }
    Ok(())
}

//! GC activity traces: an in-memory, listener-driven trace model fed by a
//! pausable playback engine, plus the statistics built on top of it.

pub mod activity;
pub mod config;
pub mod error;
pub mod playback;
pub mod source;
pub mod stats;
pub mod trace;
pub mod worker;

pub use activity::{ActivityBucket, ActivityNameRegistry, ActivityRecord};
pub use error::{PlaybackError, SourceError, TraceError, TraceResult};
pub use playback::{PlaybackEngine, PlaybackObserver, PlaybackState, ThrottleStrategy};
pub use source::{DecodedEvent, EventSource, LogSource, OpenSource, SourceKind};
pub use stats::{StatsMonitor, TraceStats, TraceStatsReport};
pub use trace::{Trace, TraceCheckpoint, TraceListener, TraceSet, TraceSetListener};
pub use worker::TaskQueue;

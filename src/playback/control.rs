//! Cross-thread playback state: the phase, the stop flag and the condition
//! variable the ingestion thread parks on.

use crate::error::{TraceError, TraceResult};
use crate::playback::{PlaybackObserver, PlaybackState};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct ControlState {
    phase: PlaybackState,
    stop_requested: bool,
}

pub(crate) struct Control {
    state: Mutex<ControlState>,
    cond: Condvar,
    slice: Duration,
    observer: Arc<dyn PlaybackObserver>,
}

impl Control {
    pub(crate) fn new(slice: Duration, observer: Arc<dyn PlaybackObserver>) -> Self {
        Self {
            state: Mutex::new(ControlState {
                phase: PlaybackState::Idle,
                stop_requested: false,
            }),
            cond: Condvar::new(),
            slice,
            observer,
        }
    }

    pub(crate) fn observer(&self) -> &Arc<dyn PlaybackObserver> {
        &self.observer
    }

    pub(crate) fn phase(&self) -> PlaybackState {
        self.state.lock().phase
    }

    fn set_phase(&self, phase: PlaybackState) {
        self.state.lock().phase = phase;
        self.cond.notify_all();
        self.observer.state_changed(phase);
    }

    fn invalid(op: &'static str, phase: PlaybackState) -> TraceError {
        TraceError::InvalidState {
            op,
            state: phase.to_string(),
        }
    }

    pub(crate) fn begin(&self) -> TraceResult<()> {
        {
            let mut state = self.state.lock();
            match state.phase {
                PlaybackState::Idle | PlaybackState::Failed => {
                    state.phase = PlaybackState::Playing;
                    state.stop_requested = false;
                }
                phase => return Err(Self::invalid("play", phase)),
            }
        }
        self.observer.state_changed(PlaybackState::Playing);
        Ok(())
    }

    /// Undo `begin` when the ingestion thread could not be started.
    pub(crate) fn abort(&self) {
        self.set_phase(PlaybackState::Idle);
    }

    pub(crate) fn request_pause(&self) -> TraceResult<()> {
        {
            let mut state = self.state.lock();
            if state.phase != PlaybackState::Playing || state.stop_requested {
                return Err(Self::invalid("pause", state.phase));
            }
            state.phase = PlaybackState::Pausing;
        }
        self.observer.state_changed(PlaybackState::Pausing);
        Ok(())
    }

    pub(crate) fn resume(&self) -> TraceResult<()> {
        {
            let mut state = self.state.lock();
            if state.phase != PlaybackState::Paused || state.stop_requested {
                return Err(Self::invalid("resume", state.phase));
            }
            state.phase = PlaybackState::Playing;
        }
        self.cond.notify_all();
        self.observer.state_changed(PlaybackState::Playing);
        Ok(())
    }

    pub(crate) fn request_stop(&self) -> TraceResult<()> {
        let mut state = self.state.lock();
        match state.phase {
            PlaybackState::Playing | PlaybackState::Pausing | PlaybackState::Paused => {
                state.stop_requested = true;
                self.cond.notify_all();
                Ok(())
            }
            phase => Err(Self::invalid("stop", phase)),
        }
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.state.lock().stop_requested
    }

    /// Pause checkpoint: park while paused, return once resumed or stopping.
    pub(crate) fn checkpoint(&self) {
        let mut state = self.state.lock();
        if state.phase != PlaybackState::Pausing {
            return;
        }
        state.phase = PlaybackState::Paused;
        self.cond.notify_all();
        drop(state);
        log::debug!("playback paused");
        self.observer.state_changed(PlaybackState::Paused);

        let mut state = self.state.lock();
        while state.phase == PlaybackState::Paused && !state.stop_requested {
            self.cond.wait(&mut state);
        }
        log::debug!("playback woke up (stop requested: {})", state.stop_requested);
    }

    /// Block until `deadline` in slices, honouring pause and stop requests.
    pub(crate) fn wait_until(&self, deadline: Instant) {
        loop {
            {
                let mut state = self.state.lock();
                if state.stop_requested {
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    return;
                }
                let nap = self.slice.min(deadline - now);
                self.cond.wait_for(&mut state, nap);
                if state.stop_requested {
                    return;
                }
            }
            self.checkpoint();
        }
    }

    /// Leave the session through `Finishing`, ending in `Idle` or `Failed`.
    pub(crate) fn finish(&self, failed: bool) {
        self.set_phase(PlaybackState::Finishing);
        {
            let mut state = self.state.lock();
            state.stop_requested = false;
        }
        self.set_phase(if failed {
            PlaybackState::Failed
        } else {
            PlaybackState::Idle
        });
    }

    /// Block until no session is running.
    pub(crate) fn wait_for_stop(&self) {
        let mut state = self.state.lock();
        while state.phase.is_active() {
            self.cond.wait(&mut state);
        }
    }
}

//! Pacing strategies for playback.
//!
//! A throttle sees every event twice: before it is appended (where it may
//! block) and after (where it decides whether to publish a status line).
//! Blocking always goes through the [`Pacer`], which wakes up on pause and
//! stop requests.

use crate::error::{TraceError, TraceResult};
use crate::playback::control::Control;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clock and counters of one playback session.
pub struct Pacer {
    control: Arc<Control>,
    start: Instant,
    count: usize,
}

impl Pacer {
    pub(crate) fn new(control: Arc<Control>) -> Self {
        Self {
            control,
            start: Instant::now(),
            count: 0,
        }
    }

    /// Events appended so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Block until `offset` after the session started.
    pub fn wait_until(&self, offset: Duration) {
        self.control.wait_until(self.start + offset);
    }

    /// Park here if a pause was requested.
    pub fn checkpoint(&self) {
        self.control.checkpoint();
    }

    pub fn publish_status(&self) {
        let text = format!("{} events in {:.2} secs", self.count, self.elapsed_secs());
        self.control.observer().status(&text);
    }

    pub(crate) fn appended(&mut self) {
        self.count += 1;
    }

    pub(crate) fn publish_completed(&self) {
        let text = format!(
            "Completed {} events in {:.2} secs",
            self.count,
            self.elapsed_secs()
        );
        self.control.observer().status(&text);
    }
}

pub trait Throttle: Send {
    fn before_append(&mut self, pacer: &Pacer, start_sec: f64);

    fn after_append(&mut self, _pacer: &Pacer, _start_sec: f64) {}
}

/// Append as fast as the source decodes.
pub struct NoThrottle;

impl Throttle for NoThrottle {
    fn before_append(&mut self, pacer: &Pacer, _start_sec: f64) {
        pacer.checkpoint();
    }
}

/// Replays event timestamps against the wall clock, scaled by a speed.
pub struct RealTimeThrottle {
    speed: f64,
}

impl RealTimeThrottle {
    /// `speed_percent` of 100 is real time, 200 twice as fast.
    pub fn new(speed_percent: u32) -> TraceResult<Self> {
        if speed_percent == 0 {
            return Err(TraceError::Argument(
                "playback speed must be a positive percentage".to_string(),
            ));
        }
        Ok(Self {
            speed: f64::from(speed_percent) / 100.0,
        })
    }

    fn target(&self, start_sec: f64) -> Duration {
        Duration::try_from_secs_f64(start_sec / self.speed).unwrap_or(Duration::ZERO)
    }
}

impl Throttle for RealTimeThrottle {
    fn before_append(&mut self, pacer: &Pacer, start_sec: f64) {
        pacer.wait_until(self.target(start_sec));
        pacer.checkpoint();
    }

    fn after_append(&mut self, pacer: &Pacer, _start_sec: f64) {
        pacer.publish_status();
    }
}

/// Appends `events_per_tick` events, then waits for the next tick.
pub struct BatchThrottle {
    events_per_tick: usize,
    tick: Duration,
}

impl BatchThrottle {
    pub fn new(events_per_tick: usize, tick: Duration) -> TraceResult<Self> {
        if events_per_tick == 0 {
            return Err(TraceError::Argument(
                "events per tick must be positive".to_string(),
            ));
        }
        Ok(Self {
            events_per_tick,
            tick,
        })
    }
}

impl Throttle for BatchThrottle {
    fn before_append(&mut self, pacer: &Pacer, _start_sec: f64) {
        let count = pacer.count();
        if count > 0 && count % self.events_per_tick == 0 {
            let ticks = (count / self.events_per_tick) as u32;
            pacer.wait_until(self.tick.saturating_mul(ticks));
        }
        pacer.checkpoint();
    }

    fn after_append(&mut self, pacer: &Pacer, _start_sec: f64) {
        if pacer.count() % self.events_per_tick == 0 {
            pacer.publish_status();
        }
    }
}

/// How a playback session is paced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThrottleStrategy {
    Unthrottled,
    RealTime { speed_percent: u32 },
    Batch { events_per_tick: usize, tick: Duration },
}

impl ThrottleStrategy {
    pub fn build(self) -> TraceResult<Box<dyn Throttle>> {
        Ok(match self {
            ThrottleStrategy::Unthrottled => Box::new(NoThrottle),
            ThrottleStrategy::RealTime { speed_percent } => {
                Box::new(RealTimeThrottle::new(speed_percent)?)
            }
            ThrottleStrategy::Batch {
                events_per_tick,
                tick,
            } => Box::new(BatchThrottle::new(events_per_tick, tick)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::NopObserver;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(100, 2.0, 2000)]
    #[case(200, 2.0, 1000)]
    #[case(50, 1.5, 3000)]
    #[case(100, -1.0, 0)]
    fn real_time_targets_scale_with_speed(
        #[case] speed: u32,
        #[case] start_sec: f64,
        #[case] millis: u64,
    ) {
        let t = RealTimeThrottle::new(speed).unwrap();
        assert_eq!(t.target(start_sec), Duration::from_millis(millis));
    }

    #[test]
    fn zero_rates_are_rejected() {
        assert!(ThrottleStrategy::RealTime { speed_percent: 0 }.build().is_err());
        assert!(
            ThrottleStrategy::Batch {
                events_per_tick: 0,
                tick: Duration::from_millis(1)
            }
            .build()
            .is_err()
        );
    }

    #[test]
    fn batch_waits_between_ticks() {
        let control = Arc::new(Control::new(
            Duration::from_millis(5),
            Arc::new(NopObserver),
        ));
        let mut pacer = Pacer::new(control);
        let mut throttle = BatchThrottle::new(2, Duration::from_millis(40)).unwrap();
        for _ in 0..4 {
            throttle.before_append(&pacer, 0.0);
            pacer.appended();
            throttle.after_append(&pacer, 0.0);
        }
        // Second batch only starts after the first tick.
        assert!(pacer.elapsed_secs() >= 0.04);
        assert_eq!(pacer.count(), 4);
    }
}

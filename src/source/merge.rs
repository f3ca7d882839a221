//! K-way merge of per-metric sample streams into one time-ordered source.

use crate::error::SourceError;
use crate::source::{DecodedEvent, EventSource};

/// Time-ordered `(timestamp_sec, duration_sec)` samples of one activity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricStream {
    name: String,
    samples: Vec<(f64, f64)>,
    index: usize,
}

impl MetricStream {
    pub fn new(name: impl Into<String>, samples: Vec<(f64, f64)>) -> Self {
        Self {
            name: name.into(),
            samples,
            index: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_more(&self) -> bool {
        self.index < self.samples.len()
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.index
    }

    fn peek_time(&self) -> Option<f64> {
        self.samples.get(self.index).map(|(t, _)| *t)
    }
}

/// Streams are listed in priority order: when two heads share a timestamp
/// the earlier stream goes first.
#[derive(Debug, Clone, Default)]
pub struct MetricMerge {
    streams: Vec<MetricStream>,
}

impl MetricMerge {
    pub fn new(streams: Vec<MetricStream>) -> Self {
        Self { streams }
    }

    pub fn push(&mut self, stream: MetricStream) {
        self.streams.push(stream);
    }

    pub fn has_more(&self) -> bool {
        self.streams.iter().any(MetricStream::has_more)
    }

    pub fn remaining(&self) -> usize {
        self.streams.iter().map(MetricStream::remaining).sum()
    }

    fn earliest(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, stream) in self.streams.iter().enumerate() {
            let Some(t) = stream.peek_time() else {
                continue;
            };
            match best {
                Some((_, bt)) if t >= bt => {}
                _ => best = Some((i, t)),
            }
        }
        best.map(|(i, _)| i)
    }
}

impl EventSource for MetricMerge {
    fn next_event(&mut self) -> Result<Option<DecodedEvent>, SourceError> {
        let Some(i) = self.earliest() else {
            return Ok(None);
        };
        let stream = &mut self.streams[i];
        let (start_sec, duration_sec) = stream.samples[stream.index];
        stream.index += 1;
        Ok(Some(DecodedEvent::new(stream.name.clone(), start_sec, duration_sec)))
    }
}

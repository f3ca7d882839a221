//! Consumer-local size snapshots of a trace.
//!
//! A checkpoint remembers how many records each bucket (and the aggregate)
//! held at the last two refreshes. Consumers poll [`TraceCheckpoint::needs_update`]
//! and, after [`TraceCheckpoint::refresh`], read per-kind deltas in
//! O(number of kinds) instead of walking the records.
//!
//! Whenever the trace grows a new bucket, [`TraceCheckpoint::extend`] has to
//! be called for it before the next refresh.

use crate::error::{TraceError, TraceResult};
use crate::trace::Trace;
use std::sync::Arc;

#[derive(Debug)]
pub struct TraceCheckpoint {
    trace: Arc<Trace>,
    prev_sizes: Vec<usize>,
    sizes: Vec<usize>,
    prev_all_size: usize,
    all_size: usize,
}

impl TraceCheckpoint {
    /// Track every bucket the trace has right now, all sizes starting at zero.
    pub fn new(trace: Arc<Trace>) -> Self {
        let kinds = trace.bucket_count();
        Self {
            trace,
            prev_sizes: vec![0; kinds],
            sizes: vec![0; kinds],
            prev_all_size: 0,
            all_size: 0,
        }
    }

    pub fn trace(&self) -> &Arc<Trace> {
        &self.trace
    }

    /// Start tracking bucket `id`, which must be the next untracked one.
    pub fn extend(&mut self, id: usize) -> TraceResult<()> {
        if id != self.sizes.len() {
            return Err(TraceError::Protocol(format!(
                "checkpoint extended with id {} while tracking {} kinds",
                id,
                self.sizes.len()
            )));
        }
        let live = self.trace.bucket_count();
        if id >= live {
            return Err(TraceError::Range {
                what: "activity id",
                index: id,
                len: live,
            });
        }
        self.prev_sizes.push(0);
        self.sizes.push(0);
        debug_assert_eq!(self.prev_sizes.len(), self.sizes.len());
        Ok(())
    }

    /// Extend for every bucket the trace gained since the last call.
    pub fn extend_to_trace(&mut self) -> TraceResult<usize> {
        let live = self.trace.bucket_count();
        let added = live.saturating_sub(self.sizes.len());
        for id in self.sizes.len()..live {
            self.extend(id)?;
        }
        Ok(added)
    }

    /// Shift current sizes to previous and re-sample the live trace.
    pub fn refresh(&mut self) -> TraceResult<()> {
        let live = self.trace.bucket_count();
        if live != self.sizes.len() {
            return Err(TraceError::Protocol(format!(
                "checkpoint tracks {} kinds but trace {} has {}; extend() first",
                self.sizes.len(),
                self.trace.name(),
                live
            )));
        }

        self.prev_sizes.copy_from_slice(&self.sizes);
        self.prev_all_size = self.all_size;
        self.all_size = self.trace.sample_sizes(&mut self.sizes)?;
        Ok(())
    }

    /// Whether the trace changed since the last refresh. Does not mutate.
    pub fn needs_update(&self) -> bool {
        let mut live = vec![0; self.sizes.len()];
        match self.trace.sample_sizes(&mut live) {
            Ok(all) => all != self.all_size || live != self.sizes,
            Err(_) => true,
        }
    }

    pub fn tracked_kinds(&self) -> usize {
        self.sizes.len()
    }

    fn tracked(&self, id: usize) -> TraceResult<(usize, usize)> {
        match (self.prev_sizes.get(id), self.sizes.get(id)) {
            (Some(prev), Some(size)) => Ok((*prev, *size)),
            _ => Err(TraceError::Range {
                what: "activity id",
                index: id,
                len: self.sizes.len(),
            }),
        }
    }

    pub fn prev_size(&self, id: usize) -> TraceResult<usize> {
        self.tracked(id).map(|(prev, _)| prev)
    }

    pub fn size(&self, id: usize) -> TraceResult<usize> {
        self.tracked(id).map(|(_, size)| size)
    }

    /// Records appended to bucket `id` between the last two refreshes.
    pub fn delta(&self, id: usize) -> TraceResult<usize> {
        self.tracked(id).map(|(prev, size)| size - prev)
    }

    pub fn prev_all_size(&self) -> usize {
        self.prev_all_size
    }

    pub fn all_size(&self) -> usize {
        self.all_size
    }

    pub fn all_delta(&self) -> usize {
        self.all_size - self.prev_all_size
    }
}

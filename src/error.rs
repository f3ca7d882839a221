//! Error types shared by the trace model, playback and sources.

use thiserror::Error;

/// Failures raised by the in-memory trace model and its consumers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    /// An ordering invariant was violated by the caller (always a defect).
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("{what} {index} out of range (len {len})")]
    Range {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("{0} does not exist")]
    NotFound(String),

    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: String },

    /// A listener tried to mutate the trace that is notifying it.
    #[error("re-entrant mutation of trace {0} from inside a listener")]
    Reentrant(String),

    #[error("worker unavailable: {0}")]
    Worker(String),
}

pub type TraceResult<T> = std::result::Result<T, TraceError>;

/// Failures produced while decoding events from a log.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing error at {origin}:{line}: {message}")]
    Parse {
        origin: String,
        line: usize,
        message: String,
    },
}

/// Why a playback session ended early.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Trace(#[from] TraceError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn messages_name_the_offending_value() {
        let err = TraceError::Range {
            what: "activity id",
            index: 4,
            len: 2,
        };
        assert_eq!(err.to_string(), "activity id 4 out of range (len 2)");

        let err = SourceError::Parse {
            origin: "gc.log".to_string(),
            line: 7,
            message: "missing duration".to_string(),
        };
        assert_eq!(err.to_string(), "parsing error at gc.log:7: missing duration");
    }
}

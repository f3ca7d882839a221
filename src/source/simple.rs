//! Simple GC log format: one event per line.
//!
//! Expected columns (whitespace-separated):
//! name  start_sec  duration_sec  [overhead_percent]  [space_before  space_after]
//!
//! Example:
//! YoungGC   12.503   0.0211
//! ConcurrentMark   13.0   1.25   25
//!
//! Two trailing fields are the heap occupancy before/after (ignored here);
//! an odd number of trailing fields means the first one is the concurrent
//! overhead. Names are CamelCase in the file and displayed with spaces.

use crate::error::SourceError;
use crate::source::{DecodedEvent, EventSource};
use regex::Regex;
use std::io::BufRead;
use std::sync::LazyLock;

/// Negative values this close to zero are rounding noise and clamp to zero.
const NEGATIVE_TOLERANCE: f64 = 1e-6;

// 1) name
// 2) start
// 3) duration
// 4) up to three trailing fields
static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(\S+)\s+(\S+)\s+(\S+)((?:\s+\S+)*)\s*$"#).expect("valid line regex")
});

pub struct SimpleLogSource<R> {
    origin: String,
    reader: R,
    lineno: usize,
    buf: String,
}

impl<R: BufRead + Send> SimpleLogSource<R> {
    pub fn new(origin: impl Into<String>, reader: R) -> Self {
        Self {
            origin: origin.into(),
            reader,
            lineno: 0,
            buf: String::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> SourceError {
        SourceError::Parse {
            origin: self.origin.clone(),
            line: self.lineno,
            message: message.into(),
        }
    }

    fn parse_number(&self, field: &str, what: &str) -> Result<f64, SourceError> {
        let value: f64 = field
            .parse()
            .map_err(|_| self.error(format!("bad {} {:?}", what, field)))?;
        check_bounds(value).ok_or_else(|| self.error(format!("{} {} less than zero", what, value)))
    }

    fn parse_line(&self, line: &str) -> Result<DecodedEvent, SourceError> {
        let caps = LINE_RE
            .captures(line)
            .ok_or_else(|| self.error(format!("cannot parse line: {:?}", line)))?;

        let name = add_spaces(&caps[1]);
        let start_sec = self.parse_number(&caps[2], "start")?;
        let duration_sec = self.parse_number(&caps[3], "duration")?;

        let rest: Vec<&str> = caps[4].split_whitespace().collect();
        let mut event = DecodedEvent::new(name, start_sec, duration_sec);
        match rest.len() {
            0 | 2 => {}
            1 | 3 => {
                let overhead: f64 = rest[0]
                    .parse()
                    .map_err(|_| self.error(format!("bad overhead {:?}", rest[0])))?;
                event = event.with_overhead(overhead);
            }
            n => return Err(self.error(format!("{} trailing fields, expected at most 3", n))),
        }
        // Occupancy fields must still be integers even though they are unused.
        for field in rest.iter().skip(rest.len() % 2) {
            field
                .parse::<u64>()
                .map_err(|_| self.error(format!("bad space size {:?}", field)))?;
        }
        Ok(event)
    }
}

impl<R: BufRead + Send> EventSource for SimpleLogSource<R> {
    fn next_event(&mut self) -> Result<Option<DecodedEvent>, SourceError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.lineno += 1;
            let line = self.buf.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            return self.parse_line(line).map(Some);
        }
    }
}

fn check_bounds(value: f64) -> Option<f64> {
    if value >= 0.0 {
        Some(value)
    } else if value > -NEGATIVE_TOLERANCE {
        Some(0.0)
    } else {
        None
    }
}

/// "InitialMark" -> "Initial Mark", "YoungGC" -> "Young GC".
pub fn add_spaces(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_lowercase() {
            prev_lower = true;
        }
        if c.is_uppercase() && prev_lower {
            out.push(' ');
            prev_lower = false;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn decode(text: &str) -> Result<Vec<DecodedEvent>, SourceError> {
        let mut src = SimpleLogSource::new("test.log", text.as_bytes());
        let mut out = Vec::new();
        while let Some(ev) = src.next_event()? {
            out.push(ev);
        }
        Ok(out)
    }

    #[rstest]
    #[case("YoungGC", "Young GC")]
    #[case("InitialMark", "Initial Mark")]
    #[case("FullGC", "Full GC")]
    #[case("Remark", "Remark")]
    #[case("CMS", "CMS")]
    fn camel_case_gets_spaces(#[case] raw: &str, #[case] shown: &str) {
        assert_eq!(add_spaces(raw), shown);
    }

    #[test]
    fn trailing_fields_decide_overhead() {
        let events = decode(
            "YoungGC 1.0 0.02\n\
             \n\
             ConcurrentMark 2.0 1.5 25\n\
             FullGC 3.0 0.8 1024 512\n\
             ConcurrentSweep 4.0 2.0 30 2048 1024\n",
        )
        .unwrap();

        assert_eq!(
            events,
            vec![
                DecodedEvent::new("Young GC", 1.0, 0.02),
                DecodedEvent::new("Concurrent Mark", 2.0, 1.5).with_overhead(25.0),
                DecodedEvent::new("Full GC", 3.0, 0.8),
                DecodedEvent::new("Concurrent Sweep", 4.0, 2.0).with_overhead(30.0),
            ]
        );
    }

    #[test]
    fn tiny_negative_values_clamp_to_zero() {
        let events = decode("YoungGC -0.0000001 0.5\n").unwrap();
        assert_eq!(events[0].start_sec, 0.0);
    }

    #[rstest]
    #[case::negative("YoungGC -1.0 0.5\n", 1)]
    #[case::missing_duration("YoungGC 1.0\n", 1)]
    #[case::not_a_number("YoungGC 1.0 0.1\nFullGC abc 0.5\n", 2)]
    #[case::too_many_fields("YoungGC 1 2 3 4 5 6\n", 1)]
    #[case::bad_space("FullGC 1 2 big 5\n", 1)]
    fn malformed_lines_report_their_line(#[case] text: &str, #[case] line: usize) {
        match decode(text) {
            Err(SourceError::Parse { line: l, origin, .. }) => {
                assert_eq!(l, line);
                assert_eq!(origin, "test.log");
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}

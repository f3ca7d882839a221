//! Per-metric sample files as saved by a GC data store.
//!
//! Each metric lives in its own file named `<prefix><metric><suffix>`,
//! one sample per line:
//! timestamp_sec  value_sec
//!
//! Example (`ygc_time`):
//! 0.532 0.0123
//! 1.104 0.0119

use crate::error::SourceError;
use crate::source::{DecodedEvent, EventSource, MetricMerge, MetricStream};
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::LazyLock;

/// Metric file names and the activity each one holds, in merge priority order.
pub const METRICS: [(&str, &str); 4] = [
    ("ygc_time", "Young GC"),
    ("cms_im_time", "Initial Mark"),
    ("cms_rm_time", "Remark"),
    ("fgc_time", "Full GC"),
];

static SAMPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*([-+0-9.eE]+)\s+([-+0-9.eE]+)\s*$"#).expect("valid sample regex")
});

pub struct DataStoreSource {
    merge: MetricMerge,
}

impl DataStoreSource {
    /// Load `<dir>/<metric>` for every known metric.
    pub fn open_dir(dir: &Path) -> Result<Self, SourceError> {
        Self::open(&format!("{}/", dir.display()), "")
    }

    /// Load `<prefix><metric><suffix>` for every known metric. Missing files
    /// are empty streams, but at least one must exist.
    pub fn open(prefix: &str, suffix: &str) -> Result<Self, SourceError> {
        let mut merge = MetricMerge::default();
        let mut found = 0;
        for (metric, activity) in METRICS {
            let path = format!("{}{}{}", prefix, metric, suffix);
            let samples = match fs::read_to_string(&path) {
                Ok(text) => {
                    found += 1;
                    parse_samples(&path, &text)?
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    log::debug!("no samples for {} ({} missing)", activity, path);
                    Vec::new()
                }
                Err(e) => return Err(e.into()),
            };
            merge.push(MetricStream::new(activity, samples));
        }
        if found == 0 {
            return Err(SourceError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("no metric files found under {}*{}", prefix, suffix),
            )));
        }
        log::debug!("loaded {} samples from {}", merge.remaining(), prefix);
        Ok(Self { merge })
    }
}

impl EventSource for DataStoreSource {
    fn next_event(&mut self) -> Result<Option<DecodedEvent>, SourceError> {
        self.merge.next_event()
    }
}

fn parse_samples(path: &str, text: &str) -> Result<Vec<(f64, f64)>, SourceError> {
    let mut out = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let lno = lineno + 1;
        if line.trim().is_empty() {
            continue;
        }
        let error = |message: String| SourceError::Parse {
            origin: path.to_string(),
            line: lno,
            message,
        };

        let caps = SAMPLE_RE
            .captures(line)
            .ok_or_else(|| error(format!("cannot parse line: {:?}", line)))?;
        let time: f64 = caps[1]
            .parse()
            .map_err(|_| error(format!("bad timestamp {:?}", &caps[1])))?;
        let value: f64 = caps[2]
            .parse()
            .map_err(|_| error(format!("bad value {:?}", &caps[2])))?;
        out.push((time, value));
    }
    Ok(out)
}

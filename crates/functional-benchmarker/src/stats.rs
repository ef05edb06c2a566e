//! Correlation of received log lines into latency, bloat and loss statistics.
//!
//! Every benchmark line carries the stream it came from and a zero-padded
//! sequence id. Loss is inferred from gaps in the sequence ids of a stream, so
//! clock skew between the stressors and the receiver does not affect it.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BenchmarkError, Result};

static PERF_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r#"epoc_in":(?P<epoc_in>[-+0-9.eE]+)"#,
        r#".*epoc_out":(?P<epoc_out>[-+0-9.eE]+)"#,
        r#".*message":"(?P<message>[^"]*?(?P<stream>functional\.0\.[0-9A-Z]+) - (?P<seqid>\d{10}) -[^"]*)""#,
    ))
    .expect("benchmark line pattern is valid")
});

/// One correlated benchmark log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfLog {
    pub stream: String,
    pub sequence_id: u64,
    /// Seconds since the epoch when the line was written.
    pub epoch_in: f64,
    /// Seconds since the epoch when the receiver got it.
    pub epoch_out: f64,
    /// Length of the raw line over the length of its message.
    pub bloat: f64,
}

impl PerfLog {
    /// Parse a received line; `None` when it is not a benchmark line.
    pub fn parse(line: &str) -> Option<Self> {
        let caps = PERF_LINE.captures(line)?;
        let message = caps.name("message")?.as_str();
        if message.is_empty() {
            return None;
        }
        Some(PerfLog {
            stream: caps.name("stream")?.as_str().to_string(),
            sequence_id: caps.name("seqid")?.as_str().parse().ok()?,
            epoch_in: caps.name("epoc_in")?.as_str().parse().ok()?,
            epoch_out: caps.name("epoc_out")?.as_str().parse().ok()?,
            bloat: line.len() as f64 / message.len() as f64,
        })
    }

    /// The canonical received line for this record carrying `payload`.
    pub fn render(&self, payload: &str) -> String {
        format!(
            r#"{{"epoc_in":{:?},"epoc_out":{:?},"message":"{} - {:010} - {}"}}"#,
            self.epoch_in, self.epoch_out, self.stream, self.sequence_id, payload
        )
    }

    /// Seconds between writing and receiving the line.
    pub fn elapsed(&self) -> f64 {
        self.epoch_out - self.epoch_in
    }
}

/// Sequence-id continuity of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamLossStats {
    pub stream: String,
    pub min_seq: u64,
    pub max_seq: u64,
    pub collected: usize,
    /// Received sequence ids, ascending.
    pub entries: Vec<u64>,
}

impl StreamLossStats {
    /// Build from the sequence ids received for `stream`, in any order.
    pub fn new(stream: impl Into<String>, mut entries: Vec<u64>) -> Self {
        entries.sort_unstable();
        StreamLossStats {
            stream: stream.into(),
            min_seq: entries.first().copied().unwrap_or(0),
            max_seq: entries.last().copied().unwrap_or(0),
            collected: entries.len(),
            entries,
        }
    }

    pub fn range(&self) -> u64 {
        self.max_seq - self.min_seq
    }

    /// Collected lines over the id range, capped at 100.
    pub fn percent_collected(&self) -> f64 {
        match self.range() {
            0 if self.collected > 0 => 100.0,
            0 => 0.0,
            range => (self.collected as f64 / range as f64 * 100.0).min(100.0),
        }
    }

    /// `(sequence id, lines lost so far)` for every id from min to max.
    ///
    /// Lazy: a stream with a huge id range costs nothing until consumed.
    pub fn loss_curve(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        let ids = if self.entries.is_empty() {
            1..=0
        } else {
            self.min_seq..=self.max_seq
        };
        let mut next = 0;
        let mut lost = 0;
        ids.map(move |expected| {
            if self.entries.get(next) == Some(&expected) {
                while self.entries.get(next) == Some(&expected) {
                    next += 1;
                }
            } else {
                lost += 1;
            }
            (expected, lost)
        })
    }

    /// The points of [`loss_curve`](Self::loss_curve) where it changes slope:
    /// every received id plus the first and last id of each gap. Grows with the
    /// ids received rather than with their range.
    pub fn loss_steps(&self) -> Vec<(u64, u64)> {
        let mut points = Vec::new();
        let mut lost = 0;
        let mut previous: Option<u64> = None;
        for &id in &self.entries {
            if let Some(prev) = previous {
                if id == prev {
                    continue;
                }
                let missing = id - prev - 1;
                if missing > 0 {
                    points.push((prev + 1, lost + 1));
                    if missing > 1 {
                        points.push((id - 1, lost + missing));
                    }
                    lost += missing;
                }
            }
            points.push((id, lost));
            previous = Some(id);
        }
        points
    }
}

/// Everything the reporter needs about a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub logs: Vec<PerfLog>,
    /// Payload size in bytes.
    pub msg_size: usize,
    /// Wall-clock duration of the load phase.
    pub elapsed: Duration,
    pub losses: BTreeMap<String, StreamLossStats>,
    /// Per-line latencies in seconds, ascending.
    pub sorted_elapsed: Vec<f64>,
}

impl Statistics {
    pub fn new(logs: Vec<PerfLog>, msg_size: usize, elapsed: Duration) -> Self {
        let mut by_stream: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for log in &logs {
            by_stream
                .entry(log.stream.clone())
                .or_default()
                .push(log.sequence_id);
        }
        let losses = by_stream
            .into_iter()
            .map(|(stream, ids)| (stream.clone(), StreamLossStats::new(stream, ids)))
            .collect();

        let mut sorted_elapsed: Vec<f64> = logs.iter().map(PerfLog::elapsed).collect();
        sorted_elapsed.sort_by(f64::total_cmp);

        Statistics {
            logs,
            msg_size,
            elapsed,
            losses,
            sorted_elapsed,
        }
    }

    pub fn min(&self) -> f64 {
        self.sorted_elapsed.first().copied().unwrap_or(0.0)
    }

    pub fn max(&self) -> f64 {
        self.sorted_elapsed.last().copied().unwrap_or(0.0)
    }

    pub fn median(&self) -> f64 {
        self.sorted_elapsed
            .get(self.sorted_elapsed.len() / 2)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn mean(&self) -> f64 {
        mean(&self.sorted_elapsed)
    }

    pub fn mean_bloat(&self) -> f64 {
        mean(&self.logs.iter().map(|l| l.bloat).collect::<Vec<_>>())
    }

    /// Received lines per second over the load phase.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.logs.len() as f64 / secs
        } else {
            0.0
        }
    }

    pub fn total_collected(&self) -> usize {
        self.losses.values().map(|l| l.collected).sum()
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Parse received lines and compute the run's statistics.
///
/// Lines that are not benchmark lines are skipped with a warning; it is an
/// error only when lines were received and none of them parsed.
pub fn analyze<'a>(
    lines: impl IntoIterator<Item = &'a str>,
    msg_size: usize,
    elapsed: Duration,
) -> Result<Statistics> {
    let mut received = 0;
    let mut logs = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        received += 1;
        match PerfLog::parse(line) {
            Some(log) => logs.push(log),
            None => warn!(line = %truncate(line, 120), "Skipping line that is not a benchmark record"),
        }
    }
    if received > 0 && logs.is_empty() {
        return Err(BenchmarkError::NoParseableLines(received));
    }
    debug!(received, parsed = logs.len(), "Analyzed receiver output");
    Ok(Statistics::new(logs, msg_size, elapsed))
}

fn truncate(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((i, _)) => &line[..i],
        None => line,
    }
}

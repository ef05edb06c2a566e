//! Command line options of the benchmarker.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::error::{BenchmarkError, Result};

/// Default image of the collector under test.
pub const DEFAULT_IMAGE: &str = logging_operator::constants::defaults::COLLECTOR_IMAGE;

/// How long to wait for the receiver to hand back its logs.
pub const DEFAULT_READ_TIMEOUT: &str = "5m";

#[derive(Parser, Debug, Clone, Serialize)]
#[command(
    name = "functional-benchmarker",
    about = "Measures latency, loss and resource usage of the log collector",
    version
)]
pub struct Options {
    /// Collector image reference
    #[arg(long, env = "BENCHMARK_IMAGE", default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Synthetic payload size in bytes
    #[arg(long, default_value = "1024")]
    pub size: usize,

    /// Log lines per second per stressor
    #[arg(long, default_value = "1")]
    pub lines_per_sec: u32,

    /// Number of parallel stressors
    #[arg(long, default_value = "1")]
    pub tot_stressors: u32,

    /// Total run duration (e.g. "90s", "5m")
    #[arg(long, value_parser = parse_duration, default_value = "5m")]
    #[serde(with = "duration_secs")]
    pub run_duration: Duration,

    /// Metric sampling period
    #[arg(long, value_parser = parse_duration, default_value = "1s")]
    #[serde(with = "duration_secs")]
    pub sample_duration: Duration,

    /// Receiver read timeout
    #[arg(long, value_parser = parse_duration, default_value = DEFAULT_READ_TIMEOUT)]
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,

    /// Where stressor payloads come from
    #[arg(long, value_enum, default_value = "synthetic")]
    pub payload_source: PayloadSource,

    /// Path to an external collector configuration, or "-" for stdin
    #[arg(long, default_value = "")]
    pub collector_config: String,

    /// Use the built-in baseline collector configuration
    #[arg(long)]
    pub baseline: bool,

    /// Tear down the benchmark workloads after the run
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub do_cleanup: bool,

    /// Output directory for artifacts (defaults to a timestamped directory)
    #[arg(long)]
    pub artifact_dir: Option<PathBuf>,

    /// Namespace the benchmark workloads are deployed to (generated when unset)
    #[arg(long, env = "BENCHMARK_NAMESPACE")]
    pub namespace: Option<String>,

    /// Summary format written next to the HTML and Markdown reports
    #[arg(long, value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSource {
    /// Random alphanumeric payload of `size` bytes
    Synthetic,
    /// Application-like sentences cut to `size` bytes
    Application,
    /// A single repeated character
    Simple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Csv,
}

/// Where the collector configuration comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorConfigSource {
    /// Generated from a forwarder spec routing application logs to the receiver.
    Generated,
    Baseline,
    Stdin,
    File(PathBuf),
}

impl Options {
    /// Reject option combinations that cannot produce a run.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(BenchmarkError::Config("size must be > 0".into()));
        }
        if self.lines_per_sec == 0 {
            return Err(BenchmarkError::Config("lines-per-sec must be > 0".into()));
        }
        if self.tot_stressors == 0 {
            return Err(BenchmarkError::Config("tot-stressors must be > 0".into()));
        }
        if self.run_duration.is_zero() {
            return Err(BenchmarkError::Config("run-duration must be > 0".into()));
        }
        if self.sample_duration.is_zero() {
            return Err(BenchmarkError::Config("sample-duration must be > 0".into()));
        }
        if self.baseline && !self.collector_config.is_empty() {
            return Err(BenchmarkError::Config(
                "baseline and collector-config are mutually exclusive".into(),
            ));
        }
        if let CollectorConfigSource::File(path) = self.collector_config_source() {
            if !path.is_file() {
                return Err(BenchmarkError::Config(format!(
                    "collector-config {} is not a readable file",
                    path.display()
                )));
            }
        }
        if let Some(dir) = &self.artifact_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(BenchmarkError::Config(format!(
                    "artifact-dir {} is not a directory",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    pub fn collector_config_source(&self) -> CollectorConfigSource {
        match self.collector_config.as_str() {
            _ if self.baseline => CollectorConfigSource::Baseline,
            "" => CollectorConfigSource::Generated,
            "-" => CollectorConfigSource::Stdin,
            path => CollectorConfigSource::File(PathBuf::from(path)),
        }
    }

    /// The artifact directory, or `benchmark-<timestamp>` when none was given.
    pub fn resolved_artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(|| {
            PathBuf::from(format!("benchmark-{}", Utc::now().format("%Y%m%d-%H%M%S")))
        })
    }

    /// Total lines the stressors are expected to emit over the run.
    pub fn expected_lines(&self) -> u64 {
        u64::from(self.lines_per_sec) * u64::from(self.tot_stressors) * self.run_duration.as_secs()
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}

/// Parse duration from string (e.g., "60s", "5m", "1h")
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Duration::from_secs(0));
    }

    let (value_str, unit) = if let Some((pos, _)) = s.char_indices().find(|(_, c)| c.is_alphabetic()) {
        s.split_at(pos)
    } else {
        // No unit specified, assume seconds
        return s
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| format!("Invalid duration value: {}", e));
    };

    let value: u64 = value_str
        .parse()
        .map_err(|e| format!("Invalid duration value: {}", e))?;

    let scaled = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("Duration out of range: {}", s))
    };
    match unit.to_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "m" | "min" | "mins" | "minute" | "minutes" => scaled(60),
        "h" | "hr" | "hrs" | "hour" | "hours" => scaled(3600),
        "ms" | "millis" | "millisecond" | "milliseconds" => Ok(Duration::from_millis(value)),
        _ => Err(format!("Unknown duration unit: {}", unit)),
    }
}

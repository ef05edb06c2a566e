//! Benchmark result reporting and formatting.
//!
//! Every reporter sees the same [`Report`]; the summary rows they print come
//! from [`summary_rows`] and [`loss_rows`], so the formats never disagree on a
//! number or on column order.

mod csv;
mod data;
mod html;
mod markdown;
mod plot;
mod table;

use std::path::Path;

use anyhow::{bail, Result};
use tabled::Tabled;
use tracing::{info, warn};

use crate::config::{CollectorConfigSource, Options, OutputFormat};
use crate::sampler::Sample;
use crate::stats::Statistics;

pub use self::csv::CsvReporter;
pub use self::data::{data_file_names, data_files, DataReporter};
pub use self::html::{render_html, HtmlReporter};
pub use self::markdown::{render_markdown, MarkdownReporter};
pub use self::plot::{charts, linear_fit, plot_names, render_svg, Chart, PlotReporter, Series};
pub use self::table::{render_table, TableReporter};

/// Everything a reporter renders.
#[derive(Debug, Clone, Copy)]
pub struct Report<'a> {
    pub options: &'a Options,
    pub samples: &'a [Sample],
    pub statistics: &'a Statistics,
}

/// Reporter trait
pub trait Reporter {
    fn name(&self) -> &'static str;
    fn report(&self, report: &Report<'_>) -> Result<()>;
}

/// The reporters selected by `format`, writing into `artifact_dir`.
pub fn reporters(artifact_dir: &Path, format: OutputFormat) -> Vec<Box<dyn Reporter>> {
    let mut reporters: Vec<Box<dyn Reporter>> = vec![
        Box::new(DataReporter::new(artifact_dir)),
        Box::new(PlotReporter::new(artifact_dir)),
        Box::new(HtmlReporter::new(artifact_dir)),
        Box::new(MarkdownReporter::new(artifact_dir)),
        Box::new(TableReporter),
    ];
    if format == OutputFormat::Csv {
        reporters.push(Box::new(CsvReporter::new(artifact_dir.join("summary.csv"))));
    }
    reporters
}

/// Run every reporter; fails only when none of them succeeded.
pub fn write_all(report: &Report<'_>, artifact_dir: &Path, format: OutputFormat) -> Result<()> {
    std::fs::create_dir_all(artifact_dir)?;
    let reporters = reporters(artifact_dir, format);
    let mut failed = 0;
    for reporter in &reporters {
        if let Err(e) = reporter.report(report) {
            warn!(reporter = reporter.name(), error = %e, "Reporter failed");
            failed += 1;
        }
    }
    if failed == reporters.len() {
        bail!("all {failed} reporters failed");
    }
    info!(dir = %artifact_dir.display(), "Reports written");
    Ok(())
}

/// `(metric, value)` pairs of the run summary, in display order.
pub fn summary_rows(report: &Report<'_>) -> Vec<(&'static str, String)> {
    let options = report.options;
    let stats = report.statistics;
    let (peak_cpu, peak_memory) = peaks(report.samples);
    vec![
        ("Image", options.image.clone()),
        ("Collector config", describe_config(options)),
        ("Payload source", format!("{:?}", options.payload_source).to_lowercase()),
        ("Stressors", options.tot_stressors.to_string()),
        ("Lines per second", options.lines_per_sec.to_string()),
        ("Message size", format_bytes(stats.msg_size as u64)),
        ("Run duration", format!("{:.2}s", stats.elapsed.as_secs_f64())),
        ("Expected lines", format_number(options.expected_lines())),
        ("Collected lines", format_number(stats.total_collected() as u64)),
        ("Throughput", format!("{:.2} lines/s", stats.throughput())),
        ("Mean latency", format!("{:.3}s", stats.mean())),
        ("Min latency", format!("{:.3}s", stats.min())),
        ("Median latency", format!("{:.3}s", stats.median())),
        ("Max latency", format!("{:.3}s", stats.max())),
        ("Mean bloat", format!("{:.3}", stats.mean_bloat())),
        ("Peak CPU", format!("{peak_cpu:.3} cores")),
        ("Peak memory", format_bytes(peak_memory as u64)),
    ]
}

/// One row of the per-stream loss table.
#[derive(Debug, Clone, PartialEq, Tabled)]
pub struct LossRow {
    #[tabled(rename = "Stream")]
    pub stream: String,
    #[tabled(rename = "Min Seq")]
    pub min_seq: u64,
    #[tabled(rename = "Max Seq")]
    pub max_seq: u64,
    #[tabled(rename = "Range")]
    pub range: u64,
    #[tabled(rename = "Collected")]
    pub collected: usize,
    #[tabled(rename = "Collected %")]
    pub percent: String,
}

impl LossRow {
    pub const HEADERS: [&'static str; 6] =
        ["Stream", "Min Seq", "Max Seq", "Range", "Collected", "Collected %"];

    pub fn cells(&self) -> [String; 6] {
        [
            self.stream.clone(),
            self.min_seq.to_string(),
            self.max_seq.to_string(),
            self.range.to_string(),
            self.collected.to_string(),
            self.percent.clone(),
        ]
    }
}

pub fn loss_rows(stats: &Statistics) -> Vec<LossRow> {
    stats
        .losses
        .values()
        .map(|loss| LossRow {
            stream: loss.stream.clone(),
            min_seq: loss.min_seq,
            max_seq: loss.max_seq,
            range: loss.range(),
            collected: loss.collected,
            percent: format!("{:.2}", loss.percent_collected()),
        })
        .collect()
}

fn describe_config(options: &Options) -> String {
    match options.collector_config_source() {
        CollectorConfigSource::Generated => "generated".to_string(),
        CollectorConfigSource::Baseline => "baseline".to_string(),
        CollectorConfigSource::Stdin => "stdin".to_string(),
        CollectorConfigSource::File(path) => path.display().to_string(),
    }
}

/// Highest CPU (cores) and memory (bytes) over the samples.
fn peaks(samples: &[Sample]) -> (f64, f64) {
    samples.iter().fold((0.0, 0.0), |(cpu, mem), sample| {
        (
            sample.cpu().map_or(cpu, |c| c.max(cpu)),
            sample.memory().map_or(mem, |m| m.max(mem)),
        )
    })
}

/// Format number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

/// Format bytes with units (KB, MB, GB)
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let bytes_f = bytes as f64;

    if bytes_f >= GB {
        format!("{:.2} GB", bytes_f / GB)
    } else if bytes_f >= MB {
        format!("{:.2} MB", bytes_f / MB)
    } else if bytes_f >= KB {
        format!("{:.2} KB", bytes_f / KB)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use clap::Parser;

    use super::*;
    use crate::stats::PerfLog;

    pub(crate) fn options() -> Options {
        Options::try_parse_from([
            "functional-benchmarker",
            "--image",
            "collector:<test>",
            "--lines-per-sec",
            "2",
            "--run-duration",
            "10s",
        ])
        .unwrap()
    }

    pub(crate) fn statistics() -> Statistics {
        let logs = [(2, 1.0), (3, 1.5), (4, 2.0), (10, 0.5)]
            .into_iter()
            .map(|(seq, latency)| PerfLog {
                stream: "functional.0.ABC".into(),
                sequence_id: seq,
                epoch_in: 100.0,
                epoch_out: 100.0 + latency,
                bloat: 2.0,
            })
            .collect();
        Statistics::new(logs, 1024, Duration::from_secs(10))
    }

    pub(crate) fn samples() -> Vec<Sample> {
        vec![
            Sample {
                time_unix_seconds: 1000,
                cpu_cores: "250m".into(),
                memory_bytes: "64Mi".into(),
            },
            Sample {
                time_unix_seconds: 1030,
                cpu_cores: "500m".into(),
                memory_bytes: "96Mi".into(),
            },
        ]
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(96 * 1024 * 1024), "96.00 MB");
    }

    #[test]
    fn test_summary_rows() {
        let (options, stats, samples) = (options(), statistics(), samples());
        let report = Report {
            options: &options,
            samples: &samples,
            statistics: &stats,
        };
        let rows: BTreeMap<_, _> = summary_rows(&report).into_iter().collect();
        assert_eq!(rows["Collected lines"], "4");
        assert_eq!(rows["Expected lines"], "20");
        assert_eq!(rows["Median latency"], "1.500s");
        assert_eq!(rows["Peak CPU"], "0.500 cores");
        assert_eq!(rows["Peak memory"], "96.00 MB");
        assert_eq!(rows["Collector config"], "generated");
    }

    #[test]
    fn test_loss_rows() {
        let rows = loss_rows(&statistics());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].range, 8);
        assert_eq!(rows[0].percent, "50.00");
    }
}

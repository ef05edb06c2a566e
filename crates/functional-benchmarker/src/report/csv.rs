use std::fs::File;
use std::path::PathBuf;

use anyhow::Result;
use ::csv::Writer;
use chrono::Utc;

use super::{Report, Reporter};

/// CSV reporter
pub struct CsvReporter {
    path: PathBuf,
}

impl CsvReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Reporter for CsvReporter {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn report(&self, report: &Report<'_>) -> Result<()> {
        let file = File::create(&self.path)?;
        let mut writer = Writer::from_writer(file);
        write_summary(&mut writer, report)?;
        writer.flush()?;
        Ok(())
    }
}

fn write_summary<W: std::io::Write>(writer: &mut Writer<W>, report: &Report<'_>) -> Result<()> {
    let options = report.options;
    let stats = report.statistics;

    // Write header
    writer.write_record([
        "timestamp",
        "image",
        "payload_source",
        "stressors",
        "lines_per_sec",
        "message_size",
        "duration_secs",
        "expected_lines",
        "collected_lines",
        "throughput_lines_per_sec",
        "latency_mean_s",
        "latency_min_s",
        "latency_median_s",
        "latency_max_s",
        "mean_bloat",
        "samples",
    ])?;

    // Write data
    writer.write_record([
        Utc::now().to_rfc3339(),
        options.image.clone(),
        format!("{:?}", options.payload_source).to_lowercase(),
        options.tot_stressors.to_string(),
        options.lines_per_sec.to_string(),
        stats.msg_size.to_string(),
        stats.elapsed.as_secs_f64().to_string(),
        options.expected_lines().to_string(),
        stats.total_collected().to_string(),
        stats.throughput().to_string(),
        stats.mean().to_string(),
        stats.min().to_string(),
        stats.median().to_string(),
        stats.max().to_string(),
        stats.mean_bloat().to_string(),
        report.samples.len().to_string(),
    ])?;
    Ok(())
}

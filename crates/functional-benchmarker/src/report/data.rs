//! Plot-ready `"x y"` series.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{Report, Reporter};
use crate::sampler::Sample;
use crate::stats::Statistics;

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

type Lines<'a> = Box<dyn Iterator<Item = String> + 'a>;

/// File name and lines of every data series of `report`, in name order.
fn series<'a>(report: &Report<'a>) -> Vec<(String, Lines<'a>)> {
    let (cpu, memory) = resource_series(report.samples);
    let mut files: Vec<(String, Lines<'a>)> = vec![
        ("cpu.data".to_string(), Box::new(std::iter::once(cpu))),
        ("mem.data".to_string(), Box::new(std::iter::once(memory))),
        (
            "latency.data".to_string(),
            Box::new(std::iter::once(latency_series(report.statistics))),
        ),
    ];
    let stats: &'a Statistics = report.statistics;
    for (stream, loss) in &stats.losses {
        let lines = loss.loss_curve().map(|(seq, lost)| format!("{seq} {lost}\n"));
        files.push((format!("{stream}-loss.data"), Box::new(lines)));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

/// Names of the files [`DataReporter`] writes.
pub fn data_file_names(report: &Report<'_>) -> Vec<String> {
    series(report).into_iter().map(|(name, _)| name).collect()
}

/// File name to contents for every data series of `report`.
///
/// Pure function of its input: identical statistics give identical files.
pub fn data_files(report: &Report<'_>) -> BTreeMap<String, String> {
    series(report)
        .into_iter()
        .map(|(name, lines)| (name, lines.collect()))
        .collect()
}

/// CPU (cores) and memory (megabytes) against minutes since the first sample.
pub(crate) fn resource_points(samples: &[Sample]) -> (Vec<(f64, f64)>, Vec<(f64, f64)>) {
    let Some(start) = samples.first().map(|s| s.time_unix_seconds) else {
        return (Vec::new(), Vec::new());
    };
    let mut cpu = Vec::new();
    let mut memory = Vec::new();
    for sample in samples {
        let minutes = (sample.time_unix_seconds - start) as f64 / 60.0;
        match (sample.cpu(), sample.memory()) {
            (Ok(cores), Ok(bytes)) => {
                cpu.push((minutes, cores));
                memory.push((minutes, bytes / BYTES_PER_MEGABYTE));
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(time = sample.time_unix_seconds, error = %e, "Skipping unparseable sample")
            }
        }
    }
    (cpu, memory)
}

fn resource_series(samples: &[Sample]) -> (String, String) {
    let (cpu, memory) = resource_points(samples);
    let render = |points: Vec<(f64, f64)>| -> String {
        points.iter().map(|(x, y)| format!("{x} {y}\n")).collect()
    };
    (render(cpu), render(memory))
}

/// Latency of every line, ordered by stream then sequence id.
fn latency_series(stats: &Statistics) -> String {
    let mut logs: Vec<_> = stats.logs.iter().collect();
    logs.sort_by(|a, b| (&a.stream, a.sequence_id).cmp(&(&b.stream, b.sequence_id)));
    logs.iter()
        .enumerate()
        .map(|(i, log)| format!("{i} {}\n", log.elapsed()))
        .collect()
}

/// Streams every data series into the artifact directory.
pub struct DataReporter {
    dir: PathBuf,
}

impl DataReporter {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

impl Reporter for DataReporter {
    fn name(&self) -> &'static str {
        "data"
    }

    fn report(&self, report: &Report<'_>) -> Result<()> {
        for (name, lines) in series(report) {
            let path = self.dir.join(&name);
            write_lines(&path, lines).with_context(|| format!("writing {}", path.display()))?;
            debug!(file = %path.display(), "Wrote data series");
        }
        Ok(())
    }
}

fn write_lines(path: &Path, lines: Lines<'_>) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for line in lines {
        out.write_all(line.as_bytes())?;
    }
    out.flush()
}

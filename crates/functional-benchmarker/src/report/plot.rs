//! SVG charts of a run: collector CPU and memory over time, per-stream latency
//! with a least-squares trend line, and the share of each stream collected.

use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use plotters::coord::Shift;
use plotters::prelude::*;
use tracing::debug;

use super::data::resource_points;
use super::{Report, Reporter};
use crate::stats::Statistics;

const SIZE: (u32, u32) = (768, 576);

/// One line on a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub label: String,
    pub points: Vec<(f64, f64)>,
    /// Also draw the least-squares fit of `points`.
    pub trend: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub title: &'static str,
    pub x_desc: &'static str,
    pub y_desc: &'static str,
    pub series: Vec<Series>,
}

impl Chart {
    fn single(
        title: &'static str,
        x_desc: &'static str,
        y_desc: &'static str,
        label: &str,
        points: Vec<(f64, f64)>,
    ) -> Self {
        Chart {
            title,
            x_desc,
            y_desc,
            series: vec![Series {
                label: label.to_string(),
                points,
                trend: false,
            }],
        }
    }

    fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.points.is_empty())
    }
}

/// File name to chart for every plot of `report` that has data.
pub fn charts(report: &Report<'_>) -> BTreeMap<String, Chart> {
    let (cpu, memory) = resource_points(report.samples);
    let mut charts = BTreeMap::new();
    charts.insert("cpu.svg".to_string(), Chart::single("CPU", "Time (m)", "Cores", "CPU", cpu));
    charts.insert("mem.svg".to_string(), Chart::single("Mem", "Time (m)", "Megabytes", "Mem", memory));
    charts.insert(
        "latency.svg".to_string(),
        Chart {
            title: "Latency",
            x_desc: "Message",
            y_desc: "Seconds",
            series: latency_series(report.statistics),
        },
    );
    for (stream, loss) in &report.statistics.losses {
        let points = loss
            .loss_steps()
            .into_iter()
            .map(|(id, lost)| {
                let expected = (id - loss.min_seq + 1) as f64;
                (id as f64, (expected - lost as f64) / expected * 100.0)
            })
            .collect();
        charts.insert(
            format!("{stream}-loss.svg"),
            Chart::single("Percent collected", "Sequence id", "Percent", stream, points),
        );
    }
    charts.retain(|_, chart| !chart.is_empty());
    charts
}

/// Names of the image files [`PlotReporter`] writes for `report`.
pub fn plot_names(report: &Report<'_>) -> Vec<String> {
    charts(report).into_keys().collect()
}

/// Latency of each line in sequence order, one series per stream.
fn latency_series(stats: &Statistics) -> Vec<Series> {
    let mut by_stream: BTreeMap<&str, Vec<(u64, f64)>> = BTreeMap::new();
    for log in &stats.logs {
        by_stream
            .entry(log.stream.as_str())
            .or_default()
            .push((log.sequence_id, log.elapsed()));
    }
    by_stream
        .into_iter()
        .map(|(stream, mut lines)| {
            lines.sort_by_key(|(seq, _)| *seq);
            Series {
                label: stream.to_string(),
                points: lines
                    .into_iter()
                    .enumerate()
                    .map(|(i, (_, elapsed))| (i as f64, elapsed))
                    .collect(),
                trend: true,
            }
        })
        .collect()
}

/// Ordinary least-squares `(slope, intercept)`; `None` unless at least two
/// distinct x values are present.
pub fn linear_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some((slope, mean_y - slope * mean_x))
}

/// Axis ranges covering every point; y always includes zero.
fn bounds(series: &[Series]) -> (Range<f64>, Range<f64>) {
    let points = series.iter().flat_map(|s| s.points.iter());
    let (mut x0, mut x1, mut y0, mut y1) = (f64::MAX, f64::MIN, 0.0_f64, f64::MIN);
    for &(x, y) in points {
        x0 = x0.min(x);
        x1 = x1.max(x);
        y0 = y0.min(y);
        y1 = y1.max(y);
    }
    if x1 <= x0 {
        x1 = x0 + 1.0;
    }
    if y1 <= y0 {
        y1 = y0 + 1.0;
    }
    (x0..x1, y0..y1 * 1.05)
}

fn draw<DB: DrawingBackend>(
    chart: &Chart,
    root: DrawingArea<DB, Shift>,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    root.fill(&WHITE)?;
    let (x_range, y_range) = bounds(&chart.series);
    let mut ctx = ChartBuilder::on(&root)
        .caption(chart.title, ("sans-serif", 24))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range.clone(), y_range)?;
    ctx.configure_mesh()
        .x_desc(chart.x_desc)
        .y_desc(chart.y_desc)
        .draw()?;

    for (i, series) in chart.series.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        ctx.draw_series(LineSeries::new(series.points.iter().copied(), color.stroke_width(2)))?
            .label(series.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));

        let fit = if series.trend { linear_fit(&series.points) } else { None };
        if let Some((slope, intercept)) = fit {
            let trend = color.mix(0.5);
            let line = [x_range.start, x_range.end].map(|x| (x, slope * x + intercept));
            ctx.draw_series(LineSeries::new(line, trend.stroke_width(1)))?
                .label(format!("{} trend", series.label))
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], trend.stroke_width(1)));
        }
    }

    ctx.configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()
}

/// Render `chart` as a standalone SVG document.
pub fn render_svg(chart: &Chart) -> Result<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, SIZE).into_drawing_area();
        draw(chart, root).map_err(|e| anyhow!("drawing {}: {e}", chart.title))?;
    }
    Ok(svg)
}

/// Writes [`charts`] into the artifact directory.
pub struct PlotReporter {
    dir: PathBuf,
}

impl PlotReporter {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }
}

impl Reporter for PlotReporter {
    fn name(&self) -> &'static str {
        "plot"
    }

    fn report(&self, report: &Report<'_>) -> Result<()> {
        for (name, chart) in charts(report) {
            let path = self.dir.join(&name);
            fs::write(&path, render_svg(&chart)?).with_context(|| format!("writing {}", path.display()))?;
            debug!(file = %path.display(), "Wrote plot");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::{options, samples, statistics};

    #[test]
    fn test_linear_fit() {
        let (slope, intercept) = linear_fit(&[(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)]).unwrap();
        assert!((slope - 2.0).abs() < 1e-12);
        assert!((intercept - 1.0).abs() < 1e-12);

        assert_eq!(linear_fit(&[]), None);
        assert_eq!(linear_fit(&[(1.0, 4.0)]), None);
        assert_eq!(linear_fit(&[(1.0, 4.0), (1.0, 6.0)]), None);
    }

    #[test]
    fn test_charts() {
        let (options, stats, samples) = (options(), statistics(), samples());
        let report = Report {
            options: &options,
            samples: &samples,
            statistics: &stats,
        };
        let charts = charts(&report);
        assert_eq!(
            charts.keys().collect::<Vec<_>>(),
            vec!["cpu.svg", "functional.0.ABC-loss.svg", "latency.svg", "mem.svg"]
        );
        assert_eq!(charts["cpu.svg"].series[0].points, vec![(0.0, 0.25), (0.5, 0.5)]);

        let latency = &charts["latency.svg"].series;
        assert_eq!(latency.len(), 1);
        assert!(latency[0].trend);
        assert_eq!(latency[0].points, vec![(0.0, 1.0), (1.0, 1.5), (2.0, 2.0), (3.0, 0.5)]);

        // Ids 2, 3, 4 and 10 received out of 2..=10.
        let collected = &charts["functional.0.ABC-loss.svg"].series[0].points;
        assert_eq!(collected.first(), Some(&(2.0, 100.0)));
        assert_eq!(collected[3], (5.0, 75.0));
        assert_eq!(collected.last().map(|p| p.0), Some(10.0));
        assert!((collected.last().unwrap().1 - 400.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_run_has_no_charts() {
        let options = options();
        let stats = Statistics::default();
        let report = Report {
            options: &options,
            samples: &[],
            statistics: &stats,
        };
        assert!(plot_names(&report).is_empty());
    }

    #[test]
    fn test_render_svg() {
        let chart = Chart {
            title: "Latency",
            x_desc: "Message",
            y_desc: "Seconds",
            series: vec![Series {
                label: "functional.0.ABC".into(),
                points: vec![(0.0, 1.0), (1.0, 1.5), (2.0, 2.0)],
                trend: true,
            }],
        };
        let svg = render_svg(&chart).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(svg.contains("Latency"));
        assert!(svg.contains("functional.0.ABC trend"));

        // A single point still gets a non-degenerate plotting area.
        let single = Chart::single("CPU", "Time (m)", "Cores", "CPU", vec![(0.0, 0.0)]);
        assert!(render_svg(&single).unwrap().contains("CPU"));
    }
}

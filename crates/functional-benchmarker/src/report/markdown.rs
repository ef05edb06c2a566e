use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{loss_rows, summary_rows, LossRow, Report, Reporter};

pub const FILE_NAME: &str = "README.md";

/// Free text goes into fenced blocks; table cells only ever hold numbers and
/// stream ids, which cannot contain a pipe.
pub fn render_markdown(report: &Report<'_>) -> String {
    let mut md = String::from("# Functional benchmark\n\n## Summary\n\n```\n");
    let rows = summary_rows(report);
    let width = rows.iter().map(|(metric, _)| metric.len()).max().unwrap_or(0);
    for (metric, value) in rows {
        let _ = writeln!(md, "{metric:<width$}  {value}");
    }
    md.push_str("```\n\n## Loss\n\n");

    let _ = writeln!(md, "| {} |", LossRow::HEADERS.join(" | "));
    let _ = writeln!(md, "|{}", "---|".repeat(LossRow::HEADERS.len()));
    for row in loss_rows(report.statistics) {
        let _ = writeln!(md, "| {} |", row.cells().join(" | "));
    }

    md.push_str("\n## Plots\n\n");
    for name in super::plot_names(report) {
        let _ = writeln!(md, "![{name}]({name})\n");
    }

    md.push_str("## Data\n\n");
    for name in super::data_file_names(report) {
        let _ = writeln!(md, "* [{name}]({name})");
    }
    md
}

pub struct MarkdownReporter {
    path: PathBuf,
}

impl MarkdownReporter {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(FILE_NAME),
        }
    }
}

impl Reporter for MarkdownReporter {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn report(&self, report: &Report<'_>) -> Result<()> {
        fs::write(&self.path, render_markdown(report))
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

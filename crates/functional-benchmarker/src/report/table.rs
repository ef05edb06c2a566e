use anyhow::Result;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::{loss_rows, summary_rows, Report, Reporter};

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "METRIC")]
    metric: &'static str,
    #[tabled(rename = "VALUE")]
    value: String,
}

/// Summary and loss tables as printed to stdout.
pub fn render_table(report: &Report<'_>) -> String {
    let summary = summary_rows(report)
        .into_iter()
        .map(|(metric, value)| SummaryRow { metric, value });
    let mut out = Table::new(summary).with(Style::ascii()).to_string();
    out.push('\n');

    let losses = loss_rows(report.statistics);
    if !losses.is_empty() {
        out.push('\n');
        out.push_str(&Table::new(losses).with(Style::ascii()).to_string());
        out.push('\n');
    }
    out
}

/// Prints the summary to stdout.
pub struct TableReporter;

impl Reporter for TableReporter {
    fn name(&self) -> &'static str {
        "table"
    }

    fn report(&self, report: &Report<'_>) -> Result<()> {
        println!("\n{}", render_table(report));
        Ok(())
    }
}

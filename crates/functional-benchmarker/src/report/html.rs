use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{loss_rows, summary_rows, LossRow, Report, Reporter};

pub const FILE_NAME: &str = "index.html";

/// Escape text for use in HTML element content and attribute values.
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

pub fn render_html(report: &Report<'_>) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Functional benchmark</title>\n</head>\n<body>\n<h1>Functional benchmark</h1>\n",
    );

    html.push_str("<h2>Summary</h2>\n<table>\n");
    for (metric, value) in summary_rows(report) {
        let _ = writeln!(html, "<tr><th>{}</th><td>{}</td></tr>", escape(metric), escape(&value));
    }
    html.push_str("</table>\n");

    html.push_str("<h2>Loss</h2>\n<table>\n<tr>");
    for header in LossRow::HEADERS {
        let _ = write!(html, "<th>{}</th>", escape(header));
    }
    html.push_str("</tr>\n");
    for row in loss_rows(report.statistics) {
        html.push_str("<tr>");
        for cell in row.cells() {
            let _ = write!(html, "<td>{}</td>", escape(&cell));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>\n");

    html.push_str("<h2>Plots</h2>\n");
    for name in super::plot_names(report) {
        let _ = writeln!(html, "<p><img src=\"{0}\" alt=\"{0}\"></p>", escape(&name));
    }

    html.push_str("<h2>Data</h2>\n<ul>\n");
    for name in super::data_file_names(report) {
        let _ = writeln!(html, "<li><a href=\"{0}\">{0}</a></li>", escape(&name));
    }
    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

pub struct HtmlReporter {
    path: PathBuf,
}

impl HtmlReporter {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(FILE_NAME),
        }
    }
}

impl Reporter for HtmlReporter {
    fn name(&self) -> &'static str {
        "html"
    }

    fn report(&self, report: &Report<'_>) -> Result<()> {
        fs::write(&self.path, render_html(report))
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

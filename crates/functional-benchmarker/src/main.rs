//! Functional benchmark harness for the log collector.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use functional_benchmarker::config::Options;
use functional_benchmarker::report::{self, Report};
use functional_benchmarker::runner::{self, ClusterRunner};
use logging_operator::telemetry;

#[tokio::main]
async fn main() {
    // Option errors exit 1; --help and --version exit 0.
    let options = Options::try_parse().unwrap_or_else(|e| {
        let code = if e.use_stderr() { 1 } else { 0 };
        let _ = e.print();
        std::process::exit(code);
    });
    telemetry::init(&options.log_level);
    if let Err(e) = options.validate() {
        error!("{e}");
        std::process::exit(1);
    }

    if let Err(e) = run(options).await {
        error!("Benchmark failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(options: Options) -> Result<()> {
    info!(
        image = %options.image,
        stressors = options.tot_stressors,
        lines_per_sec = options.lines_per_sec,
        size = options.size,
        duration = ?options.run_duration,
        "Starting functional benchmark"
    );

    let client = kube::Client::try_default().await?;
    let artifact_dir = options.resolved_artifact_dir();

    let mut cluster = ClusterRunner::new(client, options.clone())?;
    info!(namespace = %cluster.namespace(), "Deploying benchmark workloads");

    let outcome = runner::execute(&options, &mut cluster).await?;
    report::write_all(
        &Report {
            options: &options,
            samples: &outcome.samples,
            statistics: &outcome.statistics,
        },
        &artifact_dir,
        options.output,
    )?;
    info!(dir = %artifact_dir.display(), "Benchmark complete");
    Ok(())
}

//! Benchmark load driver.
//!
//! [`execute`] deploys the workloads, samples the collector while load runs,
//! reads back what the receiver got and correlates it into [`Statistics`].

pub mod cluster;
pub mod workload;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Options;
use crate::error::Result;
use crate::sampler::{self, Sample, SampleSource};
use crate::stats::{self, Statistics};

pub use cluster::ClusterRunner;

/// Deploys and tears down the collector, stressors and receiver.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn deploy(&mut self) -> Result<()>;

    /// Everything the receiver got so far, one entry per line. Fails with
    /// `ReadTimeout` when the receiver does not answer within `deadline`.
    async fn read_application_logs(&self, deadline: Duration) -> Result<Vec<String>>;

    async fn cleanup(&self) -> Result<()>;

    /// Where the sampler reads collector usage from.
    fn sample_source(&self) -> Arc<dyn SampleSource>;
}

/// Output of one benchmark run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub samples: Vec<Sample>,
    pub statistics: Statistics,
}

/// Run one benchmark against `runner`.
///
/// Workloads are torn down afterwards when `do_cleanup` is set, whether or not
/// the run succeeded.
pub async fn execute(options: &Options, runner: &mut dyn Runner) -> Result<RunOutcome> {
    let result = match runner.deploy().await {
        Ok(()) => measure(options, &*runner).await,
        Err(e) => Err(e),
    };

    if options.do_cleanup {
        if let Err(e) = runner.cleanup().await {
            warn!(error = %e, "Failed to clean up benchmark workloads");
        }
    } else {
        info!("Leaving benchmark workloads in place");
    }
    result
}

async fn measure(options: &Options, runner: &dyn Runner) -> Result<RunOutcome> {
    let stop = CancellationToken::new();
    let source = runner.sample_source();
    let period = options.sample_duration;
    let sampler = tokio::spawn({
        let stop = stop.clone();
        async move { sampler::run(source.as_ref(), period, stop).await }
    });

    info!(duration = ?options.run_duration, "Generating load");
    let started = Instant::now();
    sleep(options.run_duration).await;
    let elapsed = started.elapsed();
    stop.cancel();

    let samples = match sampler.await {
        Ok(samples) => samples,
        Err(e) => {
            warn!(error = %e, "Sampler task failed");
            Vec::new()
        }
    };

    let lines = runner.read_application_logs(options.read_timeout).await?;
    info!(lines = lines.len(), samples = samples.len(), "Load phase finished");
    let statistics = stats::analyze(lines.iter().map(String::as_str), options.size, elapsed)?;
    Ok(RunOutcome {
        samples,
        statistics,
    })
}

//! Closed-loop functional benchmark of the log collector.
//!
//! Deploys the collector next to log stressors and a receiver, samples the
//! collector's resource usage while load runs, correlates the received lines
//! by stream and sequence id, and reports latency, loss and usage.

pub mod config;
pub mod error;
pub mod report;
pub mod runner;
pub mod sampler;
pub mod stats;

pub use error::{BenchmarkError, Result};

//! Collector configuration rendering.
//!
//! [`generate`] maps a sanitized forwarder spec to the collector's
//! configuration text. Output is deterministic: the same spec always renders
//! byte-identical text, so the collector ConfigMap only changes when the
//! routing does.

mod directive;
pub mod fluentbit;
pub mod fluentd;

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::constants::keys;
use crate::crds::cluster_logging::CollectorType;
use crate::crds::ClusterLogForwarderSpec;

pub use directive::Directive;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("unsupported collector kind: {0}")]
    UnsupportedKind(CollectorKind),

    #[error("output {output:?} has unsupported type {type_:?}")]
    UnsupportedOutputType { output: String, type_: String },

    #[error("output {output:?} has an invalid endpoint: {message}")]
    InvalidEndpoint { output: String, message: String },

    #[error("pipeline {pipeline:?} references unknown {what} {name:?}")]
    UnknownReference {
        pipeline: String,
        what: &'static str,
        name: String,
    },
}

/// Collector implementation the configuration is rendered for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    Fluentd,
    FluentBit,
}

impl CollectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorKind::Fluentd => "fluentd",
            CollectorKind::FluentBit => "fluentbit",
        }
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CollectorType> for CollectorKind {
    fn from(value: CollectorType) -> Self {
        match value {
            CollectorType::Fluentd => CollectorKind::Fluentd,
            CollectorType::Fluentbit => CollectorKind::FluentBit,
        }
    }
}

/// Where fluentd reads its records from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Ingest {
    /// Tail node log files and the journal directly.
    #[default]
    Tail,
    /// Accept records forwarded by fluent-bit on `port`.
    Forward { port: i32 },
}

/// Render the collector configuration for `spec`.
///
/// `namespace` is where the logging components run; their own container logs
/// are excluded from collection.
pub fn generate(
    spec: &ClusterLogForwarderSpec,
    kind: CollectorKind,
    namespace: &str,
) -> Result<String, GenerateError> {
    generate_with(spec, kind, namespace, Ingest::Tail)
}

pub fn generate_with(
    spec: &ClusterLogForwarderSpec,
    kind: CollectorKind,
    namespace: &str,
    ingest: Ingest,
) -> Result<String, GenerateError> {
    match kind {
        CollectorKind::Fluentd => fluentd::generate_with(spec, namespace, ingest),
        other => Err(GenerateError::UnsupportedKind(other)),
    }
}

/// Contents of the collector ConfigMap: the configuration and the run script.
pub fn collector_files(
    spec: &ClusterLogForwarderSpec,
    kind: CollectorKind,
    namespace: &str,
    ingest: Ingest,
) -> Result<BTreeMap<String, String>, GenerateError> {
    let conf = generate_with(spec, kind, namespace, ingest)?;
    Ok(BTreeMap::from([
        (keys::FLUENT_CONF.to_string(), conf),
        (keys::RUN_SCRIPT.to_string(), fluentd::RUN_SCRIPT.to_string()),
    ]))
}

//! Kubernetes operator for the cluster logging subsystem.
//!
//! Reconciles the `ClusterLogging` singleton and its `ClusterLogForwarder`:
//! issues the logging CA and component certificates, validates the forwarder
//! spec, renders the collector configuration and deploys the collector
//! workloads of the selected forwarding topology.

pub mod certs;
pub mod conditions;
pub mod config;
pub mod constants;
pub mod controllers;
pub mod crds;
pub mod error;
pub mod forwarder;
pub mod generator;
pub mod metrics;
pub mod reconciler;
pub mod resources;
pub mod store;
pub mod telemetry;
pub mod topology;

pub use crds::{ClusterLogForwarder, ClusterLogging};
pub use error::{OperatorError, Result};

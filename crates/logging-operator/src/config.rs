//! Operator command line, with environment fallbacks.

use std::time::Duration;

use clap::Parser;

use crate::certs::KeyPolicy;
use crate::constants::{certs, defaults};
use crate::error::{OperatorError, Result};
use crate::reconciler::ReconcilerConfig;
use crate::store::RetryConfig;
use crate::topology::Images;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "logging-operator",
    about = "Reconciles ClusterLogging and ClusterLogForwarder resources",
    version
)]
pub struct OperatorConfig {
    /// Namespace holding the ClusterLogging instance and its workloads
    #[arg(long, env = "WATCH_NAMESPACE", default_value = defaults::NAMESPACE)]
    pub namespace: String,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = defaults::LOG_LEVEL)]
    pub log_level: String,

    /// Listen address of the metrics and health endpoints
    #[arg(long, env = "METRICS_ADDR", default_value = defaults::METRICS_ADDR)]
    pub metrics_addr: String,

    /// RSA key size of a newly generated CA
    #[arg(long, env = "CA_KEY_BITS", default_value_t = certs::CA_KEY_BITS)]
    pub ca_key_bits: usize,

    /// RSA key size of newly issued component certificates
    #[arg(long, env = "CERT_KEY_BITS", default_value_t = certs::COMPONENT_KEY_BITS)]
    pub cert_key_bits: usize,

    /// Requeue interval of a healthy instance, in seconds
    #[arg(long, env = "REQUEUE_SECS", default_value_t = defaults::REQUEUE_HEALTHY_SECS)]
    pub requeue_secs: u64,

    /// fluentd image
    #[arg(long, env = "FLUENTD_IMAGE", default_value = defaults::COLLECTOR_IMAGE)]
    pub fluentd_image: String,

    /// fluent-bit image
    #[arg(long, env = "FLUENTBIT_IMAGE", default_value = defaults::FLUENTBIT_IMAGE)]
    pub fluentbit_image: String,
}

impl OperatorConfig {
    /// Reject settings the reconciler cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(OperatorError::Config("namespace must not be empty".into()));
        }
        for (flag, bits) in [
            ("--ca-key-bits", self.ca_key_bits),
            ("--cert-key-bits", self.cert_key_bits),
        ] {
            if !(2048..=8192).contains(&bits) {
                return Err(OperatorError::Config(format!(
                    "{flag} must be between 2048 and 8192, got {bits}"
                )));
            }
        }
        if self.requeue_secs == 0 {
            return Err(OperatorError::Config("--requeue-secs must be positive".into()));
        }
        Ok(())
    }

    pub fn requeue(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            namespace: self.namespace.clone(),
            key_policy: KeyPolicy {
                ca_key_bits: self.ca_key_bits,
                component_key_bits: self.cert_key_bits,
            },
            retry: RetryConfig::default(),
            images: Images {
                fluentd: self.fluentd_image.clone(),
                fluentbit: self.fluentbit_image.clone(),
            },
        }
    }
}

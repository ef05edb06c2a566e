pub mod cluster_logging;
pub mod common;
pub mod defaults;
pub mod forwarder;

pub use cluster_logging::{ClusterLogging, ClusterLoggingSpec, ClusterLoggingStatus};
pub use forwarder::{
    ClusterLogForwarder, ClusterLogForwarderSpec, ClusterLogForwarderStatus, InputSpec,
    OutputSpec, PipelineSpec,
};

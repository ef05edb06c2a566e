/// Kubernetes label keys following the app.kubernetes.io convention.
pub mod labels {
    pub const NAME: &str = "app.kubernetes.io/name";
    pub const INSTANCE: &str = "app.kubernetes.io/instance";
    pub const COMPONENT: &str = "app.kubernetes.io/component";
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

    /// Label carried by every object this operator owns.
    pub const LOGGING_INFRA: &str = "logging-infra";
    pub const PROVIDER: &str = "provider";
}

/// Label values.
pub mod values {
    pub const APP_NAME: &str = "cluster-logging";
    pub const MANAGED_BY: &str = "cluster-logging-operator";
    pub const PROVIDER: &str = "openshift";
    pub const COMPONENT_COLLECTOR: &str = "collector";
    pub const COMPONENT_NORMALIZER: &str = "normalizer";
}

/// Annotation keys.
pub mod annotations {
    /// Selects the forwarding topology on a ClusterLogging resource.
    pub const TOPOLOGY: &str = "clusterlogging.openshift.io/logforwardingtopology";

    /// Hash of the desired spec of a workload, compared instead of the live spec.
    pub const CONTENT_HASH: &str = "logging.openshift.io/content-hash";

    /// Hash of the collector configuration, set on pod templates.
    pub const CONFIG_HASH: &str = "logging.openshift.io/config-hash";
}

/// Well-known object names.
pub mod names {
    pub const SINGLETON: &str = "instance";
    pub const CA_SECRET: &str = "master-certs";
    pub const COLLECTOR: &str = "fluentd";
    pub const COLLECTOR_SECRET: &str = "fluentd";
    pub const COLLECTOR_CONFIG: &str = "fluentd";
    pub const FLUENTBIT: &str = "fluentbit";
    pub const NORMALIZER: &str = "normalizer";
    pub const LOG_STORE: &str = "elasticsearch";

    /// Name of the output injected for the in-cluster log store.
    pub const DEFAULT_OUTPUT: &str = "default";
    pub const DEFAULT_OUTPUT_LEGACY: &str = "clo-default-output-es";
    pub const DEFAULT_APP_PIPELINE: &str = "clo-default-app-pipeline";
    pub const DEFAULT_INFRA_PIPELINE: &str = "clo-default-infra-pipeline";
}

/// Keys inside managed Secrets and ConfigMaps.
pub mod keys {
    pub const CA_CERT: &str = "ca.crt";
    pub const CA_KEY: &str = "ca.key";
    pub const CA_SERIAL: &str = "serial";
    pub const SHARED_KEY: &str = "shared_key";
    pub const FLUENT_CONF: &str = "fluent.conf";
    pub const RUN_SCRIPT: &str = "run.sh";
    pub const FLUENTBIT_CONF: &str = "fluent-bit.conf";
    pub const FLUENTBIT_PARSERS: &str = "parsers.conf";
    pub const FLUENTBIT_CONCAT: &str = "concat-crio.lua";
}

/// Filesystem locations inside the collector containers.
pub mod paths {
    pub const SECRETS_DIR: &str = "/var/run/ocp-collector/secrets";
    pub const BUFFER_DIR: &str = "/var/lib/fluentd";
    pub const FLUENTD_CONFIG_DIR: &str = "/etc/fluent/configs.d/user";
    pub const FLUENTBIT_CONFIG_DIR: &str = "/etc/fluent-bit";
    pub const CONTAINER_LOGS: &str = "/var/log";
    pub const METRICS_CERTS: &str = "/etc/fluent/metrics";
}

/// Default ports.
pub mod ports {
    pub const LOG_STORE: u16 = 9200;
    pub const FORWARD: u16 = 24224;
    pub const SYSLOG: u16 = 514;
    pub const COLLECTOR_METRICS: i32 = 24231;
    pub const NORMALIZER_FORWARD: i32 = 24224;
}

/// Certificate parameters.
pub mod certs {
    pub const SIGNER_NAME: &str = "openshift-cluster-logging-signer";
    pub const ORGANIZATION: &str = "Logging";
    pub const ORGANIZATIONAL_UNIT: &str = "OpenShift";
    pub const CA_KEY_BITS: usize = 4096;
    pub const COMPONENT_KEY_BITS: usize = 2048;
    pub const CA_VALIDITY_YEARS: i32 = 5;
    pub const COMPONENT_VALIDITY_YEARS: i32 = 2;
    pub const SESSION_KEY_BYTES: usize = 16;
}

/// Default resource values.
pub mod defaults {
    pub const NAMESPACE: &str = "openshift-logging";
    pub const COLLECTOR_IMAGE: &str = "quay.io/openshift/origin-logging-fluentd:latest";
    pub const FLUENTBIT_IMAGE: &str = "quay.io/openshift/origin-logging-fluent-bit:latest";
    pub const LOG_LEVEL: &str = "info";
    pub const METRICS_ADDR: &str = "0.0.0.0:8383";

    /// Requeue intervals in seconds.
    pub const REQUEUE_HEALTHY_SECS: u64 = 300;
    pub const REQUEUE_DEGRADED_SECS: u64 = 30;
    pub const REQUEUE_TRANSIENT_SECS: u64 = 15;
    pub const REQUEUE_PERMANENT_SECS: u64 = 300;
}

/// Finalizer name for topology cleanup.
pub const FINALIZER: &str = "logging.openshift.io/operator-cleanup";

/// CRD API group.
pub const API_GROUP: &str = "logging.openshift.io";

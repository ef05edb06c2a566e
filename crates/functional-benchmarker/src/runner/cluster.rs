//! [`Runner`] deploying the benchmark pod to a live cluster.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, LogParams, PostParams};
use kube::core::{ApiResource, DynamicObject, ErrorResponse, GroupVersionKind};
use kube::runtime::wait::{await_condition, conditions};
use kube::Client;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::workload::{self, COLLECTOR_CONTAINER, POD_NAME, RECEIVER_CONTAINER};
use super::Runner;
use crate::config::Options;
use crate::error::{BenchmarkError, Result};
use crate::sampler::{observed_now, Sample, SampleSource};

/// How long the benchmark pod may take to start.
const POD_START_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ClusterRunner {
    client: Client,
    options: Options,
    namespace: String,
    collector_config: String,
}

impl ClusterRunner {
    /// Resolves the namespace and reads or generates the collector
    /// configuration.
    pub fn new(client: Client, options: Options) -> Result<Self> {
        let namespace = options
            .namespace
            .clone()
            .unwrap_or_else(|| format!("functional-benchmark-{}", workload::stream_id().to_lowercase()));
        let collector_config = workload::collector_config(&options, &namespace)?;
        Ok(Self {
            client,
            options,
            namespace,
            collector_config,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create_namespace(&self) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                info!(namespace = %self.namespace, "Created benchmark namespace");
                Ok(())
            }
            Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => {
                debug!(namespace = %self.namespace, "Benchmark namespace already exists");
                Ok(())
            }
            Err(e) => Err(BenchmarkError::deploy("namespace", e)),
        }
    }

    async fn create_configmaps(&self) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        for configmap in [
            workload::collector_configmap(&self.namespace, &self.collector_config),
            workload::receiver_configmap(&self.namespace),
        ] {
            let name = configmap.metadata.name.clone().unwrap_or_default();
            api.create(&PostParams::default(), &configmap)
                .await
                .map_err(|e| BenchmarkError::deploy(format!("configmap {name}"), e))?;
            debug!(configmap = %name, "Created configmap");
        }
        Ok(())
    }

    async fn create_pod(&self) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let pod = workload::benchmark_pod(&self.options, &self.namespace)?;
        api.create(&PostParams::default(), &pod)
            .await
            .map_err(|e| BenchmarkError::deploy("pod", e))?;

        let running = await_condition(api, POD_NAME, conditions::is_pod_running());
        match timeout(POD_START_TIMEOUT, running).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BenchmarkError::deploy("pod", e)),
            Err(_) => Err(BenchmarkError::deploy(
                "pod",
                format!("not running after {POD_START_TIMEOUT:?}"),
            )),
        }
    }
}

#[async_trait]
impl Runner for ClusterRunner {
    async fn deploy(&mut self) -> Result<()> {
        self.create_namespace().await?;
        self.create_configmaps().await?;
        self.create_pod().await?;
        info!(
            namespace = %self.namespace,
            stressors = self.options.tot_stressors,
            "Benchmark pod is running"
        );
        Ok(())
    }

    async fn read_application_logs(&self, deadline: Duration) -> Result<Vec<String>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let params = LogParams {
            container: Some(RECEIVER_CONTAINER.to_string()),
            ..Default::default()
        };
        let logs = timeout(deadline, api.logs(POD_NAME, &params))
            .await
            .map_err(|_| BenchmarkError::ReadTimeout(deadline))??;
        let lines: Vec<String> = logs.lines().map(str::to_string).collect();
        debug!(lines = lines.len(), "Read receiver logs");
        Ok(lines)
    }

    async fn cleanup(&self) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(&self.namespace, &DeleteParams::background()).await {
            Ok(_) => {
                info!(namespace = %self.namespace, "Deleted benchmark namespace");
                Ok(())
            }
            Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn sample_source(&self) -> Arc<dyn SampleSource> {
        Arc::new(PodMetricsSource::new(self.client.clone(), &self.namespace))
    }
}

/// Reads the collector container's usage from `metrics.k8s.io`.
pub struct PodMetricsSource {
    api: Api<DynamicObject>,
}

impl PodMetricsSource {
    pub fn new(client: Client, namespace: &str) -> Self {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "pods");
        Self {
            api: Api::namespaced_with(client, namespace, &resource),
        }
    }
}

#[async_trait]
impl SampleSource for PodMetricsSource {
    async fn sample(&self) -> Result<Option<Sample>> {
        let Some(metrics) = self.api.get_opt(POD_NAME).await? else {
            return Ok(None);
        };
        let sample = container_usage(&metrics.data, COLLECTOR_CONTAINER);
        if sample.is_none() {
            warn!(container = COLLECTOR_CONTAINER, "No usage reported for collector container");
        }
        Ok(sample)
    }
}

/// Usage of `container` in a PodMetrics document.
fn container_usage(metrics: &Value, container: &str) -> Option<Sample> {
    let usage = metrics
        .get("containers")?
        .as_array()?
        .iter()
        .find(|c| c.get("name").and_then(Value::as_str) == Some(container))?
        .get("usage")?;
    Some(Sample {
        time_unix_seconds: observed_now(),
        cpu_cores: usage.get("cpu")?.as_str()?.to_string(),
        memory_bytes: usage.get("memory")?.as_str()?.to_string(),
    })
}

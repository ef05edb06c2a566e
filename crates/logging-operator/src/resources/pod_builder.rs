use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource, HostPathVolumeSource,
    ObjectFieldSelector, PodSpec, PodTemplateSpec, ResourceRequirements, SecretVolumeSource,
    Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;

/// Container definition shared by collector and normalizer workloads.
#[derive(Clone, Debug, Default)]
pub struct ContainerParams {
    pub name: String,
    pub image: String,
    pub command: Option<Vec<String>>,
    pub env: Vec<(String, String)>,
    /// Variables read from the pod's own fields, as (name, fieldPath).
    pub field_env: Vec<(String, String)>,
    pub ports: Vec<(String, i32)>,
    pub mounts: Vec<Mount>,
    pub resources: Option<ResourceRequirements>,
    pub privileged: bool,
}

/// A volume mount.
#[derive(Clone, Debug)]
pub struct Mount {
    pub volume: String,
    pub path: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(volume: &str, path: &str) -> Self {
        Self {
            volume: volume.into(),
            path: path.into(),
            read_only: true,
        }
    }

    pub fn read_write(volume: &str, path: &str) -> Self {
        Self {
            volume: volume.into(),
            path: path.into(),
            read_only: false,
        }
    }
}

pub fn build_container(params: ContainerParams) -> Container {
    let field_env = params.field_env.into_iter().map(|(name, path)| EnvVar {
        name,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".into()),
                field_path: path,
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    let env: Vec<EnvVar> = params
        .env
        .into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..Default::default()
        })
        .chain(field_env)
        .collect();
    let ports: Vec<ContainerPort> = params
        .ports
        .into_iter()
        .map(|(name, port)| ContainerPort {
            name: Some(name),
            container_port: port,
            protocol: Some("TCP".into()),
            ..Default::default()
        })
        .collect();
    let mounts: Vec<VolumeMount> = params
        .mounts
        .into_iter()
        .map(|m| VolumeMount {
            name: m.volume,
            mount_path: m.path,
            read_only: m.read_only.then_some(true),
            ..Default::default()
        })
        .collect();

    Container {
        name: params.name,
        image: Some(params.image),
        image_pull_policy: Some("IfNotPresent".into()),
        command: params.command,
        env: (!env.is_empty()).then_some(env),
        ports: (!ports.is_empty()).then_some(ports),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        resources: params.resources,
        security_context: params.privileged.then(|| {
            k8s_openapi::api::core::v1::SecurityContext {
                privileged: Some(true),
                ..Default::default()
            }
        }),
        ..Default::default()
    }
}

pub fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.into(),
        host_path: Some(HostPathVolumeSource {
            path: path.into(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.into(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

pub fn secret_volume(name: &str, secret: &str) -> Volume {
    Volume {
        name: name.into(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn config_map_volume(name: &str, config_map: &str) -> Result<Volume, serde_json::Error> {
    serde_json::from_value(json!({
        "name": name,
        "configMap": { "name": config_map },
    }))
}

/// Pod template selected by `labels`.
pub fn build_pod_template(
    labels: BTreeMap<String, String>,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
    node_selector: Option<BTreeMap<String, String>>,
    tolerations: Vec<Toleration>,
) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers,
            volumes: (!volumes.is_empty()).then_some(volumes),
            node_selector,
            tolerations: (!tolerations.is_empty()).then_some(tolerations),
            priority_class_name: Some("cluster-logging".into()),
            termination_grace_period_seconds: Some(10),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_container() {
        let container = build_container(ContainerParams {
            name: "fluentd".into(),
            image: "fluentd:latest".into(),
            env: vec![("LOG_LEVEL".into(), "warn".into())],
            field_env: vec![("NODE_NAME".into(), "spec.nodeName".into())],
            ports: vec![("metrics".into(), 24231)],
            mounts: vec![
                Mount::read_only("config", "/etc/fluent/configs.d/user"),
                Mount::read_write("varlog", "/var/log"),
            ],
            privileged: true,
            ..Default::default()
        });

        assert_eq!(container.image.as_deref(), Some("fluentd:latest"));
        let env = container.env.unwrap();
        assert_eq!(env[0].name, "LOG_LEVEL");
        assert_eq!(
            env[1].value_from.as_ref().unwrap().field_ref.as_ref().unwrap().field_path,
            "spec.nodeName"
        );
        assert_eq!(container.ports.unwrap()[0].container_port, 24231);
        let mounts = container.volume_mounts.unwrap();
        assert_eq!(mounts[0].read_only, Some(true));
        assert_eq!(mounts[1].read_only, None);
        assert_eq!(
            container.security_context.unwrap().privileged,
            Some(true)
        );
    }

    #[test]
    fn test_volumes() {
        let cm = config_map_volume("config", "fluentd").unwrap();
        assert_eq!(cm.name, "config");
        assert!(cm.config_map.is_some());

        let secret = secret_volume("certs", "fluentd");
        assert_eq!(
            secret.secret.unwrap().secret_name.as_deref(),
            Some("fluentd")
        );
        assert_eq!(host_path_volume("varlog", "/var/log").host_path.unwrap().path, "/var/log");
        assert!(empty_dir_volume("buffer").empty_dir.is_some());
    }

    #[test]
    fn test_empty_lists_are_omitted() {
        let template = build_pod_template(BTreeMap::new(), Vec::new(), Vec::new(), None, Vec::new());
        let spec = template.spec.unwrap();
        assert!(spec.volumes.is_none());
        assert!(spec.tolerations.is_none());
    }
}

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kubernetes-style condition for status reporting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g., "Ready", "Degraded").
    #[serde(rename = "type")]
    pub type_: String,

    /// Status: "True", "False", or "Unknown".
    pub status: String,

    /// Machine-readable reason.
    #[serde(default)]
    pub reason: Option<String>,

    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,

    /// Last transition time (RFC 3339 string).
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

impl Condition {
    pub fn new(type_: &str, status: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: if status { "True" } else { "False" }.into(),
            reason: Some(reason.into()),
            message: Some(message.into()),
            last_transition_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Condition type names used on both resources.
pub mod condition_types {
    pub const READY: &str = "Ready";
    pub const DEGRADED: &str = "Degraded";
    pub const UNSCHEDULABLE: &str = "Unschedulable";
}

/// Merge `next` into `previous`, keeping the transition time of conditions
/// whose status did not change and stamping `now` on the others.
pub fn carry_transition_times(
    previous: &[Condition],
    mut next: Vec<Condition>,
    now: &str,
) -> Vec<Condition> {
    for condition in &mut next {
        let prior = previous.iter().find(|c| c.type_ == condition.type_);
        condition.last_transition_time = match prior {
            Some(p) if p.status == condition.status => p
                .last_transition_time
                .clone()
                .or_else(|| Some(now.to_string())),
            _ => Some(now.to_string()),
        };
    }
    next
}

/// Reference to a Secret in the resource's namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecretReference {
    /// Secret name.
    #[serde(default)]
    pub name: String,
}

/// Resource requirements (requests and limits).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceRequirements {
    #[serde(default)]
    pub requests: Option<ResourceValues>,

    #[serde(default)]
    pub limits: Option<ResourceValues>,
}

/// CPU and memory values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceValues {
    /// CPU (e.g., "100m", "1").
    #[serde(default)]
    pub cpu: Option<String>,

    /// Memory (e.g., "736Mi").
    #[serde(default)]
    pub memory: Option<String>,
}

impl ResourceRequirements {
    /// Convert to the core/v1 representation.
    pub fn to_k8s(&self) -> k8s_openapi::api::core::v1::ResourceRequirements {
        fn values(v: &Option<ResourceValues>) -> Option<BTreeMap<String, Quantity>> {
            let v = v.as_ref()?;
            let mut map = BTreeMap::new();
            if let Some(cpu) = &v.cpu {
                map.insert("cpu".to_string(), Quantity(cpu.clone()));
            }
            if let Some(memory) = &v.memory {
                map.insert("memory".to_string(), Quantity(memory.clone()));
            }
            Some(map)
        }

        k8s_openapi::api::core::v1::ResourceRequirements {
            requests: values(&self.requests),
            limits: values(&self.limits),
            ..Default::default()
        }
    }
}

/// Toleration for Pod scheduling.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    pub key: Option<String>,
    pub operator: Option<String>,
    pub value: Option<String>,
    pub effect: Option<String>,
    #[serde(default)]
    pub toleration_seconds: Option<i64>,
}

impl Toleration {
    pub fn to_k8s(&self) -> k8s_openapi::api::core::v1::Toleration {
        k8s_openapi::api::core::v1::Toleration {
            key: self.key.clone(),
            operator: self.operator.clone(),
            value: self.value.clone(),
            effect: self.effect.clone(),
            toleration_seconds: self.toleration_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_time_kept_when_status_unchanged() {
        let mut prior = Condition::new("Ready", true, "Valid", "");
        prior.last_transition_time = Some("2024-01-01T00:00:00Z".into());
        let next = vec![
            Condition::new("Ready", true, "Valid", "still fine"),
            Condition::new("Degraded", true, "Invalid", "x"),
        ];
        let merged = carry_transition_times(&[prior], next, "2024-02-02T00:00:00Z");
        assert_eq!(
            merged[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(
            merged[1].last_transition_time.as_deref(),
            Some("2024-02-02T00:00:00Z")
        );
    }

    #[test]
    fn test_resource_requirements_to_k8s() {
        let req = ResourceRequirements {
            requests: Some(ResourceValues {
                cpu: Some("100m".into()),
                memory: Some("736Mi".into()),
            }),
            limits: None,
        };
        let k8s = req.to_k8s();
        let requests = k8s.requests.unwrap();
        assert_eq!(requests["cpu"].0, "100m");
        assert_eq!(requests["memory"].0, "736Mi");
        assert!(k8s.limits.is_none());
    }
}

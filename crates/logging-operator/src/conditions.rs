//! Condition taxonomy for forwarder validation.
//!
//! Every input, output and pipeline of a `ClusterLogForwarder` ends up with an
//! [`ElementStatus`]: a lifecycle [`ElementState`] plus the validation
//! conditions that explain it.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants::names;

/// Output types understood by the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputType {
    Elasticsearch,
    FluentdForward,
    Syslog,
}

impl OutputType {
    pub const ALL: [OutputType; 3] = [
        OutputType::Elasticsearch,
        OutputType::FluentdForward,
        OutputType::Syslog,
    ];

    /// Parse a declared output type; `forward` is an alias of `fluentdForward`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "elasticsearch" => Some(OutputType::Elasticsearch),
            "fluentdForward" | "forward" => Some(OutputType::FluentdForward),
            "syslog" => Some(OutputType::Syslog),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputType::Elasticsearch => "elasticsearch",
            OutputType::FluentdForward => "fluentdForward",
            OutputType::Syslog => "syslog",
        }
    }

    /// Scheme used when a URL is given as a bare `host:port`.
    pub fn default_scheme(&self, has_secret: bool) -> &'static str {
        match (self, has_secret) {
            (OutputType::Elasticsearch, _) => "https",
            (_, true) => "tls",
            (_, false) => "tcp",
        }
    }

    /// Port used when the URL does not carry one.
    pub fn default_port(&self) -> u16 {
        use crate::constants::ports;
        match self {
            OutputType::Elasticsearch => ports::LOG_STORE,
            OutputType::FluentdForward => ports::FORWARD,
            OutputType::Syslog => ports::SYSLOG,
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log source types, which are also the names of the built-in inputs.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub enum SourceType {
    Application,
    Infrastructure,
    Audit,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [
        SourceType::Application,
        SourceType::Infrastructure,
        SourceType::Audit,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "application" => Some(SourceType::Application),
            "infrastructure" => Some(SourceType::Infrastructure),
            "audit" => Some(SourceType::Audit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Application => "application",
            SourceType::Infrastructure => "infrastructure",
            SourceType::Audit => "audit",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output names that user-declared outputs may not take.
pub fn is_reserved_output_name(name: &str) -> bool {
    name == names::DEFAULT_OUTPUT || name == names::DEFAULT_OUTPUT_LEGACY
}

/// Pipeline names that user-declared pipelines may not take.
pub fn is_reserved_pipeline_name(name: &str) -> bool {
    name == names::DEFAULT_APP_PIPELINE || name == names::DEFAULT_INFRA_PIPELINE
}

/// Input names that user-declared inputs may not take.
pub fn is_reserved_input_name(name: &str) -> bool {
    SourceType::parse(name).is_some()
}

/// What a validation condition is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    Name,
    Type,
    Endpoint,
    Secret,
    OutputRef,
    SourceType,
}

/// Why a validation condition was raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionReason {
    MissingName,
    NonUniqueName,
    ReservedNameConflict,
    MissingType,
    UnrecognizedType,
    MissingEndpoint,
    #[serde(rename = "InvalidURL")]
    InvalidUrl,
    MissingSecretName,
    SecretDoesNotExist,
    SecretMissingSharedKey,
    UnrecognizedInputRef,
    UnrecognizedOutputRef,
    MissingOutputRefs,
    MissingSource,
}

/// Lifecycle of a validated element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ElementState {
    #[default]
    Accepted,
    Degraded,
    Dropped,
}

impl ElementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementState::Accepted => "Accepted",
            ElementState::Degraded => "Degraded",
            ElementState::Dropped => "Dropped",
        }
    }
}

/// A single validation finding on an element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ElementCondition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub reason: ConditionReason,
    #[serde(default)]
    pub message: String,
}

/// Status of one input, output or pipeline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ElementStatus {
    pub state: ElementState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ElementCondition>,
}

impl ElementStatus {
    pub fn accepted() -> Self {
        Self::default()
    }

    /// Append a condition to this element.
    pub fn add_condition(
        &mut self,
        type_: ConditionType,
        reason: ConditionReason,
        message: impl Into<String>,
    ) {
        self.conditions.push(ElementCondition {
            type_,
            reason,
            message: message.into(),
        });
    }

    /// Whether a condition of the given type has been recorded.
    pub fn has_condition(&self, type_: ConditionType) -> bool {
        self.conditions.iter().any(|c| c.type_ == type_)
    }

    pub fn has_reason(&self, reason: ConditionReason) -> bool {
        self.conditions.iter().any(|c| c.reason == reason)
    }

    pub fn is_ready(&self) -> bool {
        self.state != ElementState::Dropped
    }

    pub fn with_state(mut self, state: ElementState) -> Self {
        self.state = state;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_type_aliases() {
        assert_eq!(OutputType::parse("forward"), Some(OutputType::FluentdForward));
        assert_eq!(
            OutputType::parse("fluentdForward"),
            Some(OutputType::FluentdForward)
        );
        assert_eq!(OutputType::parse("Elasticsearch"), None);
        assert_eq!(OutputType::parse(""), None);
    }

    #[test]
    fn test_default_schemes() {
        assert_eq!(OutputType::Elasticsearch.default_scheme(true), "https");
        assert_eq!(OutputType::Syslog.default_scheme(false), "tcp");
        assert_eq!(OutputType::FluentdForward.default_scheme(true), "tls");
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved_output_name("default"));
        assert!(is_reserved_output_name("clo-default-output-es"));
        assert!(!is_reserved_output_name("es"));
        assert!(is_reserved_pipeline_name("clo-default-app-pipeline"));
        assert!(!is_reserved_pipeline_name("pipeline[0]"));
        assert!(is_reserved_input_name("audit"));
    }

    #[test]
    fn test_add_and_has_condition() {
        let mut status = ElementStatus::accepted();
        assert!(!status.has_condition(ConditionType::Name));
        status.add_condition(
            ConditionType::Name,
            ConditionReason::NonUniqueName,
            "duplicate",
        );
        assert!(status.has_condition(ConditionType::Name));
        assert!(status.has_reason(ConditionReason::NonUniqueName));
        assert!(!status.has_condition(ConditionType::Secret));
    }

    #[test]
    fn test_condition_serialization() {
        let mut status = ElementStatus::accepted().with_state(ElementState::Dropped);
        status.add_condition(ConditionType::Endpoint, ConditionReason::InvalidUrl, "bad");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "Dropped");
        assert_eq!(json["conditions"][0]["type"], "Endpoint");
        assert_eq!(json["conditions"][0]["reason"], "InvalidURL");
        assert!(!status.is_ready());
    }
}

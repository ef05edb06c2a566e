//! End-to-end normalization scenarios for `ClusterLogForwarder` specs.

use logging_operator::conditions::{ConditionReason, ConditionType, ElementState};
use logging_operator::crds::common::{condition_types, SecretReference};
use logging_operator::crds::{ClusterLogForwarderSpec, OutputSpec, PipelineSpec};
use logging_operator::forwarder::{normalize, NormalizeContext, Normalized, SecretIndex};

const NS: &str = "openshift-logging";

fn output(name: &str, type_: &str, url: &str) -> OutputSpec {
    OutputSpec {
        name: name.into(),
        type_: type_.into(),
        url: url.into(),
        ..Default::default()
    }
}

fn pipeline(name: &str, inputs: &[&str], outputs: &[&str]) -> PipelineSpec {
    PipelineSpec {
        name: name.into(),
        input_refs: inputs.iter().map(|s| s.to_string()).collect(),
        output_refs: outputs.iter().map(|s| s.to_string()).collect(),
    }
}

fn run(spec: &ClusterLogForwarderSpec, has_log_store: bool, secrets: &SecretIndex) -> Normalized {
    normalize(spec, &NormalizeContext::new(NS, has_log_store, secrets))
}

#[test]
fn test_default_injection() {
    let secrets = SecretIndex::default();
    let result = run(&ClusterLogForwarderSpec::default(), true, &secrets);

    assert_eq!(
        result.spec.outputs,
        vec![OutputSpec {
            name: "default".into(),
            type_: "elasticsearch".into(),
            url: "https://elasticsearch.openshift-logging.svc:9200".into(),
            secret: Some(SecretReference {
                name: "fluentd".into()
            }),
            syslog: None,
        }]
    );
    assert_eq!(
        result.spec.pipelines,
        vec![pipeline(
            "pipeline[0]",
            &["application", "infrastructure"],
            &["default"]
        )]
    );

    assert!(result.status.is_ready());
    assert!(result.status.outputs["default"].is_ready());
    assert!(result.status.pipelines["pipeline[0]"].is_ready());
    assert!(result.status.inputs["application"].is_ready());
    assert!(result.status.inputs["infrastructure"].is_ready());
    assert!(!result.status.inputs.contains_key("audit"));
}

#[test]
fn test_duplicate_output_name() {
    let secrets = SecretIndex::default();
    let spec = ClusterLogForwarderSpec {
        outputs: vec![
            output("myOutput", "elasticsearch", "https://es-a.example.com:9200"),
            output("myOutput", "elasticsearch", "https://es-b.example.com:9200"),
        ],
        pipelines: vec![pipeline("p", &["application"], &["myOutput"])],
        ..Default::default()
    };
    let result = run(&spec, false, &secrets);

    assert_eq!(result.spec.outputs.len(), 1);
    assert_eq!(result.spec.outputs[0].url, "https://es-a.example.com:9200");

    let first = &result.status.outputs["myOutput"];
    assert_eq!(first.state, ElementState::Accepted);
    assert!(first.conditions.is_empty());

    let second = &result.status.outputs["output[1]"];
    assert_eq!(second.state, ElementState::Dropped);
    assert_eq!(second.conditions[0].type_, ConditionType::Name);
    assert_eq!(second.conditions[0].reason, ConditionReason::NonUniqueName);
}

#[test]
fn test_unrecognized_output_type() {
    let secrets = SecretIndex::default();
    let spec = ClusterLogForwarderSpec {
        outputs: vec![output("aName", "foo", "anOutPut")],
        ..Default::default()
    };
    let result = run(&spec, false, &secrets);

    assert!(result.spec.outputs.is_empty());
    let element = &result.status.outputs["aName"];
    assert_eq!(element.state, ElementState::Dropped);
    let condition = element
        .conditions
        .iter()
        .find(|c| c.type_ == ConditionType::Type)
        .expect("type condition");
    assert_eq!(condition.reason, ConditionReason::UnrecognizedType);
    assert!(condition.message.contains("\"foo\""));
}

#[test]
fn test_forward_secret_missing_shared_key() {
    let mut secrets = SecretIndex::default();
    secrets.insert("fwd-secret", ["tls.crt", "tls.key"]);
    let spec = ClusterLogForwarderSpec {
        outputs: vec![OutputSpec {
            secret: Some(SecretReference {
                name: "fwd-secret".into(),
            }),
            ..output("fwd", "forward", "collector.example.com:24224")
        }],
        ..Default::default()
    };
    let result = run(&spec, false, &secrets);

    assert!(result.spec.outputs.is_empty());
    let element = &result.status.outputs["fwd"];
    assert_eq!(element.state, ElementState::Dropped);
    assert_eq!(element.conditions.len(), 1);
    assert_eq!(element.conditions[0].type_, ConditionType::Secret);
    assert_eq!(element.conditions[0].reason, ConditionReason::SecretMissingSharedKey);
}

#[test]
fn test_forward_secret_with_shared_key_is_accepted() {
    let mut secrets = SecretIndex::default();
    secrets.insert("fwd-secret", ["shared_key"]);
    let spec = ClusterLogForwarderSpec {
        outputs: vec![OutputSpec {
            secret: Some(SecretReference {
                name: "fwd-secret".into(),
            }),
            ..output("fwd", "forward", "collector.example.com:24224")
        }],
        ..Default::default()
    };
    let result = run(&spec, false, &secrets);

    assert_eq!(result.spec.outputs.len(), 1);
    assert_eq!(result.spec.outputs[0].type_, "fluentdForward");
    assert_eq!(result.spec.outputs[0].url, "tls://collector.example.com:24224");
}

#[test]
fn test_pipeline_partial_resolution() {
    let secrets = SecretIndex::default();
    let spec = ClusterLogForwarderSpec {
        outputs: vec![
            output("a", "elasticsearch", "https://a.example.com:9200"),
            output("b", "syslog", "udp://b.example.com:514"),
            output("c", "fluentdForward", "tcp://c.example.com:24224"),
        ],
        pipelines: vec![pipeline("p", &["application"], &["a", "b", "missing"])],
        ..Default::default()
    };
    let result = run(&spec, false, &secrets);

    assert_eq!(result.spec.outputs.len(), 3);
    assert_eq!(result.spec.pipelines.len(), 1);
    assert_eq!(result.spec.pipelines[0].output_refs, vec!["a", "b"]);

    let element = &result.status.pipelines["p"];
    assert_eq!(element.state, ElementState::Degraded);
    assert_eq!(element.conditions.len(), 1);
    assert_eq!(element.conditions[0].type_, ConditionType::OutputRef);
    assert_eq!(element.conditions[0].reason, ConditionReason::UnrecognizedOutputRef);

    assert!(result.status.is_ready());
    let degraded = result.status.condition(condition_types::DEGRADED).unwrap();
    assert!(degraded.is_true());
}

#[test]
fn test_empty_spec_without_log_store() {
    let secrets = SecretIndex::default();
    let result = run(&ClusterLogForwarderSpec::default(), false, &secrets);

    assert!(result.spec.is_empty());
    assert!(!result.status.is_ready());
    assert!(result.status.log_sources.is_empty());
}

#[test]
fn test_disabled_default_forwarding_stays_empty() {
    let secrets = SecretIndex::default();
    let spec = ClusterLogForwarderSpec {
        disable_default_forwarding: true,
        ..Default::default()
    };
    let result = run(&spec, true, &secrets);

    assert!(result.spec.is_empty());
    assert!(!result.status.is_ready());
}

#[test]
fn test_invalid_spec_does_not_fall_back_to_default() {
    let secrets = SecretIndex::default();
    let spec = ClusterLogForwarderSpec {
        outputs: vec![output("bad", "foo", "x")],
        ..Default::default()
    };
    let first = run(&spec, true, &secrets);
    assert!(first.spec.is_empty());
    assert!(first.spec.disable_default_forwarding);

    let second = run(&first.spec, true, &secrets);
    assert_eq!(second.spec, first.spec);
}

#[test]
fn test_pipeline_referencing_default_adds_log_store_output() {
    let secrets = SecretIndex::default();
    let spec = ClusterLogForwarderSpec {
        outputs: vec![output("remote", "syslog", "tcp://syslog.example.com:514")],
        pipelines: vec![pipeline("audit", &["audit"], &["remote", "default"])],
        ..Default::default()
    };

    let with_store = run(&spec, true, &secrets);
    let names: Vec<_> = with_store.spec.outputs.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["remote", "default"]);
    assert_eq!(with_store.spec.pipelines[0].output_refs, vec!["remote", "default"]);

    let without_store = run(&spec, false, &secrets);
    assert_eq!(without_store.spec.pipelines[0].output_refs, vec!["remote"]);
    assert_eq!(
        without_store.status.outputs["default"].state,
        ElementState::Dropped
    );
    assert_eq!(
        without_store.status.pipelines["audit"].state,
        ElementState::Degraded
    );
}

#[test]
fn test_custom_input_routes_its_source() {
    use logging_operator::conditions::SourceType;
    use logging_operator::crds::forwarder::{ApplicationSource, InputSpec};

    let secrets = SecretIndex::default();
    let spec = ClusterLogForwarderSpec {
        inputs: vec![InputSpec {
            name: "team-a".into(),
            application: Some(ApplicationSource {
                namespaces: vec!["team-a".into()],
            }),
            ..Default::default()
        }],
        outputs: vec![output("es", "elasticsearch", "es.example.com:9200")],
        pipelines: vec![pipeline("team", &["team-a"], &["es"])],
        ..Default::default()
    };
    let result = run(&spec, false, &secrets);

    assert_eq!(result.spec.inputs.len(), 1);
    assert_eq!(result.spec.outputs[0].url, "https://es.example.com:9200");
    assert_eq!(result.status.log_sources, vec![SourceType::Application]);
    assert!(result.status.inputs["team-a"].is_ready());
}

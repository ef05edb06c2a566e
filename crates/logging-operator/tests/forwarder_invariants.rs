//! Properties of forwarder normalization over randomly generated specs.

use std::collections::BTreeSet;

use logging_operator::conditions::{is_reserved_output_name, OutputType};
use logging_operator::crds::common::SecretReference;
use logging_operator::crds::forwarder::{ApplicationSource, AuditSource, InfrastructureSource};
use logging_operator::crds::{ClusterLogForwarderSpec, InputSpec, OutputSpec, PipelineSpec};
use logging_operator::forwarder::url::parse_endpoint;
use logging_operator::forwarder::{default_output, normalize, NormalizeContext, SecretIndex};

const NS: &str = "openshift-logging";
const ITERATIONS: u64 = 500;

const OUTPUT_NAMES: &[&str] = &["a", "b", "c", "remote", "default", "", "output[1]"];
const OUTPUT_TYPES: &[&str] = &["elasticsearch", "forward", "fluentdForward", "syslog", "foo", ""];
const URLS: &[&str] = &[
    "es.example.com:9200",
    "https://es.example.com",
    "tcp://collector:24224",
    "udp://syslog.example.com:514",
    "  tls://padded.example.com:24224 ",
    "::not-a-url",
    "",
];
const SECRETS: &[&str] = &["with-shared-key", "tls-only", "absent", ""];
const INPUT_NAMES: &[&str] = &["team", "ops", "application", ""];
const PIPELINE_NAMES: &[&str] = &["p1", "p2", "p3", ""];
const INPUT_REFS: &[&str] = &["application", "infrastructure", "audit", "team", "ops", "nope"];
const OUTPUT_REFS: &[&str] = &["a", "b", "c", "remote", "default", "missing"];

fn pick<'a>(rng: &mut fastrand::Rng, pool: &[&'a str]) -> &'a str {
    pool[rng.usize(..pool.len())]
}

fn pick_some(rng: &mut fastrand::Rng, pool: &[&str], max: usize) -> Vec<String> {
    (0..rng.usize(..=max))
        .map(|_| pick(rng, pool).to_string())
        .collect()
}

fn random_output(rng: &mut fastrand::Rng) -> OutputSpec {
    if rng.u8(..10) == 0 {
        return default_output(NS);
    }
    OutputSpec {
        name: pick(rng, OUTPUT_NAMES).into(),
        type_: pick(rng, OUTPUT_TYPES).into(),
        url: pick(rng, URLS).into(),
        secret: rng.bool().then(|| SecretReference {
            name: pick(rng, SECRETS).into(),
        }),
        syslog: None,
    }
}

fn random_input(rng: &mut fastrand::Rng) -> InputSpec {
    InputSpec {
        name: pick(rng, INPUT_NAMES).into(),
        application: rng.bool().then(|| ApplicationSource {
            namespaces: pick_some(rng, &["ns-a", "ns-b"], 2),
        }),
        infrastructure: rng.bool().then(InfrastructureSource::default),
        audit: (rng.u8(..4) == 0).then(AuditSource::default),
    }
}

fn random_pipeline(rng: &mut fastrand::Rng) -> PipelineSpec {
    PipelineSpec {
        name: pick(rng, PIPELINE_NAMES).into(),
        input_refs: pick_some(rng, INPUT_REFS, 3),
        output_refs: pick_some(rng, OUTPUT_REFS, 4),
    }
}

fn random_spec(rng: &mut fastrand::Rng) -> ClusterLogForwarderSpec {
    ClusterLogForwarderSpec {
        inputs: (0..rng.usize(..3)).map(|_| random_input(rng)).collect(),
        outputs: (0..rng.usize(..5)).map(|_| random_output(rng)).collect(),
        pipelines: (0..rng.usize(..4)).map(|_| random_pipeline(rng)).collect(),
        disable_default_forwarding: rng.u8(..5) == 0,
    }
}

fn secrets() -> SecretIndex {
    let mut index = SecretIndex::default();
    index.insert("with-shared-key", ["shared_key", "tls.crt", "tls.key"]);
    index.insert("tls-only", ["tls.crt", "tls.key"]);
    index.insert("fluentd", ["tls.crt", "tls.key", "ca-bundle.crt"]);
    index
}

/// INVARIANT: normalizing a sanitized spec returns it unchanged.
#[test]
fn test_normalize_is_idempotent_on_sanitized_spec() {
    let secrets = secrets();
    for seed in 0..ITERATIONS {
        let mut rng = fastrand::Rng::with_seed(seed);
        let spec = random_spec(&mut rng);
        let has_log_store = rng.bool();
        let ctx = NormalizeContext::new(NS, has_log_store, &secrets);

        let once = normalize(&spec, &ctx).spec;
        let twice = normalize(&once, &ctx).spec;
        assert_eq!(
            once, twice,
            "seed {seed} (log store: {has_log_store}) not idempotent for {spec:?}"
        );
    }
}

/// INVARIANT: idempotence does not depend on the collector secret being present,
/// including the default log-store forwarding of an empty spec.
#[test]
fn test_normalize_is_idempotent_without_any_secret() {
    let secrets = SecretIndex::default();
    let ctx = NormalizeContext::new(NS, true, &secrets);
    let once = normalize(&ClusterLogForwarderSpec::default(), &ctx).spec;
    assert_eq!(once.outputs, vec![default_output(NS)]);
    assert_eq!(once.pipelines.len(), 1);
    assert_eq!(normalize(&once, &ctx).spec, once);

    for seed in 0..ITERATIONS {
        let mut rng = fastrand::Rng::with_seed(seed);
        let spec = random_spec(&mut rng);
        let ctx = NormalizeContext::new(NS, rng.bool(), &secrets);

        let once = normalize(&spec, &ctx).spec;
        let twice = normalize(&once, &ctx).spec;
        assert_eq!(once, twice, "seed {seed} not idempotent for {spec:?}");
    }
}

/// INVARIANT: every emitted output has a usable name, a known type and a
/// parseable endpoint, and output names are unique.
#[test]
fn test_emitted_outputs_are_valid() {
    let secrets = secrets();
    for seed in 0..ITERATIONS {
        let mut rng = fastrand::Rng::with_seed(seed);
        let spec = random_spec(&mut rng);
        let has_log_store = rng.bool();
        let result = normalize(&spec, &NormalizeContext::new(NS, has_log_store, &secrets));

        let mut names = BTreeSet::new();
        for output in &result.spec.outputs {
            assert!(!output.name.is_empty(), "seed {seed}: unnamed output");
            assert!(
                !is_reserved_output_name(&output.name)
                    || (has_log_store && *output == default_output(NS)),
                "seed {seed}: reserved name {:?} emitted",
                output.name
            );
            assert!(
                OutputType::parse(&output.type_).is_some(),
                "seed {seed}: unknown type {:?}",
                output.type_
            );
            assert!(
                parse_endpoint(&output.url).is_ok(),
                "seed {seed}: unparseable url {:?}",
                output.url
            );
            assert!(names.insert(output.name.clone()), "seed {seed}: duplicate {:?}", output.name);
        }
    }
}

/// INVARIANT: pipeline output references name emitted outputs, and every
/// emitted element is reported ready.
#[test]
fn test_pipeline_refs_are_subset_of_outputs() {
    let secrets = secrets();
    for seed in 0..ITERATIONS {
        let mut rng = fastrand::Rng::with_seed(seed);
        let spec = random_spec(&mut rng);
        let has_log_store = rng.bool();
        let result = normalize(&spec, &NormalizeContext::new(NS, has_log_store, &secrets));

        let outputs: BTreeSet<&str> = result.spec.outputs.iter().map(|o| o.name.as_str()).collect();
        for pipeline in &result.spec.pipelines {
            assert!(!pipeline.output_refs.is_empty(), "seed {seed}: empty outputRefs");
            for output_ref in &pipeline.output_refs {
                assert!(
                    outputs.contains(output_ref.as_str()),
                    "seed {seed}: pipeline {:?} refers to missing output {output_ref:?}",
                    pipeline.name
                );
            }
            assert!(result.status.pipelines[&pipeline.name].is_ready());
        }
        let ready_outputs = result.status.outputs.values().filter(|e| e.is_ready()).count();
        assert!(ready_outputs >= outputs.len(), "seed {seed}: output without ready status");
        assert_eq!(result.status.is_ready(), !result.spec.pipelines.is_empty());
    }
}

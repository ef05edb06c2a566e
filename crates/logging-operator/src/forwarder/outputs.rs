use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::{default_output, status_key, url, NormalizeContext};
use crate::conditions::{
    is_reserved_output_name, ConditionReason, ConditionType, ElementState, ElementStatus,
    OutputType,
};
use crate::constants::{keys, names};
use crate::crds::{OutputSpec, PipelineSpec};

/// Outputs that passed validation, in declaration order.
#[derive(Debug, Default)]
pub struct AcceptedOutputs {
    pub specs: Vec<OutputSpec>,
    names: BTreeSet<String>,
}

impl AcceptedOutputs {
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn accept(&mut self, output: OutputSpec) {
        self.names.insert(output.name.clone());
        self.specs.push(output);
    }
}

/// Validate outputs, recording one status entry per output.
pub fn gather(
    outputs: &[OutputSpec],
    ctx: &NormalizeContext<'_>,
    status: &mut BTreeMap<String, ElementStatus>,
) -> AcceptedOutputs {
    let mut accepted = AcceptedOutputs::default();
    let mut seen = BTreeSet::new();

    for (i, output) in outputs.iter().enumerate() {
        let (element, sanitized) = validate(output, ctx, &mut seen);
        let valid_name = !element.has_condition(ConditionType::Name);
        let key = status_key(status, valid_name.then_some(output.name.as_str()), "output", i);
        match sanitized {
            Some(spec) => accepted.accept(spec),
            None => debug!(output = %key, "Dropping invalid output"),
        }
        status.insert(key, element);
    }
    accepted
}

/// Check one output; returns its status and, when accepted, the sanitized spec.
fn validate(
    output: &OutputSpec,
    ctx: &NormalizeContext<'_>,
    seen: &mut BTreeSet<String>,
) -> (ElementStatus, Option<OutputSpec>) {
    let mut element = ElementStatus::accepted();

    if output.name.is_empty() {
        element.add_condition(ConditionType::Name, ConditionReason::MissingName, "output must have a name");
    } else if is_reserved_output_name(&output.name) && !is_canonical_default(output, ctx) {
        element.add_condition(
            ConditionType::Name,
            ConditionReason::ReservedNameConflict,
            format!("output name {:?} is reserved", output.name),
        );
    } else if !seen.insert(output.name.clone()) {
        element.add_condition(
            ConditionType::Name,
            ConditionReason::NonUniqueName,
            format!("duplicate name: {:?}", output.name),
        );
    }

    let output_type = if output.type_.is_empty() {
        element.add_condition(ConditionType::Type, ConditionReason::MissingType, "output must have a type");
        None
    } else {
        let parsed = OutputType::parse(&output.type_);
        if parsed.is_none() {
            element.add_condition(
                ConditionType::Type,
                ConditionReason::UnrecognizedType,
                format!("unrecognized output type: {:?}", output.type_),
            );
        }
        parsed
    };

    let has_secret = output.secret.is_some();
    let mut endpoint = None;
    if output.url.trim().is_empty() {
        element.add_condition(
            ConditionType::Endpoint,
            ConditionReason::MissingEndpoint,
            "output must have a URL",
        );
    } else if let Some(output_type) = output_type {
        let promoted = url::promote(&output.url, output_type, has_secret);
        match url::parse_endpoint(&promoted) {
            Ok(_) => endpoint = Some(promoted),
            Err(message) => {
                element.add_condition(ConditionType::Endpoint, ConditionReason::InvalidUrl, message)
            }
        }
    }

    // The injected log-store output uses the operator's own collector secret,
    // which is not looked up when it is injected either.
    let operator_owned = is_canonical_default(output, ctx);
    if let Some(secret) = output.secret.as_ref().filter(|_| !operator_owned) {
        if secret.name.is_empty() {
            element.add_condition(
                ConditionType::Secret,
                ConditionReason::MissingSecretName,
                "secret must have a name",
            );
        } else if !ctx.secrets.exists(&secret.name) {
            element.add_condition(
                ConditionType::Secret,
                ConditionReason::SecretDoesNotExist,
                format!("secret {:?} not found", secret.name),
            );
        } else if output_type == Some(OutputType::FluentdForward)
            && !ctx.secrets.has_key(&secret.name, keys::SHARED_KEY)
        {
            element.add_condition(
                ConditionType::Secret,
                ConditionReason::SecretMissingSharedKey,
                format!("secret {:?} is missing key {:?}", secret.name, keys::SHARED_KEY),
            );
        }
    }

    match (output_type, endpoint) {
        (Some(output_type), Some(endpoint)) if element.conditions.is_empty() => {
            let sanitized = OutputSpec {
                type_: output_type.as_str().to_string(),
                url: endpoint,
                ..output.clone()
            };
            (element, Some(sanitized))
        }
        _ => (element.with_state(ElementState::Dropped), None),
    }
}

/// The output named `default` is only accepted when it is exactly the injected
/// log-store output, so a sanitized spec can be normalized again.
fn is_canonical_default(output: &OutputSpec, ctx: &NormalizeContext<'_>) -> bool {
    ctx.has_log_store && output.name == names::DEFAULT_OUTPUT && *output == default_output(ctx.namespace)
}

/// Satisfy pipeline references to `default` that no declared output answers.
///
/// With an in-cluster log store the default output is added; without one the
/// reference is recorded as a dropped `default` output.
pub fn inject_referenced_default(
    pipelines: &[PipelineSpec],
    declared: &[OutputSpec],
    ctx: &NormalizeContext<'_>,
    accepted: &mut AcceptedOutputs,
    status: &mut BTreeMap<String, ElementStatus>,
) {
    let referenced = pipelines
        .iter()
        .any(|p| p.output_refs.iter().any(|r| r == names::DEFAULT_OUTPUT));
    let declared = declared.iter().any(|o| o.name == names::DEFAULT_OUTPUT);
    if !referenced || declared || status.contains_key(names::DEFAULT_OUTPUT) {
        return;
    }

    if ctx.has_log_store {
        debug!("Adding the default log store output referenced by a pipeline");
        accepted.accept(default_output(ctx.namespace));
        status.insert(names::DEFAULT_OUTPUT.to_string(), ElementStatus::accepted());
    } else {
        let mut element = ElementStatus::accepted().with_state(ElementState::Dropped);
        element.add_condition(
            ConditionType::Endpoint,
            ConditionReason::MissingEndpoint,
            "no default log store is configured",
        );
        status.insert(names::DEFAULT_OUTPUT.to_string(), element);
    }
}

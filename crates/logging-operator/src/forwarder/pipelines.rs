use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::inputs::AcceptedInputs;
use super::outputs::AcceptedOutputs;
use super::status_key;
use crate::conditions::{
    is_reserved_pipeline_name, ConditionReason, ConditionType, ElementState, ElementStatus,
};
use crate::crds::PipelineSpec;

/// Validate pipelines against the accepted inputs and outputs.
///
/// Returns the pipelines to emit, with their output references narrowed to
/// accepted outputs.
pub fn gather(
    pipelines: &[PipelineSpec],
    inputs: &AcceptedInputs,
    outputs: &AcceptedOutputs,
    status: &mut BTreeMap<String, ElementStatus>,
) -> Vec<PipelineSpec> {
    let mut emitted = Vec::new();
    let mut seen = BTreeSet::new();

    for (i, pipeline) in pipelines.iter().enumerate() {
        let mut element = ElementStatus::accepted();

        if pipeline.name.is_empty() {
            element.add_condition(ConditionType::Name, ConditionReason::MissingName, "pipeline must have a name");
        } else if is_reserved_pipeline_name(&pipeline.name) {
            element.add_condition(
                ConditionType::Name,
                ConditionReason::ReservedNameConflict,
                format!("pipeline name {:?} is reserved", pipeline.name),
            );
        } else if !seen.insert(pipeline.name.clone()) {
            element.add_condition(
                ConditionType::Name,
                ConditionReason::NonUniqueName,
                format!("duplicate name: {:?}", pipeline.name),
            );
        }

        if pipeline.input_refs.is_empty() {
            element.add_condition(
                ConditionType::SourceType,
                ConditionReason::MissingSource,
                "pipeline must reference at least one input",
            );
        }
        for input in &pipeline.input_refs {
            if inputs.resolve(input).is_none() {
                element.add_condition(
                    ConditionType::SourceType,
                    ConditionReason::UnrecognizedInputRef,
                    format!("unrecognized input: {input:?}"),
                );
            }
        }

        let valid_name = !element.has_condition(ConditionType::Name);
        let key = status_key(status, valid_name.then_some(pipeline.name.as_str()), "pipeline", i);

        if !element.conditions.is_empty() {
            debug!(pipeline = %key, "Dropping invalid pipeline");
            status.insert(key, element.with_state(ElementState::Dropped));
            continue;
        }

        let (resolved, unresolved): (Vec<&String>, Vec<&String>) = pipeline
            .output_refs
            .iter()
            .partition(|name| outputs.contains(name));

        if resolved.is_empty() {
            element.add_condition(
                ConditionType::OutputRef,
                ConditionReason::MissingOutputRefs,
                "pipeline has no valid outputs",
            );
            debug!(pipeline = %key, "Dropping pipeline without outputs");
            status.insert(key, element.with_state(ElementState::Dropped));
            continue;
        }

        if !unresolved.is_empty() {
            let names: Vec<&str> = unresolved.iter().map(|s| s.as_str()).collect();
            element.add_condition(
                ConditionType::OutputRef,
                ConditionReason::UnrecognizedOutputRef,
                format!("unrecognized outputs: {names:?}"),
            );
            element.state = ElementState::Degraded;
        }

        emitted.push(PipelineSpec {
            name: pipeline.name.clone(),
            input_refs: pipeline.input_refs.clone(),
            output_refs: resolved.into_iter().cloned().collect(),
        });
        status.insert(key, element);
    }
    emitted
}

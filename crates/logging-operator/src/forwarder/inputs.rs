use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::status_key;
use crate::conditions::{
    is_reserved_input_name, ConditionReason, ConditionType, ElementState, ElementStatus,
    SourceType,
};
use crate::crds::InputSpec;

/// Declared inputs that passed validation.
#[derive(Debug, Default)]
pub struct AcceptedInputs {
    pub specs: Vec<InputSpec>,
    sources: BTreeMap<String, SourceType>,
}

impl AcceptedInputs {
    /// Source type an input reference resolves to, built-in names included.
    pub fn resolve(&self, name: &str) -> Option<SourceType> {
        SourceType::parse(name).or_else(|| self.sources.get(name).copied())
    }
}

/// Validate declared inputs, recording one status entry per input.
pub fn gather(inputs: &[InputSpec], status: &mut BTreeMap<String, ElementStatus>) -> AcceptedInputs {
    let mut accepted = AcceptedInputs::default();
    let mut seen = BTreeSet::new();

    for (i, input) in inputs.iter().enumerate() {
        let mut element = ElementStatus::accepted();

        if input.name.is_empty() {
            element.add_condition(ConditionType::Name, ConditionReason::MissingName, "input must have a name");
        } else if is_reserved_input_name(&input.name) {
            element.add_condition(
                ConditionType::Name,
                ConditionReason::ReservedNameConflict,
                format!("input name {:?} is reserved", input.name),
            );
        } else if !seen.insert(input.name.clone()) {
            element.add_condition(
                ConditionType::Name,
                ConditionReason::NonUniqueName,
                format!("duplicate name: {:?}", input.name),
            );
        }

        let source_types = input.source_types();
        if source_types.len() != 1 {
            element.add_condition(
                ConditionType::SourceType,
                ConditionReason::MissingSource,
                "input must select exactly one of application, infrastructure or audit",
            );
        }

        let valid_name = !element.has_condition(ConditionType::Name);
        let key = status_key(status, valid_name.then_some(input.name.as_str()), "input", i);
        if element.conditions.is_empty() {
            accepted.sources.insert(input.name.clone(), source_types[0]);
            accepted.specs.push(input.clone());
        } else {
            debug!(input = %key, "Dropping invalid input");
            element.state = ElementState::Dropped;
        }
        status.insert(key, element);
    }
    accepted
}

use thiserror::Error;

use crate::addr::ResourceId;

/// Configuration errors. Each one is fatal to the whole pass and is raised
/// before any remote mutation happens.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("dependency cycle: {}", format_cycle(.cycle))]
    Cycle { cycle: Vec<ResourceId> },

    #[error("duplicate resource id: {0}")]
    DuplicateResource(ResourceId),

    #[error("{resource} references undeclared resource {target}")]
    UnknownReference {
        resource: ResourceId,
        target: ResourceId,
    },

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("unknown field {resource_type}.{field}")]
    UnknownField { resource_type: String, field: String },

    #[error("{resource}: required field {field} is not declared")]
    MissingRequiredField { resource: ResourceId, field: String },

    #[error("{resource}: required field {field} is missing from the observed instance")]
    ObservedFieldMissing { resource: ResourceId, field: String },

    #[error("{resource}: immutable field {field} cannot change")]
    ImmutableFieldViolation { resource: ResourceId, field: String },

    #[error("conflicting policies for {resource_type}.{field}: {existing} vs {requested}")]
    SchemaConflict {
        resource_type: String,
        field: String,
        existing: String,
        requested: String,
    },

    #[error("action ordering is cyclic: {}", .actions.join(", "))]
    PlanCycle { actions: Vec<String> },

    /// A plan read back from elsewhere whose action ids do not line up.
    #[error("malformed plan: {0}")]
    MalformedPlan(String),
}

fn format_cycle(cycle: &[ResourceId]) -> String {
    cycle
        .iter()
        .map(ResourceId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl CoreError {
    /// The resource the error is about, when there is exactly one.
    pub fn resource(&self) -> Option<&ResourceId> {
        match self {
            Self::DuplicateResource(id) => Some(id),
            Self::UnknownReference { resource, .. }
            | Self::MissingRequiredField { resource, .. }
            | Self::ObservedFieldMissing { resource, .. }
            | Self::ImmutableFieldViolation { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

#![allow(dead_code)]

use keel_core::{
    attr_of, identity_of, ChangePolicy, Declaration, Resource, SchemaRegistry, TypeSchema,
};
use keel_provisioner::{ExecutorConfig, RetryPolicy};
use serde_json::json;

pub fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            TypeSchema::new("model")
                .required("name", ChangePolicy::UpdateInPlace)
                .field("software_spec", ChangePolicy::ForceReplace)
                .field("created_at", ChangePolicy::ComputedIgnore),
        )
        .unwrap();
    registry
        .register(
            TypeSchema::new("promoted_asset")
                .required("model", ChangePolicy::ForceReplace)
                .field("model_name", ChangePolicy::UpdateInPlace),
        )
        .unwrap();
    registry
        .register(
            TypeSchema::new("deployment")
                .required("asset", ChangePolicy::UpdateInPlace)
                .field("replicas", ChangePolicy::UpdateInPlace),
        )
        .unwrap();
    registry
}

pub fn model(id: &str, name: &str, software_spec: &str) -> Resource {
    Resource::new(id, "model")
        .attr("name", json!(name))
        .attr("software_spec", json!(software_spec))
}

pub fn asset() -> Resource {
    Resource::new("P", "promoted_asset")
        .attr("model", identity_of("M"))
        .attr("model_name", attr_of("M", "name"))
}

pub fn deployment() -> Resource {
    Resource::new("D", "deployment")
        .attr("asset", identity_of("P"))
        .attr("replicas", json!(2))
}

/// M ← P ← D, with M's software spec at `software_spec`.
pub fn chain(software_spec: &str) -> Declaration {
    declaration(vec![model("M", "churn", software_spec), asset(), deployment()])
}

pub fn declaration(resources: Vec<Resource>) -> Declaration {
    Declaration {
        resources,
        registry: registry(),
    }
}

/// Retries with millisecond delays so tests stay fast.
pub fn fast_config(parallelism: usize, max_attempts: u32) -> ExecutorConfig {
    ExecutorConfig {
        parallelism,
        retry: RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 4,
        },
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

use keel_core::{ObservedInstance, ResourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub resource_id: ResourceId,
    pub resource_type: String,
    /// Last known remote identifier, if the resource was seen before.
    pub remote_identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub resource_id: ResourceId,
    pub resource_type: String,
    pub operation: Operation,
    /// Declared attributes with every reference resolved. Empty for deletes.
    pub attributes: BTreeMap<String, Value>,
    /// The fields an update changes.
    pub changed_fields: BTreeSet<String>,
    /// The instance an update or delete targets.
    pub remote_identifier: Option<String>,
}

/// The sole I/O boundary of a reconciliation pass.
///
/// One implementation per remote system. Methods return boxed futures for
/// dyn compatibility.
pub trait StateProvider: Send + Sync {
    /// Observe the current instance. A resource that does not exist is
    /// `Ok` with `exists == false`, not an error.
    fn read(&self, request: ReadRequest) -> BoxFuture<'_, Result<ObservedInstance, ProviderError>>;

    /// Perform a create, update or delete and return the instance as it
    /// exists afterwards (`exists == false` after a delete).
    fn apply(&self, request: ApplyRequest)
        -> BoxFuture<'_, Result<ObservedInstance, ProviderError>>;
}

use futures::stream::{self, StreamExt, TryStreamExt};
use keel_core::{ObservedInstance, Resource, ResourceId, Snapshot};

use crate::config::ExecutorConfig;
use crate::error::ProvisionerError;
use crate::provider::{ReadRequest, StateProvider};
use crate::retry::with_retry;

/// Observe the current state of every declared resource, plus every
/// resource in `prior` that is no longer declared.
///
/// A pure read: nothing is mutated. A resource that does not exist is not
/// an error; a read that still fails after retries aborts the pass.
pub async fn read_snapshot<'a>(
    provider: &dyn StateProvider,
    declared: impl IntoIterator<Item = &'a Resource>,
    prior: &Snapshot,
    config: &ExecutorConfig,
) -> Result<Snapshot, ProvisionerError> {
    let mut requests: Vec<ReadRequest> = declared
        .into_iter()
        .map(|r| ReadRequest {
            resource_id: r.id.clone(),
            resource_type: r.resource_type.clone(),
            remote_identifier: prior.remote_identifier(&r.id).map(String::from),
        })
        .collect();

    let orphans: Vec<ReadRequest> = prior
        .iter()
        .filter(|i| !requests.iter().any(|r| r.resource_id == i.resource_id))
        .map(|i| ReadRequest {
            resource_id: i.resource_id.clone(),
            resource_type: i.resource_type.clone(),
            remote_identifier: i.remote_identifier.clone(),
        })
        .collect();
    requests.extend(orphans);

    let total = requests.len();
    let instances: Vec<ObservedInstance> = stream::iter(requests)
        .map(|request| read_one(provider, request, prior, config))
        .buffer_unordered(config.parallelism.max(1))
        .try_collect()
        .await?;

    let mut snapshot: Snapshot = instances.into_iter().collect();
    // Superseded instances are only reachable by remote identifier; carry
    // them over until a pass destroys them.
    for retired in prior.retired() {
        snapshot.retire(retired.clone());
    }
    tracing::info!(read = total, existing = snapshot.len(), "snapshot read");
    Ok(snapshot)
}

async fn read_one(
    provider: &dyn StateProvider,
    request: ReadRequest,
    prior: &Snapshot,
    config: &ExecutorConfig,
) -> Result<ObservedInstance, ProvisionerError> {
    let resource_id = request.resource_id.clone();
    let resource_type = request.resource_type.clone();

    let (attempts, result) = with_retry(
        &config.retry,
        || provider.read(request.clone()),
        |attempt, delay, error| {
            tracing::warn!(
                resource = %resource_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient read failure, retrying"
            );
        },
    )
    .await;

    let mut instance = result.map_err(|source| ProvisionerError::Read {
        resource: resource_id.clone(),
        source,
    })?;

    normalize(&mut instance, &resource_id, &resource_type, prior);
    tracing::debug!(
        resource = %resource_id,
        exists = instance.exists,
        attempts,
        "resource read"
    );
    Ok(instance)
}

/// Providers report what they see; the bookkeeping fields come from the
/// request and from the prior snapshot.
fn normalize(
    instance: &mut ObservedInstance,
    resource_id: &ResourceId,
    resource_type: &str,
    prior: &Snapshot,
) {
    instance.resource_id = resource_id.clone();
    if instance.resource_type.is_empty() {
        instance.resource_type = resource_type.to_string();
    }
    if instance.depends_on.is_empty()
        && let Some(previous) = prior.get(resource_id)
    {
        instance.depends_on = previous.depends_on.clone();
    }
}

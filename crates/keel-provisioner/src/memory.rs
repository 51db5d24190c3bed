//! In-memory state provider.
//!
//! Holds remote instances in a map and echoes back whatever it is told to
//! write. Failures can be scripted per resource, which is how executor
//! behavior under retries and partial failure is exercised.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use keel_core::{ObservedInstance, ResourceId};
use serde_json::Value;

use crate::error::ProviderError;
use crate::provider::{ApplyRequest, BoxFuture, Operation, ReadRequest, StateProvider};

#[derive(Default)]
struct Inner {
    /// Keyed by remote identifier. Several instances may share a resource id
    /// while a replacement is in progress.
    instances: BTreeMap<String, ObservedInstance>,
    serial: u64,
    apply_failures: HashMap<ResourceId, VecDeque<ProviderError>>,
    read_failures: HashMap<ResourceId, VecDeque<ProviderError>>,
    /// Server-assigned attributes per resource type, filled on create.
    computed: HashMap<String, Vec<String>>,
    calls: Vec<(ResourceId, Operation)>,
}

impl Inner {
    fn next_remote_id(&mut self, resource_id: &ResourceId) -> String {
        self.serial += 1;
        format!("{resource_id}-{:04}", self.serial)
    }

    /// The most recently created live instance for `resource_id`.
    fn latest(&self, resource_id: &ResourceId) -> Option<&ObservedInstance> {
        self.instances
            .values()
            .filter(|i| &i.resource_id == resource_id)
            .max_by_key(|i| serial_of(i))
    }
}

fn serial_of(instance: &ObservedInstance) -> u64 {
    instance
        .remote_identifier
        .as_deref()
        .and_then(|id| id.rsplit('-').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[derive(Default)]
pub struct MemoryProvider {
    inner: Mutex<Inner>,
    latency: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every apply takes at least this long.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Give every created instance of `resource_type` server-assigned values
    /// for `fields`, derived from its remote identifier.
    pub fn with_computed(self, resource_type: &str, fields: &[&str]) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.computed.insert(
                resource_type.to_string(),
                fields.iter().map(|f| f.to_string()).collect(),
            );
        }
        self
    }

    /// Put an instance in place as if it had been created earlier.
    pub fn seed(&self, instance: ObservedInstance) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let remote_id = match &instance.remote_identifier {
            Some(id) => id.clone(),
            None => inner.next_remote_id(&instance.resource_id),
        };
        let mut instance = instance;
        instance.remote_identifier = Some(remote_id.clone());
        instance.exists = true;
        inner.instances.insert(remote_id, instance);
    }

    /// Make the next applies for `resource_id` fail with `errors`, in order.
    pub fn fail_applies(&self, resource_id: &str, errors: impl IntoIterator<Item = ProviderError>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .apply_failures
                .entry(ResourceId::from(resource_id))
                .or_default()
                .extend(errors);
        }
    }

    /// Make the next reads of `resource_id` fail with `errors`, in order.
    pub fn fail_reads(&self, resource_id: &str, errors: impl IntoIterator<Item = ProviderError>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .read_failures
                .entry(ResourceId::from(resource_id))
                .or_default()
                .extend(errors);
        }
    }

    /// The live instance for `resource_id`, if any.
    pub fn instance(&self, resource_id: &str) -> Option<ObservedInstance> {
        let inner = self.inner.lock().ok()?;
        inner.latest(&ResourceId::from(resource_id)).cloned()
    }

    /// Number of live instances across all resource ids.
    pub fn instance_count(&self) -> usize {
        self.inner.lock().map(|i| i.instances.len()).unwrap_or(0)
    }

    /// Every apply that reached the provider, including failed attempts.
    pub fn calls(&self) -> Vec<(ResourceId, Operation)> {
        self.inner.lock().map(|i| i.calls.clone()).unwrap_or_default()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn do_read(&self, request: &ReadRequest) -> Result<ObservedInstance, ProviderError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ProviderError::Unavailable("provider state poisoned".into()))?;

        if let Some(error) = inner
            .read_failures
            .get_mut(&request.resource_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        Ok(inner
            .latest(&request.resource_id)
            .cloned()
            .unwrap_or_else(|| ObservedInstance::absent(request.resource_id.clone())))
    }

    fn do_apply(&self, request: &ApplyRequest) -> Result<ObservedInstance, ProviderError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ProviderError::Unavailable("provider state poisoned".into()))?;
        inner
            .calls
            .push((request.resource_id.clone(), request.operation));

        if let Some(error) = inner
            .apply_failures
            .get_mut(&request.resource_id)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        match request.operation {
            Operation::Create => {
                let remote_id = inner.next_remote_id(&request.resource_id);
                let mut attributes = request.attributes.clone();
                if let Some(fields) = inner.computed.get(&request.resource_type) {
                    for field in fields {
                        attributes.insert(field.clone(), Value::String(format!("{remote_id}/{field}")));
                    }
                }
                let instance = ObservedInstance::present(
                    request.resource_id.clone(),
                    request.resource_type.clone(),
                    remote_id.clone(),
                    attributes,
                );
                inner.instances.insert(remote_id, instance.clone());
                Ok(instance)
            }
            Operation::Update => {
                let remote_id = request
                    .remote_identifier
                    .clone()
                    .ok_or_else(|| ProviderError::Validation("update without a target".into()))?;
                let existing = inner
                    .instances
                    .get_mut(&remote_id)
                    .ok_or_else(|| ProviderError::NotFound(remote_id.clone()))?;
                for (field, value) in &request.attributes {
                    existing.attributes.insert(field.clone(), value.clone());
                }
                Ok(existing.clone())
            }
            Operation::Delete => {
                let remote_id = request
                    .remote_identifier
                    .clone()
                    .ok_or_else(|| ProviderError::Validation("delete without a target".into()))?;
                // Deleting something already gone is not an error.
                inner.instances.remove(&remote_id);
                let mut gone = ObservedInstance::absent(request.resource_id.clone());
                gone.remote_identifier = Some(remote_id);
                Ok(gone)
            }
        }
    }
}

struct InFlight<'a>(&'a MemoryProvider);

impl<'a> InFlight<'a> {
    fn enter(provider: &'a MemoryProvider) -> Self {
        let now = provider.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        provider.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(provider)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StateProvider for MemoryProvider {
    fn read(&self, request: ReadRequest) -> BoxFuture<'_, Result<ObservedInstance, ProviderError>> {
        Box::pin(async move { self.do_read(&request) })
    }

    fn apply(
        &self,
        request: ApplyRequest,
    ) -> BoxFuture<'_, Result<ObservedInstance, ProviderError>> {
        Box::pin(async move {
            let _guard = InFlight::enter(self);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.do_apply(&request)
        })
    }
}

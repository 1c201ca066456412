//! Shared fixtures for the crate's tests.

use crate::prelude::*;
use crate::registry::WorldRegistry;
use crate::scheduler::{InMemoryScheduler, Scheduler};
use crate::state::{StateBackend, StateStore};
use crate::transport::{InMemoryTransport, Transport};
use crate::types::{Message, SystemConfig};
use crate::world::WorldEnv;
use std::sync::Arc;
use std::time::Duration;

pub(crate) const TEST_USER: &str = "mpi";
pub(crate) const TEST_FUNCTION: &str = "hellompi";

/// One simulated deployment: a shared state backend, transport and
/// scheduler, with per-host state stores and world environments.
pub(crate) struct TestSystem {
    pub backend: Arc<StateBackend>,
    pub stores: Mutex<HashMap<String, Arc<StateStore>>>,
    pub transport: Arc<InMemoryTransport>,
    pub scheduler: Arc<InMemoryScheduler>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self {
            backend: StateBackend::new(),
            stores: Mutex::new(default()),
            transport: InMemoryTransport::new(),
            scheduler: InMemoryScheduler::new(),
        }
    }

    /// This host's state store, shared between its worlds.
    pub fn store(&self, host: &str) -> Arc<StateStore> {
        let mut stores = self.stores.lock();
        Arc::clone(
            stores
                .entry(host.to_string())
                .or_insert_with(|| StateStore::new(&self.backend)),
        )
    }

    pub fn env(&self, host: &str) -> WorldEnv {
        WorldEnv {
            config: SystemConfig {
                endpoint_host: host.to_string(),
                bound_timeout: Duration::from_millis(500),
                unbound_timeout: Duration::from_millis(500),
                usable_cores: 4,
            },
            state: self.store(host),
            scheduler: Arc::clone(&self.scheduler) as Arc<dyn Scheduler>,
            transport: Arc::clone(&self.transport) as Arc<dyn Transport>,
        }
    }

    /// Registry for `host`, wired into the shared transport.
    pub fn registry(&self, host: &str) -> Arc<WorldRegistry> {
        let registry = WorldRegistry::new(self.env(host));
        self.transport.register_host(host, &registry);
        registry
    }
}

pub(crate) fn call_message() -> Message {
    Message::factory(TEST_USER, TEST_FUNCTION)
}

pub(crate) fn int_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

pub(crate) fn ints_from(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_ne_bytes(chunk.try_into().unwrap()))
        .collect()
}

pub(crate) fn double_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

pub(crate) fn doubles_from(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| f64::from_ne_bytes(chunk.try_into().unwrap()))
        .collect()
}

//! The envelope transport seam between hosts.

use crate::error::{MpiError, Result};
use crate::prelude::*;
use crate::registry::WorldRegistry;
use crate::types::MpiMessage;
use std::sync::Arc;

/// Delivers one envelope to a target host, whose inbound handler is expected
/// to pass it to the destination world's `enqueue_message`.
pub trait Transport: Send + Sync {
    fn send_mpi_message(&self, host: &str, msg: &MpiMessage) -> Result<()>;
}

/// Transport routing envelopes between world registries in the same process.
///
/// Each participating host registers its registry under its host id. Sends
/// round-trip through the wire encoding so the path behaves like the real
/// remote one.
#[derive(Default)]
pub struct InMemoryTransport {
    hosts: Mutex<HashMap<String, Arc<WorldRegistry>>>,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register_host(&self, host: &str, registry: &Arc<WorldRegistry>) {
        self.hosts.lock().insert(host.to_string(), Arc::clone(registry));
    }
}

impl Transport for InMemoryTransport {
    fn send_mpi_message(&self, host: &str, msg: &MpiMessage) -> Result<()> {
        let registry = self
            .hosts
            .lock()
            .get(host)
            .cloned()
            .ok_or_else(|| MpiError::UnknownHost(host.to_string()))?;

        trace!(
            "transport - deliver {} -> {} on {}",
            msg.sender,
            msg.destination,
            host
        );

        let wire = bincode::serialize(msg)?;
        let delivered: MpiMessage = bincode::deserialize(&wire)?;

        registry.get_world(delivered.world_id)?.enqueue_message(&delivered)
    }
}

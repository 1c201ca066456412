//! Host-wide mapping from world id to world instance.

use crate::error::{MpiError, Result};
use crate::prelude::*;
use crate::types::Message;
use crate::world::{World, WorldEnv};
use std::sync::Arc;

pub struct WorldRegistry {
    env: WorldEnv,
    worlds: Mutex<HashMap<i32, Arc<World>>>,
}

impl WorldRegistry {
    pub fn new(env: WorldEnv) -> Arc<Self> {
        Arc::new(Self {
            env,
            worlds: Mutex::new(default()),
        })
    }

    pub fn env(&self) -> &WorldEnv {
        &self.env
    }

    /// Create a new world as the master rank and register it.
    ///
    /// `host_override` substitutes this node's identifier, which is useful
    /// when one process stands in for several hosts.
    pub fn create_world(
        &self,
        msg: &Message,
        world_id: i32,
        host_override: Option<&str>,
    ) -> Result<Arc<World>> {
        let mut env = self.env.clone();
        if let Some(host) = host_override {
            env.config.endpoint_host = host.to_string();
        }

        let world = World::create(env, msg, world_id, msg.mpi_world_size)?;
        self.worlds.lock().insert(world_id, Arc::clone(&world));
        Ok(world)
    }

    /// Return the world `msg` belongs to, attaching to its replicated state
    /// if this host has not seen it yet.
    pub fn get_or_initialise_world(&self, msg: &Message) -> Result<Arc<World>> {
        let world_id = msg.mpi_world_id;

        if let Some(world) = self.worlds.lock().get(&world_id) {
            return Ok(Arc::clone(world));
        }

        let world = World::initialise_from_state(self.env.clone(), msg, world_id)?;

        // Somebody may have attached while we were reading state.
        let mut worlds = self.worlds.lock();
        Ok(Arc::clone(worlds.entry(world_id).or_insert(world)))
    }

    /// Look up an already-registered world.
    pub fn get_world(&self, world_id: i32) -> Result<Arc<World>> {
        self.worlds
            .lock()
            .get(&world_id)
            .cloned()
            .ok_or(MpiError::UnknownWorld(world_id))
    }

    pub fn clear(&self) {
        self.worlds.lock().clear();
    }
}

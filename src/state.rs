//! Named byte-blob cells with pull/push replication.
//!
//! The authoritative copy of every cell lives in a [`StateBackend`] shared by
//! all participating hosts (standing in for the distributed KV service). Each
//! host owns a [`StateStore`] that caches one [`StateCell`] per key, so
//! callers on the same host operating on the same key share the local copy.
//! `pull` refreshes the local copy from the backend and `push_full` publishes
//! it: after a `push_full` on host A, a `pull` on host B observes the new
//! bytes. Writes are last-writer-wins; nothing here provides
//! read-modify-write atomicity.

use crate::prelude::*;
use std::sync::Arc;

/// Authoritative store shared across hosts.
#[derive(Debug, Default)]
pub struct StateBackend {
    cells: Mutex<HashMap<String, Vec<u8>>>,
}

impl StateBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn read(&self, key: &str, target: &mut [u8]) {
        if let Some(cell) = self.cells.lock().get(key) {
            let n = min(cell.len(), target.len());
            target[..n].copy_from_slice(&cell[..n]);
        }
    }

    fn write(&self, key: &str, value: &[u8]) {
        self.cells.lock().insert(key.to_string(), value.to_vec());
    }

    fn delete(&self, key: &str) {
        self.cells.lock().remove(key);
    }
}

/// One host's view of the state: local cell copies over a shared backend.
#[derive(Debug)]
pub struct StateStore {
    backend: Arc<StateBackend>,
    kv_map: Mutex<HashMap<String, Arc<StateCell>>>,
}

impl StateStore {
    pub fn new(backend: &Arc<StateBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend: Arc::clone(backend),
            kv_map: Mutex::new(default()),
        })
    }

    /// Handle to the cell `(user, key)` holding `size` bytes.
    ///
    /// Repeated calls on this host return the same cell, so its local copy
    /// is shared. A fresh cell starts zeroed until somebody sets or pulls it.
    pub fn get_kv(&self, user: &str, key: &str, size: usize) -> Arc<StateCell> {
        let mut kv_map = self.kv_map.lock();
        Arc::clone(
            kv_map
                .entry(master_key(user, key))
                .or_insert_with(|| {
                    Arc::new(StateCell {
                        backend: Arc::clone(&self.backend),
                        user: user.to_string(),
                        key: key.to_string(),
                        local: Mutex::new(vec![0; size]),
                    })
                }),
        )
    }

    /// Drop the cell locally and delete its authoritative copy.
    pub fn delete_kv(&self, user: &str, key: &str) {
        trace!("state - delete {}/{}", user, key);
        let full_key = master_key(user, key);
        self.kv_map.lock().remove(&full_key);
        self.backend.delete(&full_key);
    }
}

fn master_key(user: &str, key: &str) -> String {
    format!("{}_{}", user, key)
}

/// A named cell: local bytes plus the backend they replicate through.
#[derive(Debug)]
pub struct StateCell {
    backend: Arc<StateBackend>,
    user: String,
    key: String,
    local: Mutex<Vec<u8>>,
}

impl StateCell {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn size(&self) -> usize {
        self.local.lock().len()
    }

    /// Copy the local bytes into `target`.
    pub fn get(&self, target: &mut [u8]) {
        let local = self.local.lock();
        let n = min(local.len(), target.len());
        target[..n].copy_from_slice(&local[..n]);
    }

    /// Overwrite the local bytes from `value`.
    pub fn set(&self, value: &[u8]) {
        let mut local = self.local.lock();
        let n = min(local.len(), value.len());
        local[..n].copy_from_slice(&value[..n]);
    }

    /// Refresh the local copy from the authoritative store.
    pub fn pull(&self) {
        trace!("state - pull {}/{}", self.user, self.key);
        let mut local = self.local.lock();
        self.backend.read(&master_key(&self.user, &self.key), &mut local);
    }

    /// Publish the local copy to the authoritative store.
    pub fn push_full(&self) {
        trace!("state - push {}/{}", self.user, self.key);
        let local = self.local.lock();
        self.backend.write(&master_key(&self.user, &self.key), &local);
    }
}

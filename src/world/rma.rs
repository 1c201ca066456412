//! One-sided memory access through windows replicated in the state store.
//!
//! A window is owned by one rank and identified by `(world, rank, size)`.
//! Writers update the replicated cell and notify the owner's host with an
//! `RmaWrite` envelope, which applies the new bytes to the owner's memory
//! synchronously on arrival.

use super::{check_send_recv_match, window_state_key, World};
use crate::error::{MpiError, Result};
use crate::prelude::*;
use crate::types::{MpiMessage, MpiMessageType};
use cumulus_core::data_type::DataType;
use std::sync::{Arc, Weak};

/// Memory region backing an RMA window.
///
/// The buffer is owned by the caller; the world only keeps a weak handle,
/// so the caller must keep it alive for as long as the window is used.
pub type WindowBuffer = Arc<Mutex<Vec<u8>>>;

impl World {
    /// Expose `window` as rank `win_rank`'s remotely-accessible region and
    /// publish its initial contents.
    pub fn create_window(&self, win_rank: i32, window: &WindowBuffer) -> Result<()> {
        let win_size = window.lock().len();
        let key = window_state_key(self.id(), win_rank, win_size);
        debug!("mpi - create window {}", key);

        let kv = self.env.state.get_kv(self.user(), &key, win_size);
        kv.set(&window.lock());
        kv.push_full();

        self.window_pointers
            .lock()
            .insert(key, Arc::downgrade(window));
        Ok(())
    }

    /// Read rank `send_rank`'s window into `recv_buffer`.
    pub fn rma_get(
        &self,
        send_rank: i32,
        send_type: DataType,
        send_count: i32,
        recv_buffer: &mut [u8],
        recv_type: DataType,
        recv_count: i32,
    ) -> Result<()> {
        check_send_recv_match(send_type, send_count, recv_type, recv_count)?;

        let win_size = send_type.size_in_bytes() * send_count as usize;
        let key = window_state_key(self.id(), send_rank, win_size);
        let kv = self.env.state.get_kv(self.user(), &key, win_size);

        // Refresh from the authoritative copy when the owner is elsewhere.
        if self.get_host_for_rank(send_rank)? != self.this_host() {
            kv.pull();
        }

        kv.get(recv_buffer);
        Ok(())
    }

    /// Write `send_buffer` into rank `recv_rank`'s window and notify the
    /// owner so it lands in its memory.
    pub fn rma_put(
        &self,
        send_rank: i32,
        send_buffer: &[u8],
        send_type: DataType,
        send_count: i32,
        recv_rank: i32,
        recv_type: DataType,
        recv_count: i32,
    ) -> Result<()> {
        check_send_recv_match(send_type, send_count, recv_type, recv_count)?;

        let win_size = send_type.size_in_bytes() * send_count as usize;
        let key = window_state_key(self.id(), recv_rank, win_size);
        let kv = self.env.state.get_kv(self.user(), &key, win_size);

        kv.set(send_buffer);
        if self.get_host_for_rank(recv_rank)? != self.this_host() {
            kv.push_full();
        }

        // The notification carries the element count so the receiving host
        // can recompute the window size on arrival.
        self.send(
            send_rank,
            recv_rank,
            None,
            DataType::Int,
            send_count,
            MpiMessageType::RmaWrite,
        )
    }

    /// Apply a window update to the owner rank's memory.
    ///
    /// Runs on the inbound critical path so later envelopes from the same
    /// sender observe the write.
    pub(crate) fn synchronize_rma_write(&self, msg: &MpiMessage, is_remote: bool) -> Result<()> {
        let win_size = msg.count as usize * msg.data_type.size_in_bytes();
        let key = window_state_key(self.id(), msg.destination, win_size);

        let kv = self.env.state.get_kv(self.user(), &key, win_size);
        if is_remote {
            kv.pull();
        }

        let window = self
            .window_pointers
            .lock()
            .get(&key)
            .and_then(Weak::upgrade)
            .ok_or_else(|| MpiError::UnknownWindow(key.clone()))?;

        kv.get(&mut window.lock());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::*;
    use crate::world::{World, WindowBuffer};
    use crate::{DataType, MpiError};
    use cumulus_core::prelude::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_rma_put_same_host() {
        let system = TestSystem::new();
        let world = World::create(system.env("thishost"), &call_message(), 10, 4).unwrap();
        world.register_rank(1).unwrap();
        world.register_rank(3).unwrap();

        // Rank 1 owns a window of four ints.
        let window: WindowBuffer = Arc::new(Mutex::new(int_bytes(&[0, 0, 0, 0])));
        world.create_window(1, &window).unwrap();

        let put_data = int_bytes(&[10, 11, 12, 13]);
        world
            .rma_put(3, &put_data, DataType::Int, 4, 1, DataType::Int, 4)
            .unwrap();

        // The owner's memory was updated synchronously.
        assert_eq!(ints_from(&window.lock()), vec![10, 11, 12, 13]);

        // And a get from any rank sees the same bytes.
        let mut target = vec![0u8; put_data.len()];
        world
            .rma_get(1, DataType::Int, 4, &mut target, DataType::Int, 4)
            .unwrap();
        assert_eq!(ints_from(&target), vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_rma_put_across_hosts() {
        let system = TestSystem::new();
        let registry_a = system.registry("hosta");
        let registry_b = system.registry("hostb");

        let mut call = call_message();
        call.mpi_world_size = 5;

        let world_a = registry_a.create_world(&call, 123, None).unwrap();
        world_a.register_rank(1).unwrap();

        call.mpi_world_id = 123;
        let world_b = registry_b.get_or_initialise_world(&call).unwrap();
        world_b.register_rank(3).unwrap();

        // Rank 1 on host A owns the window.
        let window: WindowBuffer = Arc::new(Mutex::new(int_bytes(&[0, 0, 0, 0])));
        world_a.create_window(1, &window).unwrap();

        // Rank 3 on host B writes into it.
        let put_data = int_bytes(&[10, 11, 12, 13]);
        world_b
            .rma_put(3, &put_data, DataType::Int, 4, 1, DataType::Int, 4)
            .unwrap();

        assert_eq!(ints_from(&window.lock()), vec![10, 11, 12, 13]);

        // A get from host B pulls the replicated bytes.
        let mut target = vec![0u8; put_data.len()];
        world_b
            .rma_get(1, DataType::Int, 4, &mut target, DataType::Int, 4)
            .unwrap();
        assert_eq!(ints_from(&target), vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_rma_type_mismatch_fails() {
        let system = TestSystem::new();
        let world = World::create(system.env("thishost"), &call_message(), 10, 4).unwrap();
        world.register_rank(1).unwrap();

        let mut target = vec![0u8; 8];
        assert!(matches!(
            world.rma_get(1, DataType::Int, 2, &mut target, DataType::Double, 2),
            Err(MpiError::DatatypeMismatch { .. })
        ));
    }

    #[test]
    fn test_write_to_dropped_window_fails() {
        let system = TestSystem::new();
        let world = World::create(system.env("thishost"), &call_message(), 10, 4).unwrap();
        world.register_rank(1).unwrap();
        world.register_rank(3).unwrap();

        let window: WindowBuffer = Arc::new(Mutex::new(int_bytes(&[0])));
        world.create_window(1, &window).unwrap();
        drop(window);

        let put_data = int_bytes(&[9]);
        assert!(matches!(
            world.rma_put(3, &put_data, DataType::Int, 1, 1, DataType::Int, 1),
            Err(MpiError::UnknownWindow(_))
        ));
    }
}

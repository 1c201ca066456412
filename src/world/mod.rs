//! Per-world data plane: rank placement, routing, and the operation engines.

mod cartesian;
mod collectives;
mod pool;
mod rma;

pub use rma::WindowBuffer;

use crate::error::{MpiError, Result};
use crate::prelude::*;
use crate::scheduler::Scheduler;
use crate::state::{StateCell, StateStore};
use crate::transport::Transport;
use crate::types::{
    generate_gid, Message, MpiMessage, MpiMessageType, MpiStatus, SystemConfig, MPI_SUCCESS,
};
use cumulus_core::data_type::DataType;
use cumulus_core::future::Future;
use cumulus_core::queue::Queue;
use pool::AsyncThreadPool;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Width of one rank-host directory cell, NUL-padded.
pub const MPI_HOST_STATE_LEN: usize = 20;

const WORLD_STATE_LEN: usize = std::mem::size_of::<i32>();

/// Receive buffer shared with the async request pool.
///
/// `irecv` closures write into it from a worker thread, so callers hand the
/// world a handle rather than a plain mutable slice.
pub type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// Replicated world metadata, pushed on create and pulled on attach.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
struct WorldMetadata {
    world_size: i32,
}

/// Collaborators shared by every world on a host.
///
/// Constructed once by the embedding process and handed to worlds on
/// construction; there is no process-wide singleton behind this.
#[derive(Clone)]
pub struct WorldEnv {
    pub config: SystemConfig,
    pub state: Arc<StateStore>,
    pub scheduler: Arc<dyn Scheduler>,
    pub transport: Arc<dyn Transport>,
}

/// A fixed group of ranks sharing point-to-point channels and RMA windows.
pub struct World {
    env: WorldEnv,
    id: i32,
    size: i32,
    user: String,
    function: String,
    this_host: String,
    created_at: Instant,
    state_cell: Arc<StateCell>,

    cart_procs_per_dim: Mutex<[i32; 2]>,
    rank_host_map: Mutex<HashMap<i32, String>>,
    local_queues: Mutex<HashMap<(i32, i32), Arc<Queue<Arc<MpiMessage>>>>>,
    window_pointers: Mutex<HashMap<String, Weak<Mutex<Vec<u8>>>>>,
    futures: Mutex<HashMap<u64, Future<Result<()>>>>,
    pool: AsyncThreadPool,
}

fn world_state_key(world_id: i32) -> Result<String> {
    if world_id <= 0 {
        return Err(MpiError::InvalidWorldId(world_id));
    }
    Ok(format!("mpi_world_{}", world_id))
}

fn rank_state_key(world_id: i32, rank: i32) -> Result<String> {
    if world_id <= 0 {
        return Err(MpiError::InvalidWorldId(world_id));
    }
    if rank < 0 {
        return Err(MpiError::BadRank { rank, size: 0 });
    }
    Ok(format!("mpi_rank_{}_{}", world_id, rank))
}

pub(crate) fn window_state_key(world_id: i32, rank: i32, size: usize) -> String {
    format!("mpi_win_{}_{}_{}", world_id, rank, size)
}

pub(crate) fn check_send_recv_match(
    send_type: DataType,
    send_count: i32,
    recv_type: DataType,
    recv_count: i32,
) -> Result<()> {
    if send_type != recv_type {
        error!(
            "mismatched send/recv (send {:?}:{}, recv {:?}:{})",
            send_type, send_count, recv_type, recv_count
        );
        return Err(MpiError::DatatypeMismatch {
            send: send_type,
            recv: recv_type,
        });
    }

    Ok(())
}

fn thread_pool_size(world_size: i32, usable_cores: usize) -> usize {
    let world_size = world_size.max(1) as usize;

    if world_size > usable_cores && world_size % usable_cores != 0 {
        warn!("over-provisioning threads in the async request pool");
        warn!("to avoid this, use a world size that is a multiple of the cores per machine");
    }

    min(world_size, usable_cores)
}

impl World {
    fn build(env: WorldEnv, user: String, function: String, id: i32, size: i32) -> Result<Self> {
        let state_key = world_state_key(id)?;
        let state_cell = env.state.get_kv(&user, &state_key, WORLD_STATE_LEN);
        let pool = AsyncThreadPool::new(thread_pool_size(size, env.config.usable_cores));

        Ok(Self {
            this_host: env.config.endpoint_host.clone(),
            created_at: Instant::now(),
            state_cell,
            pool,
            env,
            id,
            size,
            user,
            function,
            cart_procs_per_dim: Mutex::new([0, 0]),
            rank_host_map: Mutex::new(default()),
            local_queues: Mutex::new(default()),
            window_pointers: Mutex::new(default()),
            futures: Mutex::new(default()),
        })
    }

    /// Create a new world of `new_size` ranks, registering the caller as the
    /// master (rank 0) and dispatching one chained invocation per other rank.
    pub fn create(env: WorldEnv, call: &Message, new_id: i32, new_size: i32) -> Result<Arc<Self>> {
        let world = Arc::new(Self::build(
            env,
            call.user.clone(),
            call.function.clone(),
            new_id,
            new_size,
        )?);

        world.push_to_state()?;
        world.register_rank(0)?;

        for rank in 1..new_size {
            let mut msg = Message::factory(&world.user, &world.function);
            msg.is_mpi = true;
            msg.mpi_world_id = new_id;
            msg.mpi_rank = rank;
            msg.mpi_world_size = new_size;
            msg.cmdline = call.cmdline.clone();
            world.env.scheduler.call_function(msg);
        }

        Ok(world)
    }

    /// Attach to an existing world from a non-master rank, reading its size
    /// from the replicated metadata cell.
    pub fn initialise_from_state(env: WorldEnv, msg: &Message, world_id: i32) -> Result<Arc<Self>> {
        let state_key = world_state_key(world_id)?;
        let cell = env.state.get_kv(&msg.user, &state_key, WORLD_STATE_LEN);
        cell.pull();

        let mut buf = [0u8; WORLD_STATE_LEN];
        cell.get(&mut buf);
        let meta: WorldMetadata = bincode::deserialize(&buf)?;

        let world = Self::build(
            env,
            msg.user.clone(),
            msg.function.clone(),
            world_id,
            meta.world_size,
        )?;
        Ok(Arc::new(world))
    }

    fn push_to_state(&self) -> Result<()> {
        let meta = WorldMetadata {
            world_size: self.size,
        };
        self.state_cell.set(&bincode::serialize(&meta)?);
        self.state_cell.push_full();
        Ok(())
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn this_host(&self) -> &str {
        &self.this_host
    }

    /// Seconds elapsed since this world instance was created.
    pub fn get_wtime(&self) -> f64 {
        self.created_at.elapsed().as_secs_f64()
    }

    fn rank_host_state(&self, rank: i32) -> Result<Arc<StateCell>> {
        let key = rank_state_key(self.id, rank)?;
        Ok(self.env.state.get_kv(&self.user, &key, MPI_HOST_STATE_LEN))
    }

    /// Mark `rank` as living on this host and publish the directory cell.
    pub fn register_rank(&self, rank: i32) -> Result<()> {
        self.rank_host_map
            .lock()
            .insert(rank, self.this_host.clone());

        // The host id may be shorter than the cell, pad with NULs.
        let mut cell_bytes = [0u8; MPI_HOST_STATE_LEN];
        let host = self.this_host.as_bytes();
        let n = min(host.len(), MPI_HOST_STATE_LEN);
        cell_bytes[..n].copy_from_slice(&host[..n]);

        let kv = self.rank_host_state(rank)?;
        kv.set(&cell_bytes);
        kv.push_full();
        Ok(())
    }

    /// Resolve the host a rank lives on, filling the cache from the
    /// directory on first use.
    pub fn get_host_for_rank(&self, rank: i32) -> Result<String> {
        let mut map = self.rank_host_map.lock();
        if let Some(host) = map.get(&rank) {
            return Ok(host.clone());
        }

        let kv = self.rank_host_state(rank)?;
        kv.pull();
        let mut cell_bytes = [0u8; MPI_HOST_STATE_LEN];
        kv.get(&mut cell_bytes);

        if cell_bytes[0] == 0 {
            return Err(MpiError::UnknownRank(rank));
        }

        let end = cell_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MPI_HOST_STATE_LEN);
        let host = String::from_utf8_lossy(&cell_bytes[..end]).into_owned();
        map.insert(rank, host.clone());
        Ok(host)
    }

    /// Delete the replicated world state and clear the local queues.
    pub fn destroy(&self) {
        debug!("destroying world {}", self.id);

        self.env
            .state
            .delete_kv(self.state_cell.user(), self.state_cell.key());

        let ranks: Vec<i32> = self.rank_host_map.lock().keys().copied().sorted().collect();
        for rank in ranks {
            if let Ok(key) = rank_state_key(self.id, rank) {
                self.env.state.delete_kv(&self.user, &key);
            }
        }

        self.local_queues.lock().clear();
    }

    fn check_rank_on_this_host(&self, rank: i32) -> Result<()> {
        let map = self.rank_host_map.lock();
        match map.get(&rank) {
            None => {
                error!("no mapping found for rank {} on this host", rank);
                Err(MpiError::UnknownRank(rank))
            }
            Some(host) if host != &self.this_host => Err(MpiError::RemoteRankLocalQueue {
                rank,
                host: host.clone(),
            }),
            Some(_) => Ok(()),
        }
    }

    fn get_local_queue(
        &self,
        send_rank: i32,
        recv_rank: i32,
    ) -> Result<Arc<Queue<Arc<MpiMessage>>>> {
        self.check_rank_on_this_host(recv_rank)?;

        let mut queues = self.local_queues.lock();
        Ok(Arc::clone(
            queues.entry((send_rank, recv_rank)).or_default(),
        ))
    }

    pub fn get_local_queue_size(&self, send_rank: i32, recv_rank: i32) -> Result<usize> {
        Ok(self.get_local_queue(send_rank, recv_rank)?.size())
    }

    /// Send `count` elements to `recv_rank`, routing into a local queue or
    /// out over the transport depending on where the rank lives.
    pub fn send(
        &self,
        send_rank: i32,
        recv_rank: i32,
        buffer: Option<&[u8]>,
        data_type: DataType,
        count: i32,
        message_type: MpiMessageType,
    ) -> Result<()> {
        if recv_rank >= self.size {
            return Err(MpiError::BadRank {
                rank: recv_rank,
                size: self.size,
            });
        }

        let mut payload = Vec::new();
        if count > 0 {
            if let Some(buffer) = buffer {
                payload.extend_from_slice(&buffer[..count as usize * data_type.size_in_bytes()]);
            }
        }

        let msg = MpiMessage {
            id: generate_gid(),
            world_id: self.id,
            sender: send_rank,
            destination: recv_rank,
            data_type,
            count,
            message_type,
            buffer: payload,
        };

        let other_host = self.get_host_for_rank(recv_rank)?;
        if other_host == self.this_host {
            if message_type == MpiMessageType::RmaWrite {
                trace!("mpi - local rma write {} -> {}", send_rank, recv_rank);
                self.synchronize_rma_write(&msg, false)?;
            } else {
                trace!("mpi - send {} -> {}", send_rank, recv_rank);
                self.get_local_queue(send_rank, recv_rank)?.enqueue(Arc::new(msg));
            }
        } else {
            trace!("mpi - send remote {} -> {}", send_rank, recv_rank);
            self.env.transport.send_mpi_message(&other_host, &msg)?;
        }

        Ok(())
    }

    /// Blocking receive of the next envelope from `send_rank`.
    pub fn recv(
        &self,
        send_rank: i32,
        recv_rank: i32,
        buffer: Option<&mut [u8]>,
        data_type: DataType,
        count: i32,
        message_type: MpiMessageType,
    ) -> Result<MpiStatus> {
        trace!("mpi - recv {} -> {}", send_rank, recv_rank);
        let msg = self.get_local_queue(send_rank, recv_rank)?.dequeue();
        self.finish_recv(&msg, buffer, data_type, count, message_type)
    }

    /// Like [`World::recv`] but gives up after `timeout`.
    pub fn recv_timeout(
        &self,
        send_rank: i32,
        recv_rank: i32,
        buffer: Option<&mut [u8]>,
        data_type: DataType,
        count: i32,
        message_type: MpiMessageType,
        timeout: Duration,
    ) -> Result<MpiStatus> {
        let msg = self
            .get_local_queue(send_rank, recv_rank)?
            .dequeue_timeout(timeout)?;
        self.finish_recv(&msg, buffer, data_type, count, message_type)
    }

    fn finish_recv(
        &self,
        msg: &MpiMessage,
        buffer: Option<&mut [u8]>,
        data_type: DataType,
        count: i32,
        message_type: MpiMessageType,
    ) -> Result<MpiStatus> {
        if msg.message_type != message_type {
            error!(
                "message types mismatched on {}->{} (expected={:?}, got={:?})",
                msg.sender, msg.destination, message_type, msg.message_type
            );
            return Err(MpiError::TypeMismatch {
                expected: message_type,
                got: msg.message_type,
            });
        }

        if msg.count > count {
            error!(
                "message too long for buffer (msg={}, buffer={})",
                msg.count, count
            );
            return Err(MpiError::BufferTooSmall {
                msg: msg.count,
                buffer: count,
            });
        }

        if msg.count > 0 {
            if let Some(buffer) = buffer {
                buffer[..msg.buffer.len()].copy_from_slice(&msg.buffer);
            }
        }

        // Report the sender's size; the receive count may be larger.
        Ok(MpiStatus {
            source: msg.sender,
            error: MPI_SUCCESS,
            tag: -1,
            bytes_size: msg.count * data_type.size_in_bytes() as i32,
        })
    }

    /// Inbound handler invoked by the transport for cross-host envelopes.
    pub fn enqueue_message(&self, msg: &MpiMessage) -> Result<()> {
        if msg.world_id != self.id {
            error!(
                "queueing message not meant for this world (msg={}, this={})",
                msg.world_id, self.id
            );
            return Err(MpiError::WrongWorld {
                msg: msg.world_id,
                this: self.id,
            });
        }

        if msg.message_type == MpiMessageType::RmaWrite {
            // RMA notifications are applied synchronously to preserve
            // ordering against later envelopes from the same sender.
            self.synchronize_rma_write(msg, true)
        } else {
            trace!(
                "mpi - queueing message locally {} -> {}",
                msg.sender,
                msg.destination
            );
            self.get_local_queue(msg.sender, msg.destination)?
                .enqueue(Arc::new(msg.clone()));
            Ok(())
        }
    }

    /// Asynchronous send; the returned request id resolves through
    /// [`World::await_async_request`].
    pub fn isend(
        self: &Arc<Self>,
        send_rank: i32,
        recv_rank: i32,
        buffer: Option<&[u8]>,
        data_type: DataType,
        count: i32,
        message_type: MpiMessageType,
    ) -> u64 {
        let request_id = generate_gid();
        let world = Arc::clone(self);
        let payload = buffer.map(<[u8]>::to_vec);

        let future = self.pool.submit(
            request_id,
            Box::new(move || {
                world.send(
                    send_rank,
                    recv_rank,
                    payload.as_deref(),
                    data_type,
                    count,
                    message_type,
                )
            }),
        );

        self.futures.lock().insert(request_id, future);
        request_id
    }

    /// Asynchronous receive into a shared buffer.
    pub fn irecv(
        self: &Arc<Self>,
        send_rank: i32,
        recv_rank: i32,
        buffer: SharedBuffer,
        data_type: DataType,
        count: i32,
        message_type: MpiMessageType,
    ) -> u64 {
        let request_id = generate_gid();
        let world = Arc::clone(self);

        let future = self.pool.submit(
            request_id,
            Box::new(move || {
                let mut target = buffer.lock();
                world
                    .recv(
                        send_rank,
                        recv_rank,
                        Some(target.as_mut_slice()),
                        data_type,
                        count,
                        message_type,
                    )
                    .map(|_| ())
            }),
        );

        self.futures.lock().insert(request_id, future);
        request_id
    }

    /// Block until the request identified by `request_id` completes.
    ///
    /// Consumes the completion entry: a second await of the same id fails.
    pub fn await_async_request(&self, request_id: u64) -> Result<()> {
        trace!("mpi - await {}", request_id);

        let future = self
            .futures
            .lock()
            .remove(&request_id)
            .ok_or(MpiError::UnknownRequest(request_id))?;

        let result = match future.wait_or_err() {
            Ok(result) => result,
            Err(_) => Err(MpiError::RequestAbandoned(request_id)),
        };

        debug!("finished awaiting request {}", request_id);
        result
    }

    /// Simultaneously send to `dest` and receive from `source`.
    pub fn send_recv(
        self: &Arc<Self>,
        send_buffer: &[u8],
        send_count: i32,
        send_type: DataType,
        dest: i32,
        recv_buffer: &mut [u8],
        recv_count: i32,
        recv_type: DataType,
        source: i32,
        my_rank: i32,
    ) -> Result<()> {
        trace!(
            "mpi - sendrecv rank {} (to {}, from {})",
            my_rank,
            dest,
            source
        );

        if dest >= self.size {
            return Err(MpiError::BadRank {
                rank: dest,
                size: self.size,
            });
        }
        if source >= self.size {
            return Err(MpiError::BadRank {
                rank: source,
                size: self.size,
            });
        }

        let staging: SharedBuffer = Arc::new(Mutex::new(vec![0; recv_buffer.len()]));
        let recv_id = self.irecv(
            source,
            my_rank,
            Arc::clone(&staging),
            recv_type,
            recv_count,
            MpiMessageType::SendRecv,
        );

        self.send(
            my_rank,
            dest,
            Some(send_buffer),
            send_type,
            send_count,
            MpiMessageType::SendRecv,
        )?;

        self.await_async_request(recv_id)?;
        recv_buffer.copy_from_slice(&staging.lock());
        Ok(())
    }

    /// Inspect the next envelope from `send_rank` without consuming it.
    pub fn probe(&self, send_rank: i32, recv_rank: i32) -> Result<MpiStatus> {
        let msg = self.get_local_queue(send_rank, recv_rank)?.peek();

        Ok(MpiStatus {
            source: msg.sender,
            error: MPI_SUCCESS,
            tag: -1,
            bytes_size: msg.count * msg.data_type.size_in_bytes() as i32,
        })
    }
}

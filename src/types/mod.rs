//! Invocation and envelope types exchanged with the scheduler and transport.

mod config;

pub use config::SystemConfig;

use cumulus_core::data_type::DataType;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub const MPI_SUCCESS: i32 = 0;

/// Allocate a process-wide unique, monotonic id.
///
/// Used for invocation ids, envelope ids and async request ids.
pub fn generate_gid() -> u64 {
    static NEXT_GID: AtomicU64 = AtomicU64::new(1);
    NEXT_GID.fetch_add(1, Ordering::Relaxed)
}

/// One function invocation as handed around by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub user: String,
    pub function: String,
    pub cmdline: String,

    pub is_mpi: bool,
    pub mpi_world_id: i32,
    pub mpi_rank: i32,
    pub mpi_world_size: i32,

    pub return_value: i32,
    pub output_data: String,
}

impl Message {
    pub fn factory(user: &str, function: &str) -> Self {
        Self {
            id: generate_gid(),
            user: user.to_string(),
            function: function.to_string(),
            ..Default::default()
        }
    }

    /// Human-readable `user/function` description used in logs.
    pub fn func_str(&self) -> String {
        format!("{}/{}", self.user, self.function)
    }
}

/// Tag distinguishing the operation an envelope belongs to, so concurrent
/// operations between the same pair of ranks never cross-match.
#[derive(
    IntoPrimitive, TryFromPrimitive, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug,
)]
#[repr(i32)]
pub enum MpiMessageType {
    Normal = 0,
    SendRecv = 1,
    Bcast = 2,
    Scatter = 3,
    Gather = 4,
    AllGather = 5,
    Reduce = 6,
    AllReduce = 7,
    Scan = 8,
    AllToAll = 9,
    BarrierJoin = 10,
    BarrierDone = 11,
    RmaWrite = 12,
}

/// The unit exchanged between ranks: routing fields, type tags and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpiMessage {
    pub id: u64,
    pub world_id: i32,
    pub sender: i32,
    pub destination: i32,
    pub data_type: DataType,
    pub count: i32,
    pub message_type: MpiMessageType,
    pub buffer: Vec<u8>,
}

/// Receive-side status reported back to callers.
///
/// The tag field is reserved and always reported as `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpiStatus {
    pub source: i32,
    pub error: i32,
    pub tag: i32,
    pub bytes_size: i32,
}

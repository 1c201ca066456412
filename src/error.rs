//! Typed errors surfaced at the boundary of every runtime operation.

use cumulus_core::data_type::{DataType, UnsupportedType};
use cumulus_core::queue::QueueTimeout;
use cumulus_core::reduction::UnsupportedReduction;
use thiserror::Error;

use crate::types::MpiMessageType;

pub type Result<T = ()> = std::result::Result<T, MpiError>;

#[derive(Error, Debug)]
pub enum MpiError {
    #[error("world id must be greater than zero ({0})")]
    InvalidWorldId(i32),

    #[error("world {0} is not registered on this host")]
    UnknownWorld(i32),

    #[error("no host entry for rank {0}")]
    UnknownRank(i32),

    #[error("rank {rank} outside world of size {size}")]
    BadRank { rank: i32, size: i32 },

    #[error("cartesian dimensions {dims:?} do not fit world size {size}")]
    BadCartDim { dims: Vec<i32>, size: i32 },

    #[error("envelope for world {msg} enqueued on world {this}")]
    WrongWorld { msg: i32, this: i32 },

    #[error("mismatched message types (expected={expected:?}, got={got:?})")]
    TypeMismatch {
        expected: MpiMessageType,
        got: MpiMessageType,
    },

    #[error("send/recv datatype mismatch (send={send:?}, recv={recv:?})")]
    DatatypeMismatch { send: DataType, recv: DataType },

    #[error("message too long for buffer (msg={msg}, buffer={buffer})")]
    BufferTooSmall { msg: i32, buffer: i32 },

    #[error(transparent)]
    UnsupportedType(#[from] UnsupportedType),

    #[error(transparent)]
    UnsupportedReduction(#[from] UnsupportedReduction),

    #[error("waiting for unrecognized request {0}")]
    UnknownRequest(u64),

    #[error("async request {0} was abandoned before completing")]
    RequestAbandoned(u64),

    #[error(transparent)]
    QueueTimeout(#[from] QueueTimeout),

    #[error("executor finished")]
    ExecutorFinished,

    #[error("executor is already bound to a function")]
    AlreadyBound,

    #[error("rank {rank} lives on host {host}, not this host")]
    RemoteRankLocalQueue { rank: i32, host: String },

    #[error("no window registered under key {0}")]
    UnknownWindow(String),

    #[error("no transport route to host {0}")]
    UnknownHost(String),

    #[error("envelope serialization failed: {0}")]
    Serialization(#[from] bincode::Error),
}

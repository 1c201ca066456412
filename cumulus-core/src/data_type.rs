//! The fixed set of primitive element types messages can carry.

use crate::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Error returned when a wire-level datatype id has no registered type.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unsupported datatype id {0}")]
pub struct UnsupportedType(pub i32);

/// Primitive element type of a message payload.
///
/// Ids are stable across hosts since they travel inside envelopes.
#[derive(
    IntoPrimitive, TryFromPrimitive, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug,
)]
#[repr(i32)]
pub enum DataType {
    /// Sentinel for operations that carry no payload.
    Null = 0,
    Int = 1,
    LongLong = 2,
    Double = 3,
}

impl DataType {
    pub fn from_id(id: i32) -> Result<Self, UnsupportedType> {
        Self::try_from(id).map_err(|_| UnsupportedType(id))
    }

    pub fn id(self) -> i32 {
        self.into()
    }

    /// Size of one element of this type in bytes.
    pub fn size_in_bytes(self) -> usize {
        use DataType::*;
        match self {
            Null => 1,
            Int => std::mem::size_of::<i32>(),
            LongLong => std::mem::size_of::<i64>(),
            Double => std::mem::size_of::<f64>(),
        }
    }

    pub fn name(self) -> &'static str {
        use DataType::*;
        match self {
            Null => "null",
            Int => "int",
            LongLong => "long long",
            Double => "double",
        }
    }
}

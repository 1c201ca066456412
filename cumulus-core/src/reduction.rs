//! Element-wise reduction kernel used by the reducing collectives.

use crate::data_type::DataType;
use crate::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Reduction operator applied element-wise across rank contributions.
#[derive(
    IntoPrimitive, TryFromPrimitive, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug,
)]
#[repr(i32)]
pub enum ReduceOp {
    Max = 0,
    Min = 1,
    Sum = 2,
}

/// Error returned for an operator/datatype pair outside the supported table.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unsupported reduction (op={op:?}, datatype={dtype:?})")]
pub struct UnsupportedReduction {
    pub op: ReduceOp,
    pub dtype: DataType,
}

/// Fold `count` elements of `in_buf` into `out_buf`, leaving
/// `out[i] = op(out[i], in[i])` for every slot.
///
/// Both buffers must hold at least `count` elements of `dtype`; integer sums
/// wrap on overflow.
pub fn op_reduce(
    op: ReduceOp,
    dtype: DataType,
    count: usize,
    in_buf: &[u8],
    out_buf: &mut [u8],
) -> Result<(), UnsupportedReduction> {
    macro_rules! fold_slots {
        ($ty:ty, $combine:expr) => {{
            let width = std::mem::size_of::<$ty>();
            assert!(in_buf.len() >= count * width && out_buf.len() >= count * width);

            for slot in 0..count {
                let at = slot * width;
                let current = <$ty>::from_ne_bytes(out_buf[at..at + width].try_into().unwrap());
                let incoming = <$ty>::from_ne_bytes(in_buf[at..at + width].try_into().unwrap());
                let combined: $ty = $combine(current, incoming);
                out_buf[at..at + width].copy_from_slice(&combined.to_ne_bytes());
            }

            Ok(())
        }};
    }

    use DataType::*;
    use ReduceOp::*;

    trace!("reduce op {:?} over {:?} x {}", op, dtype, count);

    match (op, dtype) {
        (Max, Int) => fold_slots!(i32, i32::max),
        (Max, LongLong) => fold_slots!(i64, i64::max),
        (Max, Double) => fold_slots!(f64, f64::max),

        (Min, Int) => fold_slots!(i32, i32::min),
        (Min, LongLong) => fold_slots!(i64, i64::min),
        (Min, Double) => fold_slots!(f64, f64::min),

        (Sum, Int) => fold_slots!(i32, i32::wrapping_add),
        (Sum, LongLong) => fold_slots!(i64, i64::wrapping_add),
        (Sum, Double) => fold_slots!(f64, |a, b| a + b),

        (op, dtype) => Err(UnsupportedReduction { op, dtype }),
    }
}

pub mod data_type;
pub mod future;
pub mod prelude;
pub mod queue;
pub mod reduction;

pub use data_type::{DataType, UnsupportedType};
pub use future::{Future, FutureError, Promise};
pub use queue::{Queue, QueueTimeout};
pub use reduction::{op_reduce, ReduceOp, UnsupportedReduction};

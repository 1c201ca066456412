pub use crate::hostname;
pub use cumulus_core::prelude::*;

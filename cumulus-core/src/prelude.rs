pub use anyhow::{anyhow, bail, Context as _, Error};
pub use itertools::Itertools as _;
pub use log::{debug, error, info, trace, warn};
pub use parking_lot::Mutex;
pub use std::cmp::{max, min};
pub use std::mem::{replace, swap, take};
pub use thiserror::Error;

pub type HashSet<K> = std::collections::HashSet<K, fxhash::FxBuildHasher>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, fxhash::FxBuildHasher>;
pub type Result<T = (), E = Error> = std::result::Result<T, E>;

#[inline(always)]
pub fn default<T: Default>() -> T {
    T::default()
}

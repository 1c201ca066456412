#![allow(clippy::too_many_arguments)]

pub mod error;
pub mod executor;
mod prelude;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod transport;
pub mod types;
pub mod world;

#[cfg(test)]
pub(crate) mod testutil;

pub use cumulus_core::data_type::DataType;
pub use cumulus_core::queue::Queue;
pub use cumulus_core::reduction::{op_reduce, ReduceOp};
pub use error::MpiError;
pub use executor::Executor;
pub use registry::WorldRegistry;
pub use scheduler::{InMemoryScheduler, Scheduler};
pub use state::{StateBackend, StateStore};
pub use transport::{InMemoryTransport, Transport};
pub use types::{Message, MpiMessage, MpiMessageType, MpiStatus, SystemConfig};
pub use world::{World, WorldEnv};

pub fn hostname() -> &'static str {
    lazy_static::lazy_static! {
        static ref HOSTNAME: String = {
            match ::hostname::get() {
                Ok(s) => s.to_string_lossy().into_owned(),
                Err(_) => "<anonymous>".into(),
            }
        };
    };

    &HOSTNAME
}

pub fn initialize_logger() {
    use std::time::Instant;

    lazy_static::lazy_static! {
        static ref START_TIMING: Instant = Instant::now();
    }

    let _ = *START_TIMING;

    env_logger::Builder::from_default_env()
        .format(|formatter, record| {
            use std::io::Write;
            let duration = START_TIMING.elapsed();

            writeln!(
                formatter,
                "[{} {} {:.03}] {}: {}",
                hostname(),
                record.module_path().unwrap_or("?"),
                duration.as_secs_f64(),
                record.level(),
                record.args(),
            )
        })
        .init();
}

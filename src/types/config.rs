use crate::prelude::*;
use std::env;
use std::time::Duration;

/// Environment-provided runtime settings.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Identifier of this node in the rank-host directory.
    pub endpoint_host: String,

    /// Receive timeout for executors bound to a function.
    pub bound_timeout: Duration,

    /// How long an unbound executor waits for a bind message.
    pub unbound_timeout: Duration,

    /// Number of cores usable for async request workers.
    pub usable_cores: usize,
}

impl SystemConfig {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Ok(host) = env::var("CUMULUS_ENDPOINT_HOST") {
            let host = host.trim();
            if !host.is_empty() {
                out.endpoint_host = host.to_string();
            }
        }

        out.bound_timeout = millis_from_env("CUMULUS_BOUND_TIMEOUT_MS", out.bound_timeout);
        out.unbound_timeout = millis_from_env("CUMULUS_UNBOUND_TIMEOUT_MS", out.unbound_timeout);

        if let Ok(cores) = env::var("CUMULUS_USABLE_CORES") {
            match cores.trim().parse::<usize>() {
                Ok(n) if n > 0 => out.usable_cores = n,
                _ => warn!("ignoring invalid usable core count {:?}", cores),
            }
        }

        out
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            endpoint_host: hostname().to_string(),
            bound_timeout: Duration::from_secs(30),
            unbound_timeout: Duration::from_secs(60),
            usable_cores: num_cpus::get(),
        }
    }
}

fn millis_from_env(key: &str, fallback: Duration) -> Duration {
    match env::var(key) {
        Ok(value) => match value.trim().parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                warn!("ignoring invalid timeout {:?} for {}", value, key);
                fallback
            }
        },
        Err(_) => fallback,
    }
}

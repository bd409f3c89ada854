//! Environment-driven configuration.
//!
//! The daemon is configured entirely via `CINDER_*` environment variables;
//! there is no CLI surface. `CINDER_POOL_HOST` and `CINDER_POOL_USER` are
//! required, everything else has a default.

use std::env;

use anyhow::{anyhow, Context, Result};

/// Default Stratum port.
const DEFAULT_PORT: u16 = 3333;

/// Default nonce batch size between generation checks. A tuning constant,
/// not a correctness parameter: larger batches amortize the registry poll,
/// smaller ones tighten cancellation latency.
const DEFAULT_BATCH_SIZE: u32 = 50_000;

/// Pool connection and worker configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool hostname or address
    pub host: String,

    /// Pool port
    pub port: u16,

    /// Worker username (typically wallet address, dot, worker name)
    pub username: String,

    /// Worker password ("x" placeholder for most pools)
    pub password: String,

    /// User agent sent with mining.subscribe
    pub user_agent: String,

    /// Number of search worker threads
    pub workers: usize,

    /// Nonces hashed per batch between generation checks
    pub batch_size: u32,
}

impl PoolConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = lookup("CINDER_POOL_HOST")
            .ok_or_else(|| anyhow!("CINDER_POOL_HOST not set"))?;

        let port = match lookup("CINDER_POOL_PORT") {
            Some(raw) => raw.parse().context("CINDER_POOL_PORT not a valid port")?,
            None => DEFAULT_PORT,
        };

        let username = lookup("CINDER_POOL_USER")
            .ok_or_else(|| anyhow!("CINDER_POOL_USER not set"))?;

        let password = lookup("CINDER_POOL_PASS").unwrap_or_else(|| "x".to_string());

        let workers = match lookup("CINDER_WORKERS") {
            Some(raw) => {
                let n: usize = raw.parse().context("CINDER_WORKERS not a number")?;
                if n == 0 {
                    return Err(anyhow!("CINDER_WORKERS must be at least 1"));
                }
                n
            }
            None => std::thread::available_parallelism().map_or(1, |n| n.get()),
        };

        let batch_size = match lookup("CINDER_BATCH_SIZE") {
            Some(raw) => {
                let n: u32 = raw.parse().context("CINDER_BATCH_SIZE not a number")?;
                if n == 0 {
                    return Err(anyhow!("CINDER_BATCH_SIZE must be at least 1"));
                }
                n
            }
            None => DEFAULT_BATCH_SIZE,
        };

        Ok(Self {
            host,
            port,
            username,
            password,
            user_agent: concat!("cinder-miner/", env!("CARGO_PKG_VERSION")).to_string(),
            workers,
            batch_size,
        })
    }
}

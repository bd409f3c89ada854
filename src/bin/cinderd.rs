//! Main entry point for the cinderd mining daemon.

use cinder_miner::{trace, Daemon, PoolConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    trace::init();

    let config = PoolConfig::from_env()?;
    Daemon::new(config).run().await
}

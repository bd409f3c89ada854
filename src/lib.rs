//! Stratum v1 pool mining client.
//!
//! A persistent-connection client for pool mining: the [`stratum`] module
//! drives the protocol session, [`work`] holds the generation-counted job
//! registry, and [`worker`] runs the nonce search threads that race
//! against job replacement. The [`daemon`] module wires it all together
//! for the `cinderd` binary.

pub mod config;
pub mod daemon;
pub mod hasher;
pub mod stratum;
pub mod trace;
pub mod work;
pub mod worker;

pub use config::PoolConfig;
pub use daemon::Daemon;

//! Work types: jobs, shares, targets, and the generation-counted registry.
//!
//! The session installs jobs here; search workers snapshot them. The
//! registry's generation counter is the one cancellation signal in the
//! system: every install bumps it, and a worker that observes a mismatch
//! abandons its batch and re-snapshots.

mod extranonce2;
mod header;
mod job;
mod registry;
pub mod target;

pub use extranonce2::{Extranonce2, Extranonce2Error};
pub use header::{merkle_root, HeaderTemplate};
pub use job::{Job, Share};
pub use registry::{JobRegistry, Poll, Snapshot};

//! Stratum v1 pool protocol client.
//!
//! The protocol is JSON-RPC-flavored, newline-delimited text over a
//! persistent TCP stream:
//!
//! - **Client requests**: `mining.subscribe`, `mining.authorize`,
//!   `mining.submit`
//! - **Server notifications**: `mining.notify` (new work),
//!   `mining.set_difficulty`
//! - **Server responses**: correlated to client requests by id
//!
//! # Architecture
//!
//! [`Session`] is an active async task owning the connection. It performs
//! the handshake, installs work into the shared [`JobRegistry`]
//! (`crate::work`), forwards worker shares upstream, and reports
//! [`SessionEvent`]s over a channel. The [`Transport`] trait decouples the
//! session from TCP so it runs over channels in tests.
//!
//! [`JobRegistry`]: crate::work::JobRegistry

mod connection;
mod error;
mod messages;
mod session;

pub use connection::{Connection, Transport};
pub use error::{StratumError, StratumResult};
pub use messages::{Frame, JobNotification, SubmitParams};
pub use session::{Session, SessionEvent, SessionState, SessionStats};

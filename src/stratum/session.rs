//! Pool session: state machine, request correlation, and share submission.
//!
//! The session owns the connection and is the single writer of both the
//! socket and the job registry. It advances through
//! `Connecting -> Subscribing -> Authorizing -> Ready`, correlates responses
//! to outstanding requests by id, installs jobs and difficulty changes into
//! the registry, and submits worker shares upstream.
//!
//! The event loop is one ordered stream: frames from the transport, shares
//! from the workers, and the shutdown signal. No callback state; everything
//! the session mutates it owns.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::work::{Job, JobRegistry, Share};

use super::connection::{Connection, Transport};
use super::error::{StratumError, StratumResult};
use super::messages::{Frame, JobNotification, SubmitParams};

/// Consecutive malformed frames tolerated before the stream is presumed
/// desynchronized and the session torn down.
const MAX_MALFORMED_STREAK: u32 = 3;

/// Protocol phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribing,
    Authorizing,
    Ready,
}

/// An outstanding request, keyed by id until its response arrives.
///
/// Every entry is removed exactly once: by the matching response, or by
/// [`Session::fail_pending`] on disconnect.
#[derive(Debug, Clone)]
enum PendingRequest {
    Subscribe,
    Authorize,
    Submit { job_id: String },
}

/// Events emitted by the session for the daemon to log and account.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Handshake complete; the session is mining
    Ready { subscription_id: String },

    /// A job was installed into the registry
    JobInstalled {
        generation: u64,
        job_id: String,
        clean_jobs: bool,
    },

    /// Pool replaced the share difficulty
    DifficultyChanged(f64),

    /// Pool accepted a submitted share
    ShareAccepted { job_id: String },

    /// Pool rejected a submitted share; never retried
    ShareRejected { job_id: String, reason: String },

    /// The session ended, cleanly or not
    Disconnected,
}

/// Share accounting over the life of one session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    pub jobs_received: u64,
    pub shares_submitted: u64,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub shares_stale: u64,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "jobs: {}, shares: {}/{} accepted, {} rejected, {} stale",
            self.jobs_received,
            self.shares_accepted,
            self.shares_submitted,
            self.shares_rejected,
            self.shares_stale
        )
    }
}

/// A single pool connection's protocol driver.
///
/// One session per connection; a disconnect consumes it. Reconnecting is
/// the caller's decision and means building a fresh session.
pub struct Session {
    config: PoolConfig,
    registry: Arc<JobRegistry>,
    event_tx: mpsc::Sender<SessionEvent>,
    share_rx: mpsc::Receiver<Share>,
    shutdown: CancellationToken,

    state: SessionState,
    next_id: u64,
    pending: HashMap<u64, PendingRequest>,

    subscription_id: Option<String>,
    extranonce1: Vec<u8>,
    extranonce2_size: u8,
    difficulty: f64,
    current_job: Option<Arc<Job>>,

    malformed_streak: u32,
    share_channel_closed: bool,
    stats: SessionStats,
}

impl Session {
    pub fn new(
        config: PoolConfig,
        registry: Arc<JobRegistry>,
        event_tx: mpsc::Sender<SessionEvent>,
        share_rx: mpsc::Receiver<Share>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            event_tx,
            share_rx,
            shutdown,
            state: SessionState::Disconnected,
            next_id: 1,
            pending: HashMap::new(),
            subscription_id: None,
            extranonce1: Vec::new(),
            extranonce2_size: 0,
            difficulty: 1.0,
            current_job: None,
            malformed_streak: 0,
            share_channel_closed: false,
            stats: SessionStats::default(),
        }
    }

    /// Connect to the configured pool and run the session to completion.
    pub async fn run(mut self) -> StratumResult<()> {
        self.state = SessionState::Connecting;
        let conn = Connection::connect(&self.config.host, self.config.port).await?;
        self.run_with_transport(conn).await
    }

    /// Run the session over a pre-established transport.
    pub async fn run_with_transport(mut self, mut conn: impl Transport) -> StratumResult<()> {
        self.state = SessionState::Subscribing;
        let result = match self
            .send_request(
                &mut conn,
                "mining.subscribe",
                json!([self.config.user_agent]),
                PendingRequest::Subscribe,
            )
            .await
        {
            Ok(()) => self.event_loop(&mut conn).await,
            Err(e) => Err(e),
        };

        self.state = SessionState::Disconnected;
        self.fail_pending().await;
        self.emit(SessionEvent::Disconnected).await;
        info!(stats = %self.stats, "session ended");

        result
    }

    async fn event_loop<T: Transport>(&mut self, conn: &mut T) -> StratumResult<()> {
        loop {
            tokio::select! {
                frame = conn.read_frame() => {
                    match frame {
                        Ok(Some(frame)) => match self.handle_frame(conn, frame).await {
                            Ok(()) => self.malformed_streak = 0,
                            Err(e) if e.is_recoverable() => self.count_malformed(e)?,
                            Err(e) => return Err(e),
                        },
                        Ok(None) => return Err(StratumError::ConnectionClosed),
                        Err(e) if e.is_recoverable() => self.count_malformed(e)?,
                        Err(e) => return Err(e),
                    }
                }

                share = self.share_rx.recv(), if !self.share_channel_closed => {
                    match share {
                        Some(share) => self.handle_share(conn, share).await?,
                        None => self.share_channel_closed = true,
                    }
                }

                _ = self.shutdown.cancelled() => {
                    debug!("session shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    /// Record a recoverable protocol error; escalate after a streak.
    fn count_malformed(&mut self, error: StratumError) -> StratumResult<()> {
        self.malformed_streak += 1;
        warn!(
            error = %error,
            streak = self.malformed_streak,
            "discarding malformed frame"
        );
        if self.malformed_streak >= MAX_MALFORMED_STREAK {
            return Err(StratumError::Protocol(format!(
                "{MAX_MALFORMED_STREAK} consecutive malformed frames, stream desynchronized"
            )));
        }
        Ok(())
    }

    async fn handle_frame<T: Transport>(&mut self, conn: &mut T, frame: Frame) -> StratumResult<()> {
        match frame {
            Frame::Response { id, result, error } => match self.pending.remove(&id) {
                Some(PendingRequest::Subscribe) => {
                    self.handle_subscribe_response(conn, result, error).await
                }
                Some(PendingRequest::Authorize) => self.handle_authorize_response(result, error).await,
                Some(PendingRequest::Submit { job_id }) => {
                    self.handle_submit_response(job_id, result, error).await;
                    Ok(())
                }
                None => Err(StratumError::Protocol(format!(
                    "response id {id} matches no pending request"
                ))),
            },

            Frame::Request {
                id: None,
                method,
                params,
            } => {
                match method.as_str() {
                    "mining.notify" => self.handle_notify(&params).await,
                    "mining.set_difficulty" => self.handle_set_difficulty(&params).await,
                    _ => warn!(method = %method, "ignoring unknown notification"),
                }
                Ok(())
            }

            Frame::Request {
                id: Some(id),
                method,
                ..
            } => {
                // Pools don't normally send id-bearing requests to miners.
                warn!(id, method = %method, "ignoring request from pool");
                Ok(())
            }
        }
    }

    // ----- handshake ------------------------------------------------------

    async fn handle_subscribe_response<T: Transport>(
        &mut self,
        conn: &mut T,
        result: Option<Value>,
        error: Option<Value>,
    ) -> StratumResult<()> {
        if self.state != SessionState::Subscribing {
            return Err(StratumError::Protocol(format!(
                "subscribe response in state {:?}",
                self.state
            )));
        }

        if let Some(error) = error {
            return Err(StratumError::Handshake(format!(
                "subscribe rejected: {}",
                error_reason(&error)
            )));
        }

        let result = result.ok_or_else(|| StratumError::Handshake("subscribe result missing".into()))?;
        let arr = result
            .as_array()
            .ok_or_else(|| StratumError::Handshake("subscribe result not an array".into()))?;
        if arr.len() < 3 {
            return Err(StratumError::Handshake(format!(
                "subscribe result too short: {}",
                arr.len()
            )));
        }

        let subscription_id = extract_session_id(&arr[0]).ok_or_else(|| {
            StratumError::Handshake("subscribe result missing session id".into())
        })?;

        let extranonce1_hex = arr[1]
            .as_str()
            .ok_or_else(|| StratumError::Handshake("extranonce1 not a string".into()))?;
        let extranonce1 = hex::decode(extranonce1_hex)
            .map_err(|e| StratumError::Handshake(format!("extranonce1 hex: {e}")))?;

        let extranonce2_size = arr[2]
            .as_u64()
            .ok_or_else(|| StratumError::Handshake("extranonce2_size not a number".into()))?;
        if !(1..=8).contains(&extranonce2_size) {
            return Err(StratumError::Handshake(format!(
                "extranonce2_size out of range: {extranonce2_size}"
            )));
        }

        info!(
            subscription_id = %subscription_id,
            extranonce1 = %hex::encode(&extranonce1),
            extranonce2_size,
            "subscribed"
        );

        self.subscription_id = Some(subscription_id);
        self.extranonce1 = extranonce1;
        self.extranonce2_size = extranonce2_size as u8;

        self.send_request(
            conn,
            "mining.authorize",
            json!([self.config.username, self.config.password]),
            PendingRequest::Authorize,
        )
        .await?;
        self.state = SessionState::Authorizing;

        Ok(())
    }

    async fn handle_authorize_response(
        &mut self,
        result: Option<Value>,
        error: Option<Value>,
    ) -> StratumResult<()> {
        if self.state != SessionState::Authorizing {
            return Err(StratumError::Protocol(format!(
                "authorize response in state {:?}",
                self.state
            )));
        }

        if let Some(error) = error {
            return Err(StratumError::Auth(error_reason(&error)));
        }

        let authorized = result.as_ref().and_then(Value::as_bool).unwrap_or(false);
        if !authorized {
            return Err(StratumError::Auth("pool rejected credentials".into()));
        }

        self.state = SessionState::Ready;
        info!(username = %self.config.username, "authorized");

        let subscription_id = self.subscription_id.clone().unwrap_or_default();
        self.emit(SessionEvent::Ready { subscription_id }).await;

        Ok(())
    }

    // ----- notifications --------------------------------------------------

    async fn handle_notify(&mut self, params: &Value) {
        let notification = match JobNotification::from_params(params) {
            Ok(notification) => notification,
            Err(e) => {
                // The previous job, if any, stays active.
                warn!(error = %e, "ignoring malformed mining.notify");
                return;
            }
        };

        if self.extranonce2_size == 0 {
            warn!(job_id = %notification.job_id, "job before subscription completed, dropped");
            return;
        }

        let job = notification.into_job(self.extranonce1.clone(), self.extranonce2_size);
        let job_id = job.job_id.clone();
        let clean_jobs = job.clean_jobs;

        let job = Arc::new(job);
        let generation = self.registry.install(job.clone(), self.difficulty);
        self.current_job = Some(job);
        self.stats.jobs_received += 1;

        info!(job_id = %job_id, generation, clean_jobs, "job installed");
        self.emit(SessionEvent::JobInstalled {
            generation,
            job_id,
            clean_jobs,
        })
        .await;
    }

    async fn handle_set_difficulty(&mut self, params: &Value) {
        let difficulty = params
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(Value::as_f64);

        let difficulty = match difficulty {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => {
                // Prior difficulty is retained.
                warn!(params = %params, "ignoring invalid mining.set_difficulty");
                return;
            }
        };

        self.difficulty = difficulty;

        // Re-install the active job so workers re-target at the new
        // difficulty; the job itself is unchanged.
        if let Some(job) = &self.current_job {
            let generation = self.registry.install(job.clone(), difficulty);
            debug!(generation, "difficulty re-installed with active job");
        }

        info!(difficulty, "difficulty changed");
        self.emit(SessionEvent::DifficultyChanged(difficulty)).await;
    }

    // ----- submission pipeline --------------------------------------------

    async fn handle_share<T: Transport>(&mut self, conn: &mut T, share: Share) -> StratumResult<()> {
        // Never submit against superseded job/extranonce state.
        let current = self.registry.generation();
        if share.generation != current {
            debug!(
                job_id = %share.job_id,
                share_generation = share.generation,
                current_generation = current,
                "discarding stale share"
            );
            self.stats.shares_stale += 1;
            return Ok(());
        }

        let params = SubmitParams {
            username: self.config.username.clone(),
            job_id: share.job_id.clone(),
            extranonce2: share.extranonce2.to_vec(),
            time: share.time,
            nonce: share.nonce,
        };

        info!(
            job_id = %share.job_id,
            nonce = format!("{:08x}", share.nonce),
            extranonce2 = %share.extranonce2,
            "submitting share"
        );

        self.send_request(
            conn,
            "mining.submit",
            params.to_params(),
            PendingRequest::Submit {
                job_id: share.job_id,
            },
        )
        .await?;
        self.stats.shares_submitted += 1;

        Ok(())
    }

    async fn handle_submit_response(
        &mut self,
        job_id: String,
        result: Option<Value>,
        error: Option<Value>,
    ) {
        if let Some(error) = error {
            let reason = error_reason(&error);
            self.stats.shares_rejected += 1;
            warn!(job_id = %job_id, reason = %reason, "share rejected");
            self.emit(SessionEvent::ShareRejected { job_id, reason }).await;
            return;
        }

        let accepted = result.as_ref().and_then(Value::as_bool).unwrap_or(false);
        if accepted {
            self.stats.shares_accepted += 1;
            info!(job_id = %job_id, "share accepted");
            self.emit(SessionEvent::ShareAccepted { job_id }).await;
        } else {
            let reason = "pool returned false".to_string();
            self.stats.shares_rejected += 1;
            warn!(job_id = %job_id, "share rejected");
            self.emit(SessionEvent::ShareRejected { job_id, reason }).await;
        }
    }

    // ----- plumbing -------------------------------------------------------

    async fn send_request<T: Transport>(
        &mut self,
        conn: &mut T,
        method: &str,
        params: Value,
        kind: PendingRequest,
    ) -> StratumResult<()> {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, kind);
        conn.write_frame(&Frame::request(id, method, params)).await
    }

    /// Fail every outstanding request with a connection-closed error.
    async fn fail_pending(&mut self) {
        for (id, kind) in std::mem::take(&mut self.pending) {
            match kind {
                PendingRequest::Submit { job_id } => {
                    self.stats.shares_rejected += 1;
                    self.emit(SessionEvent::ShareRejected {
                        job_id,
                        reason: "connection closed".to_string(),
                    })
                    .await;
                }
                other => warn!(id, kind = ?other, "pending request failed: connection closed"),
            }
        }
    }

    async fn emit(&self, event: SessionEvent) {
        // A dropped consumer is not the session's problem.
        self.event_tx.send(event).await.ok();
    }
}

/// Extract the session id from the first element of a subscribe result.
///
/// Pools wrap it differently: `[["mining.notify", "id"], ...]`,
/// `["mining.notify", "id"]`, or deeper. Descend through trailing arrays
/// until a trailing string is found.
fn extract_session_id(value: &Value) -> Option<String> {
    let mut value = value;
    loop {
        let last = value.as_array()?.last()?;
        if last.is_array() {
            value = last;
        } else {
            return last.as_str().map(str::to_string);
        }
    }
}

/// Human-readable reason from a pool error value, conventionally
/// `[code, "message", data]`.
fn error_reason(error: &Value) -> String {
    error
        .as_array()
        .and_then(|arr| arr.get(1))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

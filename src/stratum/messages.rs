//! Wire message types and JSON-RPC serialization.
//!
//! Stratum v1 predates JSON-RPC 2.0 and bends its conventions: notifications
//! carry `id: null` instead of omitting the field, errors are plain arrays,
//! and there is no version field. A small custom envelope fits those quirks
//! better than a spec-compliant JSON-RPC library would.

use bitcoin::block::Version;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, CompactTarget, TxMerkleNode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::work::Job;

/// One newline-delimited protocol frame.
///
/// Classification rule: a frame with `method` set is a notification (or a
/// request from the peer); a frame with `id` set and no `method` is a
/// response, correlated against the pending-request table by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// Request or notification (`id: null` marks a notification)
    Request {
        id: Option<u64>,
        method: String,
        params: Value,
    },

    /// Response to a request we sent
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
}

impl Frame {
    /// Build a request frame.
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Frame::Request {
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Build a notification frame (request without an id).
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Frame::Request {
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Message id, if the frame carries one.
    pub fn id(&self) -> Option<u64> {
        match self {
            Frame::Request { id, .. } => *id,
            Frame::Response { id, .. } => Some(*id),
        }
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Frame::Request { method, .. } => Some(method),
            Frame::Response { .. } => None,
        }
    }

    /// Whether this is a notification.
    pub fn is_notification(&self) -> bool {
        matches!(self, Frame::Request { id: None, .. })
    }
}

/// Parsed `mining.notify` parameters.
///
/// The nine ordered fields describing the next candidate block header. Hex
/// fields are decoded eagerly so a bad job is rejected before it can reach
/// the registry.
#[derive(Debug, Clone)]
pub struct JobNotification {
    pub job_id: String,
    pub prev_blockhash: BlockHash,
    pub coinbase1: Vec<u8>,
    pub coinbase2: Vec<u8>,
    pub merkle_branches: Vec<TxMerkleNode>,
    pub version: Version,
    pub bits: CompactTarget,
    pub time: u32,
    pub clean_jobs: bool,
}

impl JobNotification {
    /// Parse the 9-tuple from `mining.notify` params.
    pub fn from_params(params: &Value) -> Result<Self, String> {
        let params = params.as_array().ok_or("notify params not an array")?;
        if params.len() < 9 {
            return Err(format!("notify params too short: {}", params.len()));
        }

        let job_id = params[0].as_str().ok_or("job_id not a string")?.to_string();

        let prev_blockhash = parse_prev_blockhash(params[1].as_str().ok_or("prev_hash not a string")?)?;

        let coinbase1 = hex::decode(params[2].as_str().ok_or("coinbase1 not a string")?)
            .map_err(|e| format!("coinbase1 hex: {e}"))?;
        let coinbase2 = hex::decode(params[3].as_str().ok_or("coinbase2 not a string")?)
            .map_err(|e| format!("coinbase2 hex: {e}"))?;

        let branches = params[4].as_array().ok_or("merkle branches not an array")?;
        let mut merkle_branches = Vec::with_capacity(branches.len());
        for branch in branches {
            let branch = branch.as_str().ok_or("merkle branch not a string")?;
            merkle_branches.push(parse_merkle_node(branch)?);
        }

        let version = u32::from_str_radix(params[5].as_str().ok_or("version not a string")?, 16)
            .map_err(|e| format!("version hex: {e}"))?;
        let bits = u32::from_str_radix(params[6].as_str().ok_or("nbits not a string")?, 16)
            .map_err(|e| format!("nbits hex: {e}"))?;
        let time = u32::from_str_radix(params[7].as_str().ok_or("ntime not a string")?, 16)
            .map_err(|e| format!("ntime hex: {e}"))?;

        let clean_jobs = params[8].as_bool().ok_or("clean_jobs not a bool")?;

        Ok(Self {
            job_id,
            prev_blockhash,
            coinbase1,
            coinbase2,
            merkle_branches,
            version: Version::from_consensus(version as i32),
            bits: CompactTarget::from_consensus(bits),
            time,
            clean_jobs,
        })
    }

    /// Materialize a [`Job`] with the connection's extranonce parameters.
    pub fn into_job(self, extranonce1: Vec<u8>, extranonce2_size: u8) -> Job {
        Job {
            job_id: self.job_id,
            prev_blockhash: self.prev_blockhash,
            coinbase1: self.coinbase1,
            coinbase2: self.coinbase2,
            merkle_branches: self.merkle_branches,
            version: self.version,
            bits: self.bits,
            time: self.time,
            clean_jobs: self.clean_jobs,
            extranonce1,
            extranonce2_size,
        }
    }
}

/// Parse the previous block hash from its wire encoding.
///
/// Stratum transmits the hash as 8 four-byte words, each word hex-encoded
/// big-endian while the word sequence stays little-endian. Reversing the
/// bytes within each word yields the internal byte order.
fn parse_prev_blockhash(hex_str: &str) -> Result<BlockHash, String> {
    let mut bytes = hex::decode(hex_str).map_err(|e| format!("prev_hash hex: {e}"))?;
    if bytes.len() != 32 {
        return Err(format!("prev_hash wrong length: {}", bytes.len()));
    }

    for word in bytes.chunks_mut(4) {
        word.reverse();
    }

    BlockHash::from_slice(&bytes).map_err(|e| format!("prev_hash parse: {e}"))
}

/// Parse a merkle branch hash (plain hex, already internal byte order).
fn parse_merkle_node(hex_str: &str) -> Result<TxMerkleNode, String> {
    let bytes = hex::decode(hex_str).map_err(|e| format!("merkle node hex: {e}"))?;
    if bytes.len() != 32 {
        return Err(format!("merkle node wrong length: {}", bytes.len()));
    }
    TxMerkleNode::from_slice(&bytes).map_err(|e| format!("merkle node parse: {e}"))
}

/// Parameters for `mining.submit`.
#[derive(Debug, Clone)]
pub struct SubmitParams {
    pub username: String,
    pub job_id: String,
    pub extranonce2: Vec<u8>,
    pub time: u32,
    pub nonce: u32,
}

impl SubmitParams {
    /// Encode as the wire params array: all numeric fields become 8-digit
    /// lowercase hex, extranonce2 is hex of its coinbase bytes.
    pub fn to_params(&self) -> Value {
        Value::Array(vec![
            Value::String(self.username.clone()),
            Value::String(self.job_id.clone()),
            Value::String(hex::encode(&self.extranonce2)),
            Value::String(format!("{:08x}", self.time)),
            Value::String(format!("{:08x}", self.nonce)),
        ])
    }
}

//! Job and share records.

use bitcoin::block::Version;
use bitcoin::hash_types::{BlockHash, TxMerkleNode};
use bitcoin::pow::CompactTarget;

use super::Extranonce2;

/// A pool-assigned unit of work.
///
/// Everything needed to build candidate block headers: the notify fields
/// plus the connection's extranonce parameters, captured at install time.
/// Jobs are immutable; a newer job supersedes an older one via the registry,
/// it never mutates it.
#[derive(Debug, Clone)]
pub struct Job {
    /// Pool-assigned job identifier, echoed back on submission
    pub job_id: String,

    /// Previous block hash
    pub prev_blockhash: BlockHash,

    /// Coinbase transaction prefix (before the extranonces)
    pub coinbase1: Vec<u8>,

    /// Coinbase transaction suffix (after the extranonces)
    pub coinbase2: Vec<u8>,

    /// Merkle branch hashes. Application order is significant: the branch
    /// fold determines the computed merkle root.
    pub merkle_branches: Vec<TxMerkleNode>,

    /// Block version field
    pub version: Version,

    /// Compact block target
    pub bits: CompactTarget,

    /// Block timestamp (Unix epoch seconds)
    pub time: u32,

    /// Pool signal that prior in-flight work should be discarded
    pub clean_jobs: bool,

    /// Pool-assigned extranonce1, spliced before extranonce2 in the coinbase
    pub extranonce1: Vec<u8>,

    /// Extranonce2 width in bytes
    pub extranonce2_size: u8,
}

/// A candidate solution found by a search worker.
///
/// Tagged with the registry generation it was found under so the submission
/// pipeline can reject stale work. Built once, sent once, never retried.
#[derive(Debug, Clone)]
pub struct Share {
    /// Registry generation of the snapshot the share was found under
    pub generation: u64,

    /// Job identifier from the snapshot
    pub job_id: String,

    /// Extranonce2 value used to build the coinbase
    pub extranonce2: Extranonce2,

    /// Block timestamp used in the header
    pub time: u32,

    /// Winning nonce
    pub nonce: u32,
}

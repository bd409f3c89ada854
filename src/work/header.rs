//! Candidate block header assembly.
//!
//! A header is built deterministically from the job fields: the coinbase is
//! reassembled as `coinbase1 ‖ extranonce1 ‖ extranonce2 ‖ coinbase2`, its
//! digest is folded up the merkle branch in order, and the 80-byte header is
//! serialized in consensus field order. Only the nonce varies within a
//! batch, so the header bytes are a reusable template.

use bitcoin::hashes::Hash;

use crate::hasher;

use super::{Extranonce2, Job};

/// Header length in bytes.
const HEADER_SIZE: usize = 80;

/// Byte offset of the nonce field within the serialized header.
const NONCE_OFFSET: usize = 76;

/// Compute the merkle root for a job at a specific extranonce2 value.
///
/// Returns the root in internal (little-endian) byte order, ready to embed
/// in a header.
pub fn merkle_root(job: &Job, extranonce2: &Extranonce2) -> [u8; 32] {
    let mut coinbase = Vec::with_capacity(
        job.coinbase1.len()
            + job.extranonce1.len()
            + extranonce2.size() as usize
            + job.coinbase2.len(),
    );
    coinbase.extend_from_slice(&job.coinbase1);
    coinbase.extend_from_slice(&job.extranonce1);
    extranonce2.extend_vec(&mut coinbase);
    coinbase.extend_from_slice(&job.coinbase2);

    let mut root = hasher::digest(&coinbase);

    // Fold the branch hashes in order; the coinbase side is always first.
    let mut combined = [0u8; 64];
    for branch in &job.merkle_branches {
        combined[..32].copy_from_slice(&root);
        combined[32..].copy_from_slice(branch.as_byte_array());
        root = hasher::digest(&combined);
    }

    root
}

/// A serialized candidate header with the nonce left to fill in.
pub struct HeaderTemplate {
    bytes: [u8; HEADER_SIZE],
}

impl HeaderTemplate {
    /// Assemble the header for a job at a specific extranonce2 value.
    pub fn build(job: &Job, extranonce2: &Extranonce2) -> Self {
        let root = merkle_root(job, extranonce2);

        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&job.version.to_consensus().to_le_bytes());
        bytes[4..36].copy_from_slice(job.prev_blockhash.as_byte_array());
        bytes[36..68].copy_from_slice(&root);
        bytes[68..72].copy_from_slice(&job.time.to_le_bytes());
        bytes[72..76].copy_from_slice(&job.bits.to_consensus().to_le_bytes());

        Self { bytes }
    }

    /// Digest of the header with the given nonce.
    pub fn digest(&mut self, nonce: u32) -> [u8; 32] {
        self.bytes[NONCE_OFFSET..].copy_from_slice(&nonce.to_le_bytes());
        hasher::digest(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::block::Version;
    use bitcoin::hash_types::{BlockHash, TxMerkleNode};
    use bitcoin::hashes::Hash;
    use bitcoin::pow::CompactTarget;

    fn test_job() -> Job {
        Job {
            job_id: "j1".to_string(),
            prev_blockhash: BlockHash::all_zeros(),
            coinbase1: vec![0x01, 0x02, 0x03],
            coinbase2: vec![0x04, 0x05, 0x06],
            merkle_branches: vec![],
            version: Version::TWO,
            bits: CompactTarget::from_consensus(0x1d00ffff),
            time: 1_700_000_000,
            clean_jobs: false,
            extranonce1: vec![0xaa, 0xbb],
            extranonce2_size: 2,
        }
    }

    #[test]
    fn test_merkle_root_without_branches_is_coinbase_digest() {
        let job = test_job();
        let e2 = Extranonce2::new(2).unwrap();

        let mut coinbase = Vec::new();
        coinbase.extend_from_slice(&[0x01, 0x02, 0x03]);
        coinbase.extend_from_slice(&[0xaa, 0xbb]);
        coinbase.extend_from_slice(&[0x00, 0x00]);
        coinbase.extend_from_slice(&[0x04, 0x05, 0x06]);

        assert_eq!(merkle_root(&job, &e2), hasher::digest(&coinbase));
    }

    #[test]
    fn test_merkle_root_varies_with_extranonce2() {
        let job = test_job();
        let mut e2 = Extranonce2::new(2).unwrap();
        let first = merkle_root(&job, &e2);
        e2.increment();
        assert_ne!(merkle_root(&job, &e2), first);
    }

    #[test]
    fn test_merkle_branch_order_matters() {
        let mut job = test_job();
        let a = TxMerkleNode::from_byte_array([0x11; 32]);
        let b = TxMerkleNode::from_byte_array([0x22; 32]);
        let e2 = Extranonce2::new(2).unwrap();

        job.merkle_branches = vec![a, b];
        let forward = merkle_root(&job, &e2);

        job.merkle_branches = vec![b, a];
        assert_ne!(merkle_root(&job, &e2), forward);
    }

    #[test]
    fn test_merkle_fold_matches_manual_computation() {
        let mut job = test_job();
        let branch = TxMerkleNode::from_byte_array([0x33; 32]);
        job.merkle_branches = vec![branch];
        let e2 = Extranonce2::new(2).unwrap();

        job.merkle_branches = vec![];
        let leaf = merkle_root(&job, &e2);

        let mut combined = Vec::new();
        combined.extend_from_slice(&leaf);
        combined.extend_from_slice(&[0x33; 32]);
        let expected = hasher::digest(&combined);

        job.merkle_branches = vec![branch];
        assert_eq!(merkle_root(&job, &e2), expected);
    }

    #[test]
    fn test_header_layout() {
        let job = test_job();
        let e2 = Extranonce2::new(2).unwrap();
        let mut template = HeaderTemplate::build(&job, &e2);

        // Digest must match hashing the serialized header by hand.
        let mut manual = [0u8; 80];
        manual[0..4].copy_from_slice(&2i32.to_le_bytes());
        // prev_blockhash is all zeros
        manual[36..68].copy_from_slice(&merkle_root(&job, &e2));
        manual[68..72].copy_from_slice(&1_700_000_000u32.to_le_bytes());
        manual[72..76].copy_from_slice(&0x1d00ffffu32.to_le_bytes());
        manual[76..80].copy_from_slice(&0xdeadbeefu32.to_le_bytes());

        assert_eq!(template.digest(0xdeadbeef), hasher::digest(&manual));
    }

    #[test]
    fn test_digest_varies_with_nonce() {
        let job = test_job();
        let e2 = Extranonce2::new(2).unwrap();
        let mut template = HeaderTemplate::build(&job, &e2);

        assert_ne!(template.digest(0), template.digest(1));
        // same nonce reproduces the same digest
        assert_eq!(template.digest(7), template.digest(7));
    }
}

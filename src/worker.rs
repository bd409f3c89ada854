//! Proof-of-work search workers.
//!
//! Each worker is a dedicated OS thread bound to a disjoint partition of
//! the 32-bit nonce space, so concurrent workers never duplicate work. A
//! worker snapshots the registry, builds a header template for its current
//! extranonce2, and scans nonces in batches. After every batch it re-reads
//! the registry generation: a mismatch abandons the remaining work and
//! re-snapshots. That poll is the entire cancellation mechanism; a worker
//! can overrun a job change by at most one batch.
//!
//! Exhausting the nonce partition without a generation change rolls
//! extranonce2 (wrapping within its size) for a fresh coinbase and merkle
//! root, then rescans the partition.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use primitive_types::U256;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::work::{target, Extranonce2, HeaderTemplate, JobRegistry, Poll, Share, Snapshot};

/// Why a scan of the current snapshot ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchEnd {
    /// A newer generation exists; re-snapshot and continue
    Superseded,

    /// Registry closed or share channel gone; exit the thread
    Stop,
}

/// Handles to running search workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Wait for all workers to exit. Call after closing the registry.
    pub fn join(self) {
        for handle in self.handles {
            if handle.join().is_err() {
                warn!("search worker panicked");
            }
        }
    }
}

/// Spawn `count` search workers over disjoint nonce partitions.
pub fn spawn(
    count: usize,
    batch_size: u32,
    registry: Arc<JobRegistry>,
    share_tx: mpsc::Sender<Share>,
) -> WorkerPool {
    let handles = partitions(count)
        .into_iter()
        .enumerate()
        .map(|(index, (nonce_lo, nonce_hi))| {
            let worker = Worker {
                index,
                nonce_lo,
                nonce_hi,
                batch_size: batch_size.max(1),
                registry: registry.clone(),
                share_tx: share_tx.clone(),
            };
            thread::Builder::new()
                .name(format!("search-{index}"))
                .spawn(move || worker.run())
                .expect("failed to spawn search worker")
        })
        .collect();

    info!(workers = count, batch_size, "search workers started");
    WorkerPool { handles }
}

/// Split the 32-bit nonce space into `count` disjoint inclusive ranges.
///
/// Sizes differ by at most one; together the ranges cover the full space.
fn partitions(count: usize) -> Vec<(u32, u32)> {
    let count = count.max(1);
    let total = 1u64 << 32;
    let chunk = total / count as u64;
    let remainder = total % count as u64;

    let mut ranges = Vec::with_capacity(count);
    let mut start = 0u64;
    for i in 0..count {
        let size = chunk + u64::from((i as u64) < remainder);
        let end = start + size - 1;
        ranges.push((start as u32, end as u32));
        start = end + 1;
    }
    ranges
}

struct Worker {
    index: usize,
    nonce_lo: u32,
    nonce_hi: u32,
    batch_size: u32,
    registry: Arc<JobRegistry>,
    share_tx: mpsc::Sender<Share>,
}

impl Worker {
    fn run(self) {
        debug!(
            worker = self.index,
            nonce_lo = format!("{:08x}", self.nonce_lo),
            nonce_hi = format!("{:08x}", self.nonce_hi),
            "search worker running"
        );

        let mut seen = 0;
        while let Some(snapshot) = self.registry.wait_for_change(seen) {
            seen = snapshot.generation;
            if self.search(&snapshot) == SearchEnd::Stop {
                break;
            }
        }

        debug!(worker = self.index, "search worker stopped");
    }

    /// Search one snapshot until it is superseded or the system stops.
    fn search(&self, snapshot: &Snapshot) -> SearchEnd {
        let job = &snapshot.job;
        let target = target::effective(job.bits, snapshot.difficulty);

        let mut extranonce2 = match Extranonce2::new(job.extranonce2_size) {
            Ok(e2) => e2,
            Err(e) => {
                // Skip the job; wait_for_change blocks until the next one.
                warn!(worker = self.index, error = %e, "unusable job");
                return SearchEnd::Superseded;
            }
        };

        loop {
            let mut header = HeaderTemplate::build(job, &extranonce2);
            if let Some(end) = self.scan_partition(&mut header, snapshot, &extranonce2, &target) {
                return end;
            }
            // Partition exhausted with the job still current: roll
            // extranonce2 for a fresh coinbase and rescan.
            extranonce2.increment();
        }
    }

    /// Scan the worker's nonce partition once. Returns `None` when the
    /// partition is exhausted and the snapshot is still current.
    fn scan_partition(
        &self,
        header: &mut HeaderTemplate,
        snapshot: &Snapshot,
        extranonce2: &Extranonce2,
        target: &U256,
    ) -> Option<SearchEnd> {
        let mut nonce = self.nonce_lo;
        loop {
            let span = (self.nonce_hi - nonce).min(self.batch_size - 1);
            let batch_hi = nonce + span;

            for candidate in nonce..=batch_hi {
                let digest = header.digest(candidate);
                if target::digest_below(&digest, target) {
                    let share = Share {
                        generation: snapshot.generation,
                        job_id: snapshot.job.job_id.clone(),
                        extranonce2: *extranonce2,
                        time: snapshot.job.time,
                        nonce: candidate,
                    };

                    debug!(
                        worker = self.index,
                        job_id = %share.job_id,
                        nonce = format!("{:08x}", candidate),
                        "solution found"
                    );

                    if self.share_tx.blocking_send(share).is_err() {
                        return Some(SearchEnd::Stop);
                    }
                }
            }

            match self.registry.poll(snapshot.generation) {
                Poll::Current => {}
                Poll::Superseded => return Some(SearchEnd::Superseded),
                Poll::Closed => return Some(SearchEnd::Stop),
            }

            if batch_hi == self.nonce_hi {
                return None;
            }
            nonce = batch_hi + 1;
        }
    }
}

//! Generation-counted job registry.
//!
//! The registry holds the authoritative `(generation, job, difficulty)`
//! triple. The session task is the sole writer; search workers read. A
//! snapshot is taken under one lock, so a reader can never observe a
//! generation paired with a different job than the one installed alongside
//! it. The generation strictly increases on every install, even when the
//! job content is unchanged: generation change is the only cancellation
//! signal workers trust.
//!
//! Waiting workers block on a condvar rather than sleep-polling. Closing
//! the registry wakes them all; the generation alone cannot signal
//! permanent shutdown.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::Job;

/// A consistent view of the registry at a point in time.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Generation the job/difficulty pair was installed under
    pub generation: u64,

    /// The job authoritative at that generation
    pub job: Arc<Job>,

    /// Difficulty paired with the job
    pub difficulty: f64,
}

/// Result of a cheap between-batches registry check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// The observed generation is still authoritative
    Current,

    /// A newer generation was installed; re-snapshot
    Superseded,

    /// The registry was closed; stop searching
    Closed,
}

struct Inner {
    generation: u64,
    current: Option<(Arc<Job>, f64)>,
    closed: bool,
}

/// Shared registry handle.
pub struct JobRegistry {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                generation: 0,
                current: None,
                closed: false,
            }),
            changed: Condvar::new(),
        })
    }

    /// Install a job/difficulty pair, superseding the previous one.
    ///
    /// Returns the new generation. The generation increases even when the
    /// job is identical to the previous one.
    pub fn install(&self, job: Arc<Job>, difficulty: f64) -> u64 {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.current = Some((job, difficulty));
        self.changed.notify_all();
        inner.generation
    }

    /// The current snapshot, or `None` before the first install.
    pub fn current(&self) -> Option<Snapshot> {
        let inner = self.inner.lock();
        inner.current.as_ref().map(|(job, difficulty)| Snapshot {
            generation: inner.generation,
            job: job.clone(),
            difficulty: *difficulty,
        })
    }

    /// The current generation (0 before the first install).
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Compare an observed generation against the registry state.
    pub fn poll(&self, seen: u64) -> Poll {
        let inner = self.inner.lock();
        if inner.closed {
            Poll::Closed
        } else if inner.generation != seen {
            Poll::Superseded
        } else {
            Poll::Current
        }
    }

    /// Block until a generation other than `seen` is installed.
    ///
    /// Returns `None` once the registry is closed.
    pub fn wait_for_change(&self, seen: u64) -> Option<Snapshot> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if inner.generation != seen {
                if let Some((job, difficulty)) = &inner.current {
                    return Some(Snapshot {
                        generation: inner.generation,
                        job: job.clone(),
                        difficulty: *difficulty,
                    });
                }
            }
            self.changed.wait(&mut inner);
        }
    }

    /// Close the registry, waking all waiting workers.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.changed.notify_all();
    }
}

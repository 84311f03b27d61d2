//! Task execution: a multi-threaded pool for CPU-bound pack/compress/
//! decompress work, and a single-threaded FIFO executor for per-segment
//! write ordering.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Wraps a `rayon` thread pool sized to the host's CPU count by default.
/// Used for chunk packing/compression, which is embarrassingly parallel
/// across independent chunks and independent of write ordering.
pub struct Executor {
    pool: rayon::ThreadPool,
}

impl Executor {
    pub fn new(num_threads: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .expect("failed to build rayon thread pool");
        Self { pool }
    }

    pub fn with_default_parallelism() -> Self {
        Self::new(num_cpus::get())
    }

    /// Run `f` on the pool and block the caller until it completes,
    /// returning its result.
    pub fn execute<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        self.pool.install(f)
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single background thread draining a FIFO queue of jobs. `FileChunk`'s
/// write path uses one of these per segment so concurrent producers can
/// submit flush/append work without racing over which one lands in the
/// `.dat`/`.idx` files first — jobs run in the order they were sent, never
/// reordered or run concurrently with each other.
pub struct SequentialExecutor {
    sender: Sender<Job>,
    worker: Option<JoinHandle<()>>,
}

impl SequentialExecutor {
    pub fn new() -> Self {
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = unbounded();
        let worker = std::thread::spawn(move || {
            for job in receiver {
                job();
            }
        });
        Self {
            sender,
            worker: Some(worker),
        }
    }

    /// Enqueue `job`. Panics if the worker thread has already been shut
    /// down via `Drop` — callers must not submit after dropping.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.sender
            .send(Box::new(job))
            .expect("sequential executor worker is gone");
    }

    /// Submit `f` and block until it has run, returning its result.
    pub fn submit_and_wait<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = unbounded();
        self.submit(move || {
            let _ = reply_tx.send(f());
        });
        reply_rx.recv().expect("sequential executor dropped result")
    }
}

impl Default for SequentialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SequentialExecutor {
    fn drop(&mut self) {
        // Dropping `sender` (implicitly, once all clones are gone) closes
        // the channel; the worker's `for job in receiver` loop then ends.
        if let Some(handle) = self.worker.take() {
            drop(std::mem::replace(&mut self.sender, unbounded().0));
            let _ = handle.join();
        }
    }
}

/// Shared handle to an [`Executor`], cheap to clone and pass to every
/// segment.
pub type SharedExecutor = Arc<Executor>;

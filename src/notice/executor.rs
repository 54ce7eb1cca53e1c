//--------------------------------------------------------------------------------------------------
// STRUCTS & TRAITS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                              | Key Methods        |
// |---------------|----------------------------------------------------------|--------------------|
// | Executor      | Host-supplied pool running dispatch jobs                 | execute            |
// | WorkerPool    | Fixed set of OS threads fed by a crossbeam channel       | new, shutdown      |
//--------------------------------------------------------------------------------------------------

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs somewhere other than the calling thread.
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs jobs on the blocking pool of a tokio runtime.
impl Executor for tokio::runtime::Handle {
    fn execute(&self, job: Job) {
        let _ = self.spawn_blocking(job);
    }
}

/// Fixed-size pool of named worker threads.
///
/// Jobs are queued on an unbounded channel and picked up by whichever worker is free. A job
/// that panics is logged and the worker keeps going.
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `threads` workers (at least one) named `{name}-{index}`.
    pub fn new(name: impl Into<String>, threads: usize) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads.max(1));

        for index in 0..threads.max(1) {
            let rx = rx.clone();
            let worker_name = format!("{}-{}", name, index);
            let handle = thread::Builder::new().name(worker_name.clone()).spawn(move || {
                debug!("Worker {} started", worker_name);
                while let Ok(job) = rx.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("Job panicked on worker {}", worker_name);
                    }
                }
                debug!("Worker {} stopped", worker_name);
            })?;
            workers.push(handle);
        }

        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stops accepting jobs, lets the workers drain the queue and joins them.
    ///
    /// Must not be called from one of this pool's own workers.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!("Worker of pool {} exited abnormally", self.name);
            }
        }
    }
}

impl Executor for WorkerPool {
    fn execute(&self, job: Job) {
        let sender = self.sender.lock().clone();
        match sender {
            Some(tx) => {
                if tx.send(job).is_err() {
                    warn!("Worker pool {} is gone, job dropped", self.name);
                }
            }
            None => warn!("Worker pool {} is shut down, job dropped", self.name),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel is enough for the workers to exit once the queue is empty.
        self.sender.get_mut().take();
    }
}

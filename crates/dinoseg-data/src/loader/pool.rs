//! Bounded worker pool used by the loader.
//!
//! Workers pull tasks from one shared bounded channel and push results to a
//! second bounded channel. Dropping the pool raises the shutdown flag, closes
//! the task channel and joins every worker.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{DatasetError, DatasetResult};

pub(crate) struct WorkerPool<Task, Output> {
    workers: Vec<thread::JoinHandle<()>>,
    task_tx: Option<Sender<Task>>,
    output_rx: Receiver<Output>,
    shutdown: Arc<AtomicBool>,
}

impl<Task, Output> WorkerPool<Task, Output>
where
    Task: Send + 'static,
    Output: Send + 'static,
{
    /// Spawns `num_workers` threads running `worker_fn`.
    ///
    /// `worker_fn` receives its worker id, the task receiver, the output
    /// sender and the shutdown flag. Both channels hold `capacity` messages.
    pub(crate) fn new<F>(num_workers: usize, capacity: usize, worker_fn: F) -> DatasetResult<Self>
    where
        F: Fn(usize, Receiver<Task>, Sender<Output>, &AtomicBool) + Send + Sync + 'static,
    {
        if num_workers == 0 || capacity == 0 {
            return Err(DatasetError::InvalidConfiguration {
                reason: format!(
                    "worker pool needs a worker and a slot, got {num_workers} workers, \
                     {capacity} slots"
                ),
            });
        }

        let (task_tx, task_rx) = bounded(capacity);
        let (output_tx, output_rx) = bounded(capacity);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_fn = Arc::new(worker_fn);
        let mut workers = Vec::with_capacity(num_workers);

        for worker in 0..num_workers {
            let task_rx = task_rx.clone();
            let output_tx = output_tx.clone();
            let shutdown = Arc::clone(&shutdown);
            let worker_fn = Arc::clone(&worker_fn);

            let handle = thread::Builder::new()
                .name(format!("dinoseg-loader-{worker}"))
                .spawn(move || worker_fn(worker, task_rx, output_tx, &*shutdown))
                .map_err(|source| DatasetError::WorkerSpawnFailed { worker, source })?;
            workers.push(handle);
        }

        Ok(Self {
            workers,
            task_tx: Some(task_tx),
            output_rx,
            shutdown,
        })
    }

    /// Queues a task. Blocks while the task channel is full.
    pub(crate) fn submit(&self, task: Task) -> DatasetResult<()> {
        self.task_tx
            .as_ref()
            .ok_or(DatasetError::WorkerDisconnected)?
            .send(task)
            .map_err(|_| DatasetError::WorkerDisconnected)
    }

    /// Waits for the next finished output.
    pub(crate) fn recv(&self) -> DatasetResult<Output> {
        self.output_rx
            .recv()
            .map_err(|_| DatasetError::WorkerDisconnected)
    }
}

impl<Task, Output> Drop for WorkerPool<Task, Output> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.task_tx.take();

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("loader worker exited with a panic");
            }
        }
    }
}

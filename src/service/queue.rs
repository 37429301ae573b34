//! Single-owner FIFO work queue
//!
//! State lives on a dedicated thread. Jobs are closures over `&mut S`, run
//! one at a time in submission order. A job that panics is logged and
//! dropped; the jobs behind it still run.

use log::{error, trace};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The owner thread has stopped
    #[error("Work queue closed")]
    Closed,

    /// The job panicked before producing a result
    #[error("Job dropped before completion")]
    JobDropped,

    #[error("Failed to spawn queue thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub struct WorkQueue<S> {
    sender: mpsc::UnboundedSender<Job<S>>,
    pending: Arc<AtomicUsize>,
}

impl<S: Send + 'static> WorkQueue<S> {
    /// Move `state` onto a new thread named `name`
    pub fn new(name: &str, mut state: S) -> Result<Self, QueueError> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job<S>>();
        let pending = Arc::new(AtomicUsize::new(0));
        let counter = pending.clone();
        let thread_name = name.to_string();

        thread::Builder::new().name(thread_name.clone()).spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                if catch_unwind(AssertUnwindSafe(|| job(&mut state))).is_err() {
                    error!("Job on queue {} panicked", thread_name);
                }
                counter.fetch_sub(1, Ordering::SeqCst);
            }
            trace!("Queue {} stopped", thread_name);
        })?;

        Ok(Self { sender, pending })
    }

    /// Enqueue `job` and return a receiver for its result.
    ///
    /// The job's position in the queue is fixed when this returns, whether or
    /// not the receiver is ever awaited.
    pub fn submit<F, R>(&self, job: F) -> Result<oneshot::Receiver<R>, QueueError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = oneshot::channel();
        let boxed: Job<S> = Box::new(move |state| {
            // The caller may have stopped waiting
            let _ = reply.send(job(state));
        });

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(boxed).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        Ok(result)
    }

    /// Enqueue `job` and wait for its result
    pub async fn run<F, R>(&self, job: F) -> Result<R, QueueError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(job)?.await.map_err(|_| QueueError::JobDropped)
    }

    /// Whether any submitted job has not finished yet
    pub fn is_busy(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let queue = WorkQueue::new("test-order", Vec::new()).unwrap();

        let receivers: Vec<_> = (0..100)
            .map(|i| {
                queue
                    .submit(move |log: &mut Vec<u32>| {
                        log.push(i);
                        log.len()
                    })
                    .unwrap()
            })
            .collect();

        for (i, receiver) in receivers.into_iter().enumerate() {
            assert_eq!(receiver.await.unwrap(), i + 1);
        }

        let log = queue.run(|log: &mut Vec<u32>| log.clone()).await.unwrap();
        assert_eq!(log, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_queue() {
        let queue = WorkQueue::new("test-panic", 0u32).unwrap();

        let failed = queue.run(|_: &mut u32| -> u32 { panic!("boom") }).await;
        assert!(matches!(failed, Err(QueueError::JobDropped)));

        let value = queue
            .run(|count: &mut u32| {
                *count += 1;
                *count
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_busy_while_job_runs() {
        let queue = WorkQueue::new("test-busy", ()).unwrap();
        assert!(!queue.is_busy());

        let receiver = queue
            .submit(|_: &mut ()| thread::sleep(Duration::from_millis(50)))
            .unwrap();
        assert!(queue.is_busy());

        receiver.await.unwrap();
        // The counter drops right after the reply is sent
        for _ in 0..100 {
            if !queue.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!queue.is_busy());
    }
}

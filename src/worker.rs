// Background task queue
//
// A single worker thread draining closures off an unbounded channel. The
// send side never blocks, so real-time callers can hand work off without
// risking a stall. The worker exits once every queue handle is dropped and
// the backlog is drained.

use colored::Colorize;
use std::thread;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle to the background worker. Clones share the same thread.
#[derive(Clone)]
pub struct TaskQueue {
    sender: crossbeam_channel::Sender<Job>,
}

impl TaskQueue {
    /// Spawn the worker thread
    pub fn new(label: &str) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let thread_label = label.to_string();
        let spawn_result = thread::Builder::new()
            .name(thread_label.clone())
            .spawn(move || {
                debug!("Task queue worker '{}' started", thread_label);
                while let Ok(job) = receiver.recv() {
                    job();
                }
                debug!("Task queue worker '{}' drained and stopped", thread_label);
            });
        if let Err(e) = spawn_result {
            warn!(
                "{} Failed to spawn task queue worker: {}",
                "TASK_QUEUE_WARN".bright_yellow(),
                e
            );
        }
        Self { sender }
    }

    /// Enqueue a job. Never blocks.
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        if self.sender.send(Box::new(job)).is_err() {
            warn!(
                "{} Task queue worker is gone, dropping job",
                "TASK_QUEUE_WARN".bright_yellow()
            );
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.sender.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_in_order() {
        let queue = TaskQueue::new("test-queue");
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        for i in 0..4 {
            let log = Arc::clone(&log);
            queue.enqueue(move || log.lock().unwrap().push(i));
        }
        queue.enqueue(move || {
            let _ = done_tx.send(());
        });

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker should drain the queue");
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_clones_share_one_worker() {
        let queue = TaskQueue::new("test-queue-clone");
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let clone = queue.clone();
        let counter_a = Arc::clone(&counter);
        queue.enqueue(move || {
            counter_a.fetch_add(1, Ordering::SeqCst);
        });
        let counter_b = Arc::clone(&counter);
        clone.enqueue(move || {
            counter_b.fetch_add(1, Ordering::SeqCst);
            let _ = done_tx.send(());
        });

        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("both jobs should run");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}

//! Sequenced task executor
//!
//! Tasks tagged with the same id run serially in submission order; tasks
//! with distinct tags may run on distinct threads concurrently. The invert
//! and push stages of the pipeline each get one executor.

use crossbeam::channel::{unbounded, Sender};
use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;
use std::thread::JoinHandle;

/// Executor contract consumed by the indexing pipeline.
pub trait SequencedTaskExecutor: Send + Sync {
    /// Enqueue `task` on the queue identified by `tag`.
    fn execute(&self, tag: u32, task: Box<dyn FnOnce() + Send>);

    /// Return only after every task enqueued so far has completed.
    fn sync_all(&self);
}

/// Convenience for submitting closures without boxing at the call site.
pub trait SequencedTaskExecutorExt {
    fn execute_fn<F: FnOnce() + Send + 'static>(&self, tag: u32, f: F);
}

impl<T: SequencedTaskExecutor + ?Sized> SequencedTaskExecutorExt for T {
    fn execute_fn<F: FnOnce() + Send + 'static>(&self, tag: u32, f: F) {
        self.execute(tag, Box::new(f));
    }
}

enum Job {
    Task(Box<dyn FnOnce() + Send>),
    Sync(WaitGroup),
    Stop,
}

/// Fixed pool of single-threaded workers with FIFO queues. A tag is bound
/// to one worker (`tag % workers`), which serialises all tasks for it.
pub struct ThreadedSequencedExecutor {
    senders: Vec<Sender<Job>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadedSequencedExecutor {
    pub fn new(num_workers: usize, name: &str) -> Self {
        assert!(num_workers > 0);
        let mut senders = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);
        for i in 0..num_workers {
            let (tx, rx) = unbounded::<Job>();
            let thread_name = format!("{}-{}", name, i);
            let handle = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    for job in rx.iter() {
                        match job {
                            Job::Task(task) => task(),
                            Job::Sync(wg) => drop(wg),
                            Job::Stop => break,
                        }
                    }
                })
                .expect("failed to spawn executor worker");
            senders.push(tx);
            handles.push(handle);
        }
        Self {
            senders,
            handles: Mutex::new(handles),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.senders.len()
    }
}

impl SequencedTaskExecutor for ThreadedSequencedExecutor {
    fn execute(&self, tag: u32, task: Box<dyn FnOnce() + Send>) {
        let worker = (tag as usize) % self.senders.len();
        // Send only fails after shutdown, when no more work is accepted.
        let _ = self.senders[worker].send(Job::Task(task));
    }

    fn sync_all(&self) {
        let wg = WaitGroup::new();
        for sender in &self.senders {
            let _ = sender.send(Job::Sync(wg.clone()));
        }
        wg.wait();
    }
}

impl Drop for ThreadedSequencedExecutor {
    fn drop(&mut self) {
        for sender in &self.senders {
            let _ = sender.send(Job::Stop);
        }
        for handle in self.handles.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

//! Minimal job-scheduling contract used for user-facing callbacks.
//!
//! The node does not run application callbacks under its own lock. It posts
//! them to a [`Scheduler`], and the owner decides where they run.

use crossbeam::queue::SegQueue;

/// A deferred unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that accepts jobs and hands them back for execution.
pub trait Scheduler: Send + Sync {
    /// Queue a job for execution.
    fn post_job(&self, job: Job);

    /// Take the next job, if any.
    fn pop_job(&self) -> Option<Job>;

    /// Whether a job is waiting.
    fn has_job(&self) -> bool;

    /// Run queued jobs until none remain. Returns how many ran.
    fn run_to_completion(&self) -> usize {
        let mut count = 0;
        while let Some(job) = self.pop_job() {
            job();
            count += 1;
        }
        count
    }
}

/// Runs every job on the posting thread, immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn post_job(&self, job: Job) {
        job();
    }

    fn pop_job(&self) -> Option<Job> {
        None
    }

    fn has_job(&self) -> bool {
        false
    }
}

/// Lock-free FIFO; jobs run when the owner drains it.
#[derive(Default)]
pub struct QueueScheduler {
    jobs: SegQueue<Job>,
}

impl QueueScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Scheduler for QueueScheduler {
    fn post_job(&self, job: Job) {
        self.jobs.push(job);
    }

    fn pop_job(&self) -> Option<Job> {
        self.jobs.pop()
    }

    fn has_job(&self) -> bool {
        !self.jobs.is_empty()
    }
}

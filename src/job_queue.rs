//! FIFO microtask queue with a single flush per idle period.

use std::collections::VecDeque;

use parking_lot::Mutex;

#[derive(Debug)]
struct Inner<J> {
    jobs: VecDeque<J>,
    /// A drain has been requested from the host and has not finished yet.
    scheduled: bool,
    draining: bool,
}

/// Resets the flags when a drain unwinds out of a job.
struct DrainGuard<'a, J> {
    inner: &'a Mutex<Inner<J>>,
    finished: bool,
}

impl<J> Drop for DrainGuard<'_, J> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut inner = self.inner.lock();
        inner.draining = false;
        inner.scheduled = false;
        tracing::warn!(
            remaining = inner.jobs.len(),
            "job panicked, drain abandoned"
        );
    }
}

#[derive(Debug)]
pub struct JobQueue<J> {
    inner: Mutex<Inner<J>>,
}

impl<J> Default for JobQueue<J> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                jobs: VecDeque::new(),
                scheduled: false,
                draining: false,
            }),
        }
    }
}

impl<J> JobQueue<J> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `job` to the tail.
    ///
    /// Returns `true` when the caller must ask the host for a drain: the
    /// first push of an idle period. Pushes made while a drain is scheduled
    /// or running ride along with it.
    pub fn push(&self, job: J) -> bool {
        let mut inner = self.inner.lock();
        inner.jobs.push_back(job);
        if inner.scheduled {
            false
        } else {
            inner.scheduled = true;
            true
        }
    }

    /// Pops and runs jobs from the head until the queue is empty, including
    /// jobs pushed by the jobs themselves, then clears the scheduled flag.
    ///
    /// The lock is released while `run` executes. A nested call made from
    /// inside `run` returns `0` without running anything; the outer drain
    /// picks up whatever was queued. If `run` panics, the panicking job is
    /// dropped, the rest stay queued and the queue is idle again, so the
    /// next push or drain proceeds normally.
    pub fn drain(&self, mut run: impl FnMut(J)) -> usize {
        {
            let mut inner = self.inner.lock();
            if inner.draining {
                return 0;
            }
            inner.draining = true;
        }
        let mut guard = DrainGuard {
            inner: &self.inner,
            finished: false,
        };
        let mut ran = 0;
        loop {
            let job = {
                let mut inner = self.inner.lock();
                match inner.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        inner.draining = false;
                        inner.scheduled = false;
                        guard.finished = true;
                        break;
                    }
                }
            };
            run(job);
            ran += 1;
        }
        ran
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_scheduled(&self) -> bool {
        self.inner.lock().scheduled
    }
}

//! The lock's state machine: key queues, admission, overflow and completion.
//!
//! The scheduler is synchronous and owns no timers. Every mutating call
//! returns what its driver has to do next: execute a job that now holds all
//! of its keys, or end a job that was kicked out of a full queue.

use std::collections::{HashMap, HashSet};

use crate::job::{Job, JobId};
use crate::key::LockKey;
use crate::options::OverflowStrategy;
use crate::queue::{KeyQueue, KeyStats, LockStats};

/// Follow-up work produced by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The job holds every key it asked for and should be executed.
    Ready(JobId),
    /// The job was selected for eviction from `key`'s wait queue and should be
    /// ended with an overflow error. `job_count` is the queue length that
    /// triggered the eviction.
    Overflow {
        job: JobId,
        key: LockKey,
        job_count: usize,
    },
}

/// A job that was about to execute without holding one of its keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Corrupted wait queue state for {key}")]
pub struct Corrupted {
    pub key: LockKey,
}

/// A job removed from the scheduler.
#[derive(Debug)]
pub struct Ended<T> {
    pub job: Job<T>,
    /// Keys whose queue did not know about the job.
    pub strays: Vec<LockKey>,
}

/// Per-lock scheduling state.
pub struct Scheduler<T> {
    queues: HashMap<LockKey, KeyQueue>,
    jobs: HashMap<JobId, Job<T>>,
    queue_size: Option<usize>,
    overflow_strategy: OverflowStrategy,
}

impl<T> Scheduler<T> {
    /// Create a scheduler with unbounded queues.
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            jobs: HashMap::new(),
            queue_size: None,
            overflow_strategy: OverflowStrategy::default(),
        }
    }

    /// Bound the number of waiting jobs per key.
    pub fn with_queue_size(mut self, queue_size: Option<usize>) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_overflow_strategy(mut self, strategy: OverflowStrategy) -> Self {
        self.overflow_strategy = strategy;
        self
    }

    /// Check if `key` has neither a holder nor waiters. Does not create a queue.
    pub fn can_acquire(&self, key: &LockKey) -> bool {
        self.queues.get(key).is_none_or(KeyQueue::is_free)
    }

    /// Register a job and run admission over its keys.
    ///
    /// A job without keys is ready immediately.
    pub fn enqueue(&mut self, job: Job<T>) -> Vec<Transition> {
        let id = job.id;
        let keys = job.keys().to_vec();
        self.jobs.insert(id, job);

        if keys.is_empty() {
            return vec![Transition::Ready(id)];
        }

        for key in &keys {
            self.queues
                .entry(key.clone())
                .or_insert_with(|| KeyQueue::new(key.clone()))
                .push(id);
        }

        self.update(&keys)
    }

    /// Admission pass over the given keys.
    ///
    /// Each free key goes to the head of its line. Afterwards, queues over the
    /// configured size pick jobs to evict.
    pub fn update(&mut self, keys: &[LockKey]) -> Vec<Transition> {
        let mut transitions = Vec::new();
        let mut evicted = HashSet::new();

        for key in keys {
            let Some(queue) = self.queues.get_mut(key) else {
                continue;
            };

            if let Some(id) = queue.grant_next()
                && let Some(job) = self.jobs.get_mut(&id)
                && job.grant_one()
            {
                transitions.push(Transition::Ready(id));
            }

            if let Some(limit) = self.queue_size {
                let job_count = queue.len();
                for (i, victim) in queue
                    .overflow(limit, self.overflow_strategy)
                    .into_iter()
                    .enumerate()
                {
                    if evicted.insert(victim) {
                        transitions.push(Transition::Overflow {
                            job: victim,
                            key: key.clone(),
                            job_count: job_count - i,
                        });
                    }
                }
            }
        }

        transitions
    }

    /// Mark a ready job as executing.
    ///
    /// Returns `Ok(None)` if the job already ended or already started, and
    /// `Err` if it does not hold every one of its keys.
    pub fn start(&mut self, id: JobId) -> Result<Option<&mut Job<T>>, Corrupted> {
        let Some(job) = self.jobs.get(&id) else {
            return Ok(None);
        };
        if job.executed_at().is_some() || job.ended_at().is_some() {
            return Ok(None);
        }

        for key in job.keys() {
            let held = self
                .queues
                .get(key)
                .is_some_and(|queue| queue.is_held_by(id));
            if !held {
                return Err(Corrupted { key: key.clone() });
            }
        }

        Ok(self.jobs.get_mut(&id).map(|job| {
            job.mark_executed();
            job
        }))
    }

    /// Remove a job from every queue it holds or waits in.
    ///
    /// Returns `None` if the job is unknown, which means it already ended.
    /// Admission over the job's keys is left to the caller.
    pub fn end(&mut self, id: JobId) -> Option<Ended<T>> {
        let mut job = self.jobs.remove(&id)?;
        job.mark_ended();

        let mut strays = Vec::new();
        for key in job.keys() {
            let found = match self.queues.get_mut(key) {
                Some(queue) => queue.release(id) || queue.remove_waiting(id),
                None => false,
            };
            if !found {
                strays.push(key.clone());
            }
        }

        Some(Ended { job, strays })
    }

    /// Jobs an abort of `key` ends: every waiter, then the holder unless it is executing.
    pub fn abort(&self, key: &LockKey) -> Vec<JobId> {
        let Some(queue) = self.queues.get(key) else {
            return Vec::new();
        };

        let mut victims: Vec<JobId> = queue.waiting().collect();
        if let Some(active) = queue.active()
            && self
                .jobs
                .get(&active)
                .is_some_and(|job| job.executed_at().is_none())
        {
            victims.push(active);
        }
        victims
    }

    /// The default key followed by every other key with a queue.
    pub fn keys(&self) -> Vec<LockKey> {
        let mut keys: Vec<LockKey> = self
            .queues
            .keys()
            .filter(|key| !key.is_default())
            .cloned()
            .collect();
        keys.sort();
        keys.insert(0, LockKey::Default);
        keys
    }

    pub fn get(&self, id: JobId) -> Option<&Job<T>> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job<T>> {
        self.jobs.get_mut(&id)
    }

    pub fn queue(&self, key: &LockKey) -> Option<&KeyQueue> {
        self.queues.get(key)
    }

    /// Ids of jobs that have not ended, oldest first.
    pub fn live_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> LockStats {
        let mut queues: Vec<KeyStats> = self.queues.values().map(KeyStats::from).collect();
        queues.sort_by(|a, b| a.key.cmp(&b.key));
        LockStats {
            queues,
            jobs: self.jobs.len(),
        }
    }

    /// Drop idle queues. Returns how many were dropped.
    pub fn prune(&mut self) -> usize {
        let before = self.queues.len();
        self.queues.retain(|_, queue| !queue.is_free());
        before - self.queues.len()
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queues", &self.queues.len())
            .field("jobs", &self.jobs.len())
            .field("queue_size", &self.queue_size)
            .field("overflow_strategy", &self.overflow_strategy)
            .finish()
    }
}

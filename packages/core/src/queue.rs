//! Per-key queue of the job holding a key and the jobs waiting for it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::job::JobId;
use crate::key::LockKey;
use crate::options::OverflowStrategy;

/// Holder and FIFO waiters for one key.
///
/// A job is never both `active` and waiting in the same queue, and appears
/// at most once among the waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyQueue {
    key: LockKey,
    /// Job holding this key. It may still be waiting on other keys, or executing.
    active: Option<JobId>,
    /// Jobs waiting for this key, oldest first.
    jobs: VecDeque<JobId>,
}

impl KeyQueue {
    /// Create an empty queue for the given key.
    pub fn new(key: LockKey) -> Self {
        Self {
            key,
            active: None,
            jobs: VecDeque::new(),
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn active(&self) -> Option<JobId> {
        self.active
    }

    /// Waiting jobs, oldest first.
    pub fn waiting(&self) -> impl Iterator<Item = JobId> + '_ {
        self.jobs.iter().copied()
    }

    /// Number of waiting jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Check if the key could be granted right now: no holder and nobody waiting.
    pub fn is_free(&self) -> bool {
        self.active.is_none() && self.jobs.is_empty()
    }

    /// Append a waiting job. Returns false if it was already queued or holds the key.
    pub fn push(&mut self, job_id: JobId) -> bool {
        if self.active == Some(job_id) || self.jobs.contains(&job_id) {
            return false;
        }
        self.jobs.push_back(job_id);
        true
    }

    /// Hand the key to the head of the line if nobody holds it.
    pub fn grant_next(&mut self) -> Option<JobId> {
        if self.active.is_some() {
            return None;
        }
        let next = self.jobs.pop_front()?;
        self.active = Some(next);
        Some(next)
    }

    /// Check if the given job holds this key.
    pub fn is_held_by(&self, job_id: JobId) -> bool {
        self.active == Some(job_id)
    }

    /// Release the key if the given job holds it.
    pub fn release(&mut self, job_id: JobId) -> bool {
        if self.is_held_by(job_id) {
            self.active = None;
            true
        } else {
            false
        }
    }

    /// Remove a waiting job. Returns false if it was not waiting here.
    pub fn remove_waiting(&mut self, job_id: JobId) -> bool {
        match self.jobs.iter().position(|id| *id == job_id) {
            Some(index) => {
                self.jobs.remove(index);
                true
            }
            None => false,
        }
    }

    /// Pick the waiting jobs to evict so that at most `limit` remain.
    ///
    /// Nothing is removed here; evicted jobs leave the queue when they end.
    pub fn overflow(&self, limit: usize, strategy: OverflowStrategy) -> Vec<JobId> {
        let len = self.jobs.len();
        if len <= limit {
            return Vec::new();
        }
        let excess = len - limit;
        let range = match strategy {
            OverflowStrategy::EvictNewest => len - excess..len,
            OverflowStrategy::EvictOldest => 0..excess,
            OverflowStrategy::ReplaceNewest => {
                // Keep the newest arrival, drop the ones queued just before it.
                // With no room at all, the newest goes too.
                if limit == 0 {
                    0..len
                } else {
                    len - 1 - excess..len - 1
                }
            }
        };
        // Newest victims first, matching the order they would be kicked out.
        range.rev().filter_map(|i| self.jobs.get(i).copied()).collect()
    }
}

impl std::fmt::Display for KeyQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            LockKey::Default => write!(f, "JobQueue"),
            LockKey::Named(key) => write!(f, "JobQueue<{}>", key),
        }
    }
}

/// Snapshot of one key's queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStats {
    pub key: LockKey,
    /// Job holding the key, if any.
    pub active: Option<JobId>,
    /// Number of jobs waiting for the key.
    pub waiting: usize,
}

impl From<&KeyQueue> for KeyStats {
    fn from(queue: &KeyQueue) -> Self {
        Self {
            key: queue.key.clone(),
            active: queue.active,
            waiting: queue.jobs.len(),
        }
    }
}

/// Snapshot of a whole lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    /// Known key queues, ordered by key.
    pub queues: Vec<KeyStats>,
    /// Jobs that have not ended yet.
    pub jobs: usize,
}

impl LockStats {
    /// Stats for one key, if its queue exists.
    pub fn queue(&self, key: &LockKey) -> Option<&KeyStats> {
        self.queues.iter().find(|q| &q.key == key)
    }

    /// Total number of waiting jobs across keys.
    pub fn waiting(&self) -> usize {
        self.queues.iter().map(|q| q.waiting).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(ids: &[u64]) -> KeyQueue {
        let mut queue = KeyQueue::new(LockKey::named("k"));
        for id in ids {
            queue.push(JobId(*id));
        }
        queue
    }

    #[test]
    fn grants_in_fifo_order() {
        let mut queue = queue_with(&[1, 2, 3]);
        assert_eq!(queue.grant_next(), Some(JobId(1)));
        assert_eq!(queue.grant_next(), None);
        assert!(queue.release(JobId(1)));
        assert_eq!(queue.grant_next(), Some(JobId(2)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn rejects_duplicates() {
        let mut queue = queue_with(&[1]);
        assert!(!queue.push(JobId(1)));
        queue.grant_next();
        assert!(!queue.push(JobId(1)));
        assert!(queue.push(JobId(2)));
    }

    #[test]
    fn free_only_without_holder_or_waiters() {
        let mut queue = KeyQueue::new(LockKey::Default);
        assert!(queue.is_free());
        queue.push(JobId(1));
        assert!(!queue.is_free());
        queue.grant_next();
        assert!(!queue.is_free());
        queue.release(JobId(1));
        assert!(queue.is_free());
    }

    #[test]
    fn remove_waiting_reports_missing_jobs() {
        let mut queue = queue_with(&[1, 2]);
        assert!(queue.remove_waiting(JobId(2)));
        assert!(!queue.remove_waiting(JobId(2)));
        assert_eq!(queue.waiting().collect::<Vec<_>>(), vec![JobId(1)]);
    }

    #[test]
    fn overflow_victims_follow_the_strategy() {
        let queue = queue_with(&[1, 2, 3, 4]);
        assert_eq!(
            queue.overflow(2, OverflowStrategy::EvictNewest),
            vec![JobId(4), JobId(3)]
        );
        assert_eq!(
            queue.overflow(3, OverflowStrategy::EvictOldest),
            vec![JobId(1)]
        );
        assert_eq!(
            queue.overflow(3, OverflowStrategy::ReplaceNewest),
            vec![JobId(3)]
        );
        assert_eq!(
            queue.overflow(0, OverflowStrategy::ReplaceNewest).len(),
            4
        );
        assert!(queue.overflow(4, OverflowStrategy::EvictNewest).is_empty());
    }

    #[test]
    fn display_hides_the_default_key() {
        assert_eq!(KeyQueue::new(LockKey::Default).to_string(), "JobQueue");
        assert_eq!(KeyQueue::new(LockKey::named("a")).to_string(), "JobQueue<a>");
    }
}

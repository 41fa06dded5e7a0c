//! Message types for the lock actor.

use keylock_core::{Job, JobId, LockKey, LockStats};
use ractor::RpcReplyPort;

use crate::lock_actor::Task;
use crate::work::Outcome;

/// Messages for the LockActor.
pub(crate) enum LockMessage {
    /// Admit a new job.
    Enqueue { job: Box<Job<Task>> },

    /// Start a job that holds all of its keys.
    Execute { job_id: JobId },

    /// Run admission over keys released by an ended job.
    Update { keys: Vec<LockKey> },

    /// A unit of work finished.
    Done { job_id: JobId, outcome: Outcome },

    /// A job's wait timer fired.
    WaitTimeout { job_id: JobId },

    /// A job's execution timer fired.
    ExecutionTimeout { job_id: JobId },

    /// Check if a key is free.
    CanAcquire {
        key: LockKey,
        reply: RpcReplyPort<bool>,
    },

    /// Abort waiting and not yet started jobs for a key.
    Abort { key: LockKey },

    /// Abort waiting and not yet started jobs for every key.
    AbortAll,

    /// Get lock stats.
    GetStats { reply: RpcReplyPort<LockStats> },

    /// Drop idle key queues.
    Prune { reply: RpcReplyPort<usize> },

    /// Stop the lock, ending every live job.
    Shutdown,
}

impl std::fmt::Debug for LockMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMessage::Enqueue { job } => write!(f, "Enqueue({})", job),
            LockMessage::Execute { job_id } => write!(f, "Execute({})", job_id),
            LockMessage::Update { keys } => write!(f, "Update({:?})", keys),
            LockMessage::Done { job_id, outcome } => {
                write!(f, "Done({}, ok: {})", job_id, outcome.is_ok())
            }
            LockMessage::WaitTimeout { job_id } => write!(f, "WaitTimeout({})", job_id),
            LockMessage::ExecutionTimeout { job_id } => write!(f, "ExecutionTimeout({})", job_id),
            LockMessage::CanAcquire { key, .. } => write!(f, "CanAcquire({})", key),
            LockMessage::Abort { key } => write!(f, "Abort({})", key),
            LockMessage::AbortAll => write!(f, "AbortAll"),
            LockMessage::GetStats { .. } => write!(f, "GetStats"),
            LockMessage::Prune { .. } => write!(f, "Prune"),
            LockMessage::Shutdown => write!(f, "Shutdown"),
        }
    }
}

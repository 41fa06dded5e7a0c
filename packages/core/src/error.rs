//! Errors produced by a lock.

use std::backtrace::Backtrace;

use serde::{Deserialize, Serialize};

use crate::job::{IncomingTrace, JobId, JobInfo};
use crate::key::LockKey;

/// Error type returned by a unit of work.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Lock name as it prefixes error messages: `"[name] "`, or nothing for unnamed locks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockLabel(String);

impl LockLabel {
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            Ok(())
        } else {
            write!(f, "[{}] ", self.0)
        }
    }
}

/// Everything that can go wrong with an acquisition.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// A key or setting was malformed. Fails the call itself.
    #[error("{lock}Argument \"{argument}\" must be {expected} (got: \"{actual}\")")]
    InvalidArgument {
        lock: LockLabel,
        argument: String,
        expected: String,
        actual: String,
    },

    /// The job was still waiting for a key when its wait timeout fired.
    #[error("{lock}{job} has timed out after {elapsed_ms}ms in wait queue")]
    WaitTimeout {
        lock: LockLabel,
        job: JobInfo,
        elapsed_ms: i64,
        trace: Option<IncomingTrace>,
    },

    /// The job was still executing when its execution timeout fired.
    #[error("{lock}{job} has timed out after {elapsed_ms}ms of execution")]
    ExecutionTimeout {
        lock: LockLabel,
        job: JobInfo,
        elapsed_ms: i64,
        trace: Option<IncomingTrace>,
    },

    /// The job was kicked out of a full wait queue.
    #[error("{lock}Too many jobs ({job_count}) are waiting{}. {job} was kicked out", for_key(.key))]
    QueueOverflow {
        lock: LockLabel,
        key: LockKey,
        job_count: usize,
        job: JobInfo,
        trace: Option<IncomingTrace>,
    },

    #[error("{lock}{job} has been aborted by the user")]
    JobAborted {
        lock: LockLabel,
        job: JobInfo,
        trace: Option<IncomingTrace>,
    },

    /// Scheduler bookkeeping went wrong.
    #[error("{lock}{message} This is probably a bug inside the lock scheduler")]
    Internal { lock: LockLabel, message: String },

    #[error("{lock}Lock has been shut down")]
    Shutdown { lock: LockLabel },

    /// The unit of work's own error, passed through untouched.
    #[error(transparent)]
    Failed(BoxError),
}

fn for_key(key: &LockKey) -> String {
    match key {
        LockKey::Default => String::new(),
        LockKey::Named(key) => format!(" for key \"{}\"", key),
    }
}

impl LockError {
    pub fn invalid_argument(
        lock: &LockLabel,
        argument: impl Into<String>,
        expected: impl Into<String>,
        actual: impl std::fmt::Display,
    ) -> Self {
        LockError::InvalidArgument {
            lock: lock.clone(),
            argument: argument.into(),
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }

    /// Internal error; the message gets a trailing period if it has no closing punctuation.
    pub fn internal(lock: &LockLabel, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if !message.ends_with(['.', '!', '?']) {
            message.push('.');
        }
        LockError::Internal {
            lock: lock.clone(),
            message,
        }
    }

    pub fn shutdown(lock: &LockLabel) -> Self {
        LockError::Shutdown { lock: lock.clone() }
    }

    /// Wrap a unit of work's error.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        LockError::Failed(err.into())
    }

    /// Job the error was produced for, if the lock generated it for a specific job.
    pub fn job(&self) -> Option<&JobInfo> {
        match self {
            LockError::WaitTimeout { job, .. }
            | LockError::ExecutionTimeout { job, .. }
            | LockError::QueueOverflow { job, .. }
            | LockError::JobAborted { job, .. } => Some(job),
            _ => None,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job().map(|job| job.id)
    }

    /// Backtrace captured where the failed job was acquired.
    pub fn incoming_backtrace(&self) -> Option<&Backtrace> {
        match self {
            LockError::WaitTimeout { trace, .. }
            | LockError::ExecutionTimeout { trace, .. }
            | LockError::QueueOverflow { trace, .. }
            | LockError::JobAborted { trace, .. } => trace.as_ref().map(IncomingTrace::backtrace),
            _ => None,
        }
    }

    pub fn end_reason(&self) -> EndReason {
        match self {
            LockError::InvalidArgument { .. } | LockError::Failed(_) => EndReason::Failed,
            LockError::WaitTimeout { .. } => EndReason::WaitTimeout,
            LockError::ExecutionTimeout { .. } => EndReason::ExecutionTimeout,
            LockError::QueueOverflow { .. } => EndReason::QueueOverflow,
            LockError::JobAborted { .. } => EndReason::Aborted,
            LockError::Internal { .. } => EndReason::Internal,
            LockError::Shutdown { .. } => EndReason::Shutdown,
        }
    }

    /// Check if the error came from the lock rather than from the unit of work.
    pub fn is_lock_error(&self) -> bool {
        !matches!(self, LockError::Failed(_))
    }
}

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    Failed,
    WaitTimeout,
    ExecutionTimeout,
    QueueOverflow,
    Aborted,
    Internal,
    Shutdown,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::Failed => "failed",
            EndReason::WaitTimeout => "wait_timeout",
            EndReason::ExecutionTimeout => "execution_timeout",
            EndReason::QueueOverflow => "queue_overflow",
            EndReason::Aborted => "aborted",
            EndReason::Internal => "internal",
            EndReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

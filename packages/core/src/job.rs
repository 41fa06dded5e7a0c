//! Job domain types for requests admitted by a lock.

use std::backtrace::Backtrace;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::key::LockKey;

/// Unique identifier for a job within one lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out increasing job ids. Ids are never reused.
#[derive(Debug)]
pub struct JobIdGenerator {
    last: AtomicU64,
}

impl JobIdGenerator {
    /// Create a generator whose first id is `#1`.
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Create a generator whose first id follows `last`.
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> JobId {
        JobId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

impl Default for JobIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Options after merging job overrides onto the lock defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolvedJobOptions {
    /// How long the job may wait for its keys.
    pub wait_timeout: Option<Duration>,
    /// How long the job may run once it holds its keys.
    pub execution_timeout: Option<Duration>,
    /// Capture the caller's backtrace at acquire time.
    pub extend_stack_traces: bool,
}

/// Backtrace captured where a job was acquired.
///
/// Attached to errors the lock produces for the job, so a timeout can be
/// traced back to the code that asked for the lock.
#[derive(Clone)]
pub struct IncomingTrace(Arc<Backtrace>);

impl IncomingTrace {
    /// Capture the current backtrace. Honors `RUST_BACKTRACE` and `RUST_LIB_BACKTRACE`.
    pub fn capture() -> Self {
        Self(Arc::new(Backtrace::capture()))
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.0
    }
}

impl std::fmt::Debug for IncomingTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IncomingTrace({:?})", self.0.status())
    }
}

impl std::fmt::Display for IncomingTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a job's identity and timing, carried by errors and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub keys: Vec<LockKey>,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl std::fmt::Display for JobInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_job(f, self.id, &self.keys)
    }
}

fn write_job(f: &mut std::fmt::Formatter<'_>, id: JobId, keys: &[LockKey]) -> std::fmt::Result {
    write!(f, "Job {} [", id)?;
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", key)?;
    }
    write!(f, "]")
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Coarse lifecycle phase of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Still missing at least one key.
    Waiting,
    /// Holds every key; execution has been scheduled but not started.
    Granted,
    /// The unit of work is running.
    Executing,
    /// Completed, one way or another.
    Ended,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Waiting => write!(f, "waiting"),
            JobPhase::Granted => write!(f, "granted"),
            JobPhase::Executing => write!(f, "executing"),
            JobPhase::Ended => write!(f, "ended"),
        }
    }
}

/// One admitted request to run a unit of work under a set of keys.
///
/// `T` is the driver's payload: the unit of work, the completion notifier and
/// live timers. The scheduler never looks inside it.
pub struct Job<T> {
    /// Unique identifier for this job.
    pub id: JobId,
    keys: Vec<LockKey>,
    waiting_count: usize,
    /// Effective options for this job.
    pub options: ResolvedJobOptions,
    /// Backtrace captured at acquire time, if enabled.
    pub trace: Option<IncomingTrace>,
    enqueued_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    // Durations are measured on the monotonic clock the timers use.
    enqueued: Instant,
    executed: Option<Instant>,
    /// Driver payload.
    pub task: T,
}

impl<T> Job<T> {
    /// Create a job for an already normalized key list.
    pub fn new(id: JobId, keys: Vec<LockKey>, options: ResolvedJobOptions, task: T) -> Self {
        Self {
            id,
            waiting_count: keys.len(),
            keys,
            options,
            trace: None,
            enqueued_at: Utc::now(),
            executed_at: None,
            ended_at: None,
            enqueued: Instant::now(),
            executed: None,
            task,
        }
    }

    /// Attach the backtrace captured at acquire time.
    pub fn with_trace(mut self, trace: Option<IncomingTrace>) -> Self {
        self.trace = trace;
        self
    }

    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }

    /// Number of keys not yet granted to this job.
    pub fn waiting_count(&self) -> usize {
        self.waiting_count
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        self.executed_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Time spent waiting for keys, up to the start of execution.
    pub fn waited(&self) -> Duration {
        match self.executed {
            Some(executed) => executed.saturating_duration_since(self.enqueued),
            None => self.enqueued.elapsed(),
        }
    }

    pub fn waited_ms(&self) -> i64 {
        millis(self.waited())
    }

    /// Time spent executing so far, if execution has started.
    pub fn executing_for(&self) -> Option<Duration> {
        self.executed.map(|executed| executed.elapsed())
    }

    pub fn executing_ms(&self) -> Option<i64> {
        self.executing_for().map(millis)
    }

    pub fn phase(&self) -> JobPhase {
        if self.ended_at.is_some() {
            JobPhase::Ended
        } else if self.executed_at.is_some() {
            JobPhase::Executing
        } else if self.waiting_count > 0 {
            JobPhase::Waiting
        } else {
            JobPhase::Granted
        }
    }

    /// Check if the job still lacks at least one key.
    pub fn is_waiting(&self) -> bool {
        self.phase() == JobPhase::Waiting
    }

    pub fn is_executing(&self) -> bool {
        self.phase() == JobPhase::Executing
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            keys: self.keys.clone(),
            enqueued_at: self.enqueued_at,
            executed_at: self.executed_at,
        }
    }

    /// Record that one more key was granted. Returns true once every key is held.
    pub(crate) fn grant_one(&mut self) -> bool {
        self.waiting_count = self.waiting_count.saturating_sub(1);
        self.waiting_count == 0
    }

    pub(crate) fn mark_executed(&mut self) {
        self.executed_at = Some(Utc::now());
        self.executed = Some(Instant::now());
    }

    pub(crate) fn mark_ended(&mut self) {
        self.ended_at = Some(Utc::now());
    }
}

impl<T> std::fmt::Display for Job<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_job(f, self.id, &self.keys)
    }
}

impl<T> std::fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("keys", &self.keys)
            .field("waiting_count", &self.waiting_count)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

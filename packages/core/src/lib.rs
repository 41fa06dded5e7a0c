//! Core types for keyed locks.
//!
//! This crate contains the runtime-free parts of a lock:
//! - LockKey and key normalization
//! - Job and KeyQueue bookkeeping
//! - Scheduler, the admission/overflow/completion state machine
//! - Options, errors, events and the log sink

mod error;
mod events;
mod job;
mod key;
mod log;
mod options;
mod queue;
mod scheduler;

pub use error::{BoxError, EndReason, LockError, LockLabel};
pub use events::LockEvent;
pub use job::{
    IncomingTrace, Job, JobId, JobIdGenerator, JobInfo, JobPhase, ResolvedJobOptions,
};
pub use key::{IntoLockKey, IntoLockKeys, InvalidKey, LockKey, normalize};
pub use log::{LogSink, Logger};
pub use options::{JobOptions, LockOptions, OverflowStrategy, Setting};
pub use queue::{KeyQueue, KeyStats, LockStats};
pub use scheduler::{Corrupted, Ended, Scheduler, Transition};

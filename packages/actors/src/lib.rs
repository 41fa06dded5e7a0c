//! Keyed locks for cooperative tasks.
//!
//! A [`Lock`] serializes units of work per key: work acquired on the same key
//! runs one at a time in arrival order, work on different keys runs
//! independently. Waiting and running can be bounded by timeouts, wait
//! queues by size, and waiting work can be aborted.
//!
//! # Architecture
//!
//! - `Lock` - Cloneable handle that validates requests and talks to the actor
//! - `LockActor` - Ractor actor that owns the scheduler, timers and notifiers
//! - `Scheduler` - Runtime-free state machine from `keylock_core`
//!
//! # Usage
//!
//! ```ignore
//! use keylock::{Lock, LockOptions, Work};
//!
//! let lock = Lock::new(LockOptions::new().with_name("accounts")).await?;
//!
//! // Both transfers touch account 7, so they run one after the other.
//! let first = lock.acquire([7, 9], Work::future(|| transfer(7, 9)))?;
//! let second = lock.acquire([7, 3], Work::future(|| transfer(7, 3)))?;
//! first.await?;
//! second.await?;
//! ```

mod lock;
mod lock_actor;
mod messages;
mod timer;
mod work;

pub use lock::{JobFuture, Lock};
pub use work::{Done, Settlement, Work, WorkFuture};

/// Re-export core types for convenience.
pub use keylock_core::{
    BoxError, EndReason, IntoLockKey, IntoLockKeys, JobId, JobInfo, JobOptions, KeyStats,
    LockError, LockEvent, LockKey, LockOptions, LockStats, LogSink, OverflowStrategy, Setting,
};

//! Units of work and their completion handles.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use keylock_core::{BoxError, JobId, LockError};
use ractor::ActorRef;

use crate::messages::LockMessage;

/// Type-erased successful result of a unit of work.
pub(crate) type Payload = Box<dyn Any + Send>;

/// How a job ended, as seen by its notifier.
pub(crate) type Outcome = Result<Payload, LockError>;

/// Delivers a job's outcome to whoever acquired it.
pub(crate) type Notifier = Box<dyn FnOnce(Outcome) + Send>;

/// Future produced by a pending unit of work.
pub type WorkFuture<T> = BoxFuture<'static, Result<T, BoxError>>;

/// What a value/future-style unit of work hands back.
pub enum Settlement<T> {
    /// The work is finished.
    Ready(Result<T, BoxError>),
    /// The work finishes when this future resolves.
    Pending(WorkFuture<T>),
}

impl<T: Send + 'static> Settlement<T> {
    pub fn ok(value: T) -> Self {
        Settlement::Ready(Ok(value))
    }

    pub fn err(err: impl Into<BoxError>) -> Self {
        Settlement::Ready(Err(err.into()))
    }

    pub fn pending<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Settlement::Pending(Box::pin(future.map(|r| r.map_err(Into::into))))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Settlement::Pending(_))
    }
}

/// A unit of work to run while holding a set of keys.
///
/// The shape is picked by the caller: `callback` work gets a [`Done`] handle
/// and ends the job by resolving it; every other constructor builds work that
/// is called with no arguments and ends the job with whatever it settles to.
pub enum Work<T> {
    Callback(Box<dyn FnOnce(Done<T>) + Send>),
    Call(Box<dyn FnOnce() -> Settlement<T> + Send>),
}

impl<T: Send + 'static> Work<T> {
    /// Work that reports completion through a [`Done`] handle.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(Done<T>) + Send + 'static,
    {
        Work::Callback(Box::new(f))
    }

    /// Work that returns its value synchronously.
    pub fn value<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Work::Call(Box::new(move || Settlement::ok(f())))
    }

    /// Work that returns a future.
    pub fn future<F, Fut, E>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Work::Call(Box::new(move || Settlement::pending(f())))
    }

    /// Work that decides at run time whether it is finished or pending.
    pub fn settle<F>(f: F) -> Self
    where
        F: FnOnce() -> Settlement<T> + Send + 'static,
    {
        Work::Call(Box::new(f))
    }

    /// Drop the result type so the lock actor can hold any job.
    pub(crate) fn erase(self) -> ErasedWork {
        match self {
            Work::Callback(f) => ErasedWork(Box::new(move |completer| {
                async move {
                    f(Done::new(completer));
                    None
                }
                .boxed()
            })),
            Work::Call(f) => ErasedWork(Box::new(move |_| {
                async move {
                    let result = match f() {
                        Settlement::Ready(result) => result,
                        Settlement::Pending(future) => future.await,
                    };
                    Some(into_outcome(result))
                }
                .boxed()
            })),
        }
    }
}

impl<T> std::fmt::Debug for Work<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Work::Callback(_) => write!(f, "Work::Callback"),
            Work::Call(_) => write!(f, "Work::Call"),
        }
    }
}

fn into_outcome<T: Send + 'static>(result: Result<T, BoxError>) -> Outcome {
    result
        .map(|value| Box::new(value) as Payload)
        .map_err(LockError::Failed)
}

/// Completion handle passed to callback-style work.
///
/// Only the first resolution counts; later ones are logged and ignored by the lock.
pub struct Done<T> {
    completer: Completer,
    _result: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Done<T> {
    fn new(completer: Completer) -> Self {
        Self {
            completer,
            _result: PhantomData,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.completer.job_id
    }

    pub fn resolve(&self, result: Result<T, BoxError>) {
        self.completer.complete(into_outcome(result));
    }

    /// Finish the job successfully.
    pub fn ok(&self, value: T) {
        self.resolve(Ok(value));
    }

    /// Finish the job with an error.
    pub fn fail(&self, err: impl Into<BoxError>) {
        self.resolve(Err(err.into()));
    }
}

impl<T> Clone for Done<T> {
    fn clone(&self) -> Self {
        Self {
            completer: self.completer.clone(),
            _result: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Done<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Done").field("job_id", &self.completer.job_id).finish()
    }
}

/// Reports a job's outcome back to the lock actor.
#[derive(Clone)]
pub(crate) struct Completer {
    job_id: JobId,
    actor: ActorRef<LockMessage>,
}

impl Completer {
    pub(crate) fn new(job_id: JobId, actor: ActorRef<LockMessage>) -> Self {
        Self { job_id, actor }
    }

    fn complete(&self, outcome: Outcome) {
        let message = LockMessage::Done {
            job_id: self.job_id,
            outcome,
        };
        if self.actor.send_message(message).is_err() {
            tracing::debug!("Lock stopped before job {} completed", self.job_id);
        }
    }
}

/// A unit of work with its result type erased.
pub(crate) struct ErasedWork(Box<dyn FnOnce(Completer) -> BoxFuture<'static, Option<Outcome>> + Send>);

impl ErasedWork {
    /// Run the work on its own task. Panics become error outcomes.
    pub(crate) fn spawn(self, completer: Completer) {
        let future = (self.0)(completer.clone());
        tokio::spawn(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Some(outcome)) => completer.complete(outcome),
                // Callback work reports through its own handle.
                Ok(None) => {}
                Err(panic) => {
                    let message = format!("job panicked: {}", panic_message(panic.as_ref()));
                    completer.complete(Err(LockError::Failed(message.into())));
                }
            }
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

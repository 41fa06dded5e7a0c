//! Public lock handle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use keylock_core::{
    IncomingTrace, IntoLockKey, IntoLockKeys, InvalidKey, Job, JobId, JobIdGenerator, JobOptions,
    LockError, LockEvent, LockLabel, LockOptions, LockStats,
};
use ractor::{Actor, ActorRef, MessagingErr};
use tokio::sync::{broadcast, oneshot};

use crate::lock_actor::{LockActor, LockArgs, Task};
use crate::messages::LockMessage;
use crate::work::{Notifier, Outcome, Work};

/// Events buffered per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Handle to a keyed lock.
///
/// Jobs acquired on the same key run one at a time in arrival order; jobs on
/// different keys run independently. Clones share the same lock. The lock
/// stops when the last handle is dropped or [`Lock::shutdown`] is called.
///
/// ```ignore
/// let lock = Lock::new(LockOptions::new().with_name("orders")).await?;
/// let total = lock
///     .acquire("order-17", Work::future(|| async { charge_card().await }))?
///     .await?;
/// ```
#[derive(Clone)]
pub struct Lock {
    inner: Arc<LockInner>,
}

struct LockInner {
    actor: ActorRef<LockMessage>,
    options: LockOptions,
    label: LockLabel,
    ids: JobIdGenerator,
    event_tx: broadcast::Sender<LockEvent>,
}

impl Drop for LockInner {
    fn drop(&mut self) {
        self.actor.stop(None);
    }
}

impl Lock {
    /// Start a lock with the given options.
    pub async fn new(options: LockOptions) -> Result<Self, LockError> {
        let label = LockLabel::new(&options.name);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let args = LockArgs {
            options: options.clone(),
            event_tx: event_tx.clone(),
        };
        let (actor, _handle) = Actor::spawn(None, LockActor, args)
            .await
            .map_err(|e| LockError::internal(&label, format!("Failed to spawn lock actor: {}", e)))?;

        Ok(Self {
            inner: Arc::new(LockInner {
                actor,
                options,
                label,
                ids: JobIdGenerator::new(),
                event_tx,
            }),
        })
    }

    /// Start a lock configured from `KEYLOCK_*` environment variables.
    pub async fn from_env() -> Result<Self, LockError> {
        Self::new(LockOptions::from_env()?).await
    }

    pub fn name(&self) -> &str {
        self.inner.label.name()
    }

    pub fn options(&self) -> &LockOptions {
        &self.inner.options
    }

    /// Run `work` once every key in `keys` is held.
    ///
    /// The returned future resolves with the work's result or with the
    /// error that ended the job.
    pub fn acquire<K, T>(&self, keys: K, work: Work<T>) -> Result<JobFuture<T>, LockError>
    where
        K: IntoLockKeys,
        T: Send + 'static,
    {
        self.acquire_with(keys, work, JobOptions::default())
    }

    /// Like [`Lock::acquire`], with per-job options.
    pub fn acquire_with<K, T>(
        &self,
        keys: K,
        work: Work<T>,
        options: JobOptions,
    ) -> Result<JobFuture<T>, LockError>
    where
        K: IntoLockKeys,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let label = self.inner.label.clone();
        let notifier: Notifier = Box::new(move |outcome| {
            let _ = tx.send(downcast(&label, outcome));
        });

        let job_id = self.submit(keys, work, options, notifier)?;
        Ok(JobFuture {
            job_id,
            rx,
            label: self.inner.label.clone(),
        })
    }

    /// Run `work` once every key in `keys` is held, then call `on_done` with the outcome.
    ///
    /// `on_done` runs on the lock's own task, so it must not block.
    pub fn acquire_callback<K, T, F>(
        &self,
        keys: K,
        work: Work<T>,
        options: JobOptions,
        on_done: F,
    ) -> Result<JobId, LockError>
    where
        K: IntoLockKeys,
        T: Send + 'static,
        F: FnOnce(Result<T, LockError>) + Send + 'static,
    {
        let label = self.inner.label.clone();
        let notifier: Notifier = Box::new(move |outcome| on_done(downcast(&label, outcome)));
        self.submit(keys, work, options, notifier)
    }

    fn submit<K, T>(
        &self,
        keys: K,
        work: Work<T>,
        options: JobOptions,
        notifier: Notifier,
    ) -> Result<JobId, LockError>
    where
        K: IntoLockKeys,
        T: Send + 'static,
    {
        let keys = keys.into_lock_keys().map_err(|e| self.invalid_key(e))?;
        let options = options.resolve(&self.inner.options);
        let trace = options.extend_stack_traces.then(IncomingTrace::capture);

        let job_id = self.inner.ids.next_id();
        let task = Task::new(work.erase(), notifier, self.inner.label.clone());
        let job = Job::new(job_id, keys, options, task).with_trace(trace);

        match self
            .inner
            .actor
            .send_message(LockMessage::Enqueue { job: Box::new(job) })
        {
            Ok(()) => Ok(job_id),
            Err(err) => {
                // Reported once, through the returned error.
                if let MessagingErr::SendErr(LockMessage::Enqueue { mut job }) = err {
                    job.task.disarm();
                }
                Err(self.shutdown_error())
            }
        }
    }

    /// Check if `key` has no holder and no waiters.
    ///
    /// Sees every acquire this handle made before the call.
    pub async fn can_acquire<K: IntoLockKey>(&self, key: K) -> Result<bool, LockError> {
        let key = key.into_lock_key().map_err(|e| self.invalid_key(e))?;
        let (tx, rx) = ractor::concurrency::oneshot();
        self.inner
            .actor
            .send_message(LockMessage::CanAcquire {
                key,
                reply: tx.into(),
            })
            .map_err(|_| self.shutdown_error())?;
        rx.await.map_err(|_| self.shutdown_error())
    }

    /// End every waiting job on `key`, and its holder if that one has not started yet.
    ///
    /// Running jobs are never interrupted.
    pub fn abort<K: IntoLockKey>(&self, key: K) -> Result<(), LockError> {
        let key = key.into_lock_key().map_err(|e| self.invalid_key(e))?;
        self.send(LockMessage::Abort { key })
    }

    /// [`Lock::abort`] for the default key and every other key the lock has seen.
    pub fn abort_all(&self) -> Result<(), LockError> {
        self.send(LockMessage::AbortAll)
    }

    pub async fn stats(&self) -> Result<LockStats, LockError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.send(LockMessage::GetStats { reply: tx.into() })?;
        rx.await.map_err(|_| self.shutdown_error())
    }

    /// Drop queues of keys nobody holds or waits for. Returns how many were dropped.
    pub async fn prune(&self) -> Result<usize, LockError> {
        let (tx, rx) = ractor::concurrency::oneshot();
        self.send(LockMessage::Prune { reply: tx.into() })?;
        rx.await.map_err(|_| self.shutdown_error())
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Stop the lock once the messages already sent to it are handled.
    ///
    /// Jobs still alive at that point end with [`LockError::Shutdown`].
    pub fn shutdown(&self) {
        if self.inner.actor.send_message(LockMessage::Shutdown).is_err() {
            tracing::debug!("Lock {} already stopped", self.inner.label.name());
        }
    }

    fn send(&self, message: LockMessage) -> Result<(), LockError> {
        self.inner
            .actor
            .send_message(message)
            .map_err(|_| self.shutdown_error())
    }

    fn shutdown_error(&self) -> LockError {
        LockError::shutdown(&self.inner.label)
    }

    fn invalid_key(&self, err: InvalidKey) -> LockError {
        LockError::invalid_argument(&self.inner.label, "key", err.expected, err.actual)
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("name", &self.inner.label.name())
            .field("actor", &self.inner.actor.get_id())
            .finish()
    }
}

fn downcast<T: 'static>(label: &LockLabel, outcome: Outcome) -> Result<T, LockError> {
    outcome?
        .downcast::<T>()
        .map(|value| *value)
        .map_err(|_| LockError::internal(label, "Unit of work produced a value of an unexpected type"))
}

/// Result of a future-style acquisition.
///
/// Dropping it does not cancel the job.
pub struct JobFuture<T> {
    job_id: JobId,
    rx: oneshot::Receiver<Result<T, LockError>>,
    label: LockLabel,
}

impl<T> JobFuture<T> {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

impl<T> Future for JobFuture<T> {
    type Output = Result<T, LockError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.rx.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The lock went away without ending the job.
            Poll::Ready(Err(_)) => Poll::Ready(Err(LockError::shutdown(&self.label))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for JobFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobFuture").field("job_id", &self.job_id).finish()
    }
}


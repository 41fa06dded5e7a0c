//! Lock actor driving the scheduler for one lock.

use std::panic::AssertUnwindSafe;

use chrono::Utc;
use keylock_core::{
    EndReason, Ended, Job, JobId, LockError, LockEvent, LockKey, LockLabel, LockOptions, Logger,
    Scheduler, Transition,
};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;

use crate::messages::LockMessage;
use crate::timer::Timer;
use crate::work::{Completer, ErasedWork, Notifier, Outcome};

/// What the actor keeps for each job besides the scheduler's bookkeeping.
///
/// A task dropped before its job ended, e.g. in a mailbox the stopped actor
/// never read, ends the job with [`LockError::Shutdown`].
pub(crate) struct Task {
    work: Option<ErasedWork>,
    notifier: Option<Notifier>,
    wait_timer: Option<Timer>,
    execution_timer: Option<Timer>,
    label: LockLabel,
}

impl Task {
    pub(crate) fn new(work: ErasedWork, notifier: Notifier, label: LockLabel) -> Self {
        Self {
            work: Some(work),
            notifier: Some(notifier),
            wait_timer: None,
            execution_timer: None,
            label,
        }
    }

    /// Drop the notifier without calling it.
    pub(crate) fn disarm(&mut self) {
        self.notifier = None;
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        let Some(notifier) = self.notifier.take() else {
            return;
        };
        let err = LockError::shutdown(&self.label);
        if std::panic::catch_unwind(AssertUnwindSafe(move || notifier(Err(err)))).is_err() {
            tracing::warn!("Completion callback panicked while the lock was shutting down");
        }
    }
}

/// State for the lock actor.
pub(crate) struct LockActorState {
    scheduler: Scheduler<Task>,
    logger: Logger,
    label: LockLabel,
    event_tx: broadcast::Sender<LockEvent>,
}

impl LockActorState {
    /// Create a new lock actor state.
    pub(crate) fn new(options: &LockOptions, event_tx: broadcast::Sender<LockEvent>) -> Self {
        Self {
            scheduler: Scheduler::new()
                .with_queue_size(options.queue_size)
                .with_overflow_strategy(options.overflow_strategy),
            logger: Logger::new(options.name.clone(), options.log.clone()),
            label: LockLabel::new(&options.name),
            event_tx,
        }
    }

    fn broadcast(&self, event: LockEvent) {
        let _ = self.event_tx.send(event);
    }

    fn enqueue(&mut self, myself: &ActorRef<LockMessage>, job: Job<Task>) {
        let job_id = job.id;
        let wait_timeout = job.options.wait_timeout;
        let info = job.info();

        let transitions = self.scheduler.enqueue(job);

        // A zero timeout does not fail a job that was granted every key right away.
        if let Some(timeout) = wait_timeout
            && let Some(job) = self.scheduler.get_mut(job_id)
            && job.is_waiting()
        {
            job.task.wait_timer = Some(Timer::after(
                timeout,
                myself.clone(),
                LockMessage::WaitTimeout { job_id },
            ));
        }

        self.logger.log(format_args!("Enqueued {}", info));
        self.broadcast(LockEvent::JobEnqueued {
            job: info,
            timestamp: Utc::now(),
        });

        self.apply(myself, transitions);
    }

    /// Act on what an admission pass decided.
    fn apply(&mut self, myself: &ActorRef<LockMessage>, transitions: Vec<Transition>) {
        for transition in transitions {
            match transition {
                Transition::Ready(job_id) => {
                    if let Some(job) = self.scheduler.get_mut(job_id) {
                        job.task.wait_timer = None;
                        self.logger.log(format_args!("Executing {}", job));
                    }
                    // Deferred so the unit of work never runs inside this pass.
                    if let Err(e) = myself.send_message(LockMessage::Execute { job_id }) {
                        tracing::warn!("Failed to schedule job {}: {}", job_id, e);
                    }
                }

                Transition::Overflow {
                    job: job_id,
                    key,
                    job_count,
                } => {
                    let Some(job) = self.scheduler.get(job_id) else {
                        continue;
                    };
                    if let Some(queue) = self.scheduler.queue(&key) {
                        self.logger
                            .log(format_args!("{} has overflown, so {} was kicked out", queue, job));
                    }
                    let err = LockError::QueueOverflow {
                        lock: self.label.clone(),
                        key,
                        job_count,
                        job: job.info(),
                        trace: job.trace.clone(),
                    };
                    self.end_job(myself, job_id, Err(err));
                }
            }
        }
    }

    fn execute(&mut self, myself: &ActorRef<LockMessage>, job_id: JobId) {
        let (work, waited_ms) = match self.scheduler.start(job_id) {
            Ok(Some(job)) => {
                if let Some(timeout) = job.options.execution_timeout {
                    job.task.execution_timer = Some(Timer::after(
                        timeout,
                        myself.clone(),
                        LockMessage::ExecutionTimeout { job_id },
                    ));
                }
                (job.task.work.take(), job.waited_ms())
            }
            // Ended by an abort, a wait timeout or an overflow in the meantime.
            Ok(None) => return,
            Err(corrupted) => {
                let err = LockError::internal(&self.label, corrupted.to_string());
                self.end_job(myself, job_id, Err(err));
                return;
            }
        };

        self.broadcast(LockEvent::JobStarted {
            job_id,
            waited_ms,
            timestamp: Utc::now(),
        });

        match work {
            Some(work) => work.spawn(Completer::new(job_id, myself.clone())),
            None => {
                let err = LockError::internal(&self.label, format!("Job {} has no unit of work", job_id));
                self.end_job(myself, job_id, Err(err));
            }
        }
    }

    fn on_done(&mut self, myself: &ActorRef<LockMessage>, job_id: JobId, outcome: Outcome) {
        match self.scheduler.get(job_id) {
            Some(job) => self.logger.log(format_args!("Done called for {}", job)),
            None => self.logger.log(format_args!("Done called for job {}", job_id)),
        }
        self.end_job(myself, job_id, outcome);
    }

    fn on_wait_timeout(&mut self, myself: &ActorRef<LockMessage>, job_id: JobId) {
        let Some(job) = self.scheduler.get(job_id) else {
            return;
        };
        // Granted in the same turn the timer fired.
        if !job.is_waiting() {
            return;
        }

        let elapsed_ms = job.waited_ms();
        self.logger.log(format_args!(
            "{} has timed out after waiting in queue for {}ms",
            job, elapsed_ms
        ));
        let err = LockError::WaitTimeout {
            lock: self.label.clone(),
            job: job.info(),
            elapsed_ms,
            trace: job.trace.clone(),
        };
        self.end_job(myself, job_id, Err(err));
    }

    fn on_execution_timeout(&mut self, myself: &ActorRef<LockMessage>, job_id: JobId) {
        let Some(job) = self.scheduler.get(job_id) else {
            return;
        };
        let Some(elapsed_ms) = job.executing_ms().filter(|_| job.is_executing()) else {
            return;
        };

        self.logger.log(format_args!(
            "{} has timed out after executing for {}ms",
            job, elapsed_ms
        ));
        let err = LockError::ExecutionTimeout {
            lock: self.label.clone(),
            job: job.info(),
            elapsed_ms,
            trace: job.trace.clone(),
        };
        self.end_job(myself, job_id, Err(err));
    }

    fn abort(&mut self, myself: &ActorRef<LockMessage>, key: &LockKey) {
        for job_id in self.scheduler.abort(key) {
            let Some(job) = self.scheduler.get(job_id) else {
                continue;
            };
            let err = LockError::JobAborted {
                lock: self.label.clone(),
                job: job.info(),
                trace: job.trace.clone(),
            };
            self.end_job(myself, job_id, Err(err));
        }
    }

    fn abort_all(&mut self, myself: &ActorRef<LockMessage>) {
        for key in self.scheduler.keys() {
            self.abort(myself, &key);
        }
    }

    /// End a job and schedule admission over the keys it released.
    fn end_job(&mut self, myself: &ActorRef<LockMessage>, job_id: JobId, outcome: Outcome) {
        let Some(keys) = self.finish(job_id, outcome) else {
            return;
        };
        if keys.is_empty() {
            return;
        }
        // Deferred so a notifier that re-acquires a key is not re-entered.
        if let Err(e) = myself.send_message(LockMessage::Update { keys }) {
            tracing::warn!("Failed to schedule queue update after job {}: {}", job_id, e);
        }
    }

    /// Remove a job from the scheduler and notify its owner.
    ///
    /// Returns the job's keys, or `None` if it had already ended.
    fn finish(&mut self, job_id: JobId, outcome: Outcome) -> Option<Vec<LockKey>> {
        let Some(Ended { mut job, strays }) = self.scheduler.end(job_id) else {
            let how = match &outcome {
                Ok(_) => "success".to_string(),
                Err(e) => e.to_string(),
            };
            self.logger.warn(format_args!(
                "Job {} is trying to end, but it has already ended. Called with: {}",
                job_id, how
            ));
            return None;
        };

        for key in &strays {
            self.logger.warn(format_args!(
                "{} is ending, but it is not found anywhere in the queue for {}",
                job, key
            ));
        }

        job.task.wait_timer = None;
        job.task.execution_timer = None;

        let (reason, error) = match &outcome {
            Ok(_) => (EndReason::Completed, None),
            Err(e) => (e.end_reason(), Some(e.to_string())),
        };
        self.broadcast(LockEvent::JobEnded {
            job_id,
            reason,
            error,
            timestamp: Utc::now(),
        });

        if let Some(notifier) = job.task.notifier.take()
            && std::panic::catch_unwind(AssertUnwindSafe(move || notifier(outcome))).is_err()
        {
            self.logger
                .warn(format_args!("Completion callback of {} panicked", job));
        }

        Some(job.keys().to_vec())
    }
}

/// Actor that owns one lock's scheduler.
pub(crate) struct LockActor;

/// Lock actor arguments.
pub(crate) struct LockArgs {
    pub options: LockOptions,
    pub event_tx: broadcast::Sender<LockEvent>,
}

impl Actor for LockActor {
    type Msg = LockMessage;
    type State = LockActorState;
    type Arguments = LockArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting lock actor: {}", display_name(&args.options.name));
        Ok(LockActorState::new(&args.options, args.event_tx))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            LockMessage::Enqueue { job } => state.enqueue(&myself, *job),

            LockMessage::Execute { job_id } => state.execute(&myself, job_id),

            LockMessage::Update { keys } => {
                let transitions = state.scheduler.update(&keys);
                state.apply(&myself, transitions);
            }

            LockMessage::Done { job_id, outcome } => state.on_done(&myself, job_id, outcome),

            LockMessage::WaitTimeout { job_id } => state.on_wait_timeout(&myself, job_id),

            LockMessage::ExecutionTimeout { job_id } => {
                state.on_execution_timeout(&myself, job_id)
            }

            LockMessage::CanAcquire { key, reply } => {
                let _ = reply.send(state.scheduler.can_acquire(&key));
            }

            LockMessage::Abort { key } => state.abort(&myself, &key),

            LockMessage::AbortAll => state.abort_all(&myself),

            LockMessage::GetStats { reply } => {
                let _ = reply.send(state.scheduler.stats());
            }

            LockMessage::Prune { reply } => {
                let _ = reply.send(state.scheduler.prune());
            }

            LockMessage::Shutdown => {
                tracing::info!("Shutting down lock: {}", display_name(state.label.name()));
                myself.stop(None);
                return Ok(());
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let live = state.scheduler.live_jobs();
        if !live.is_empty() {
            tracing::info!(
                "Lock {} stopped with {} live jobs",
                display_name(state.label.name()),
                live.len()
            );
        }
        for job_id in live {
            let err = LockError::shutdown(&state.label);
            state.finish(job_id, Err(err));
        }
        Ok(())
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() { "unnamed" } else { name }
}

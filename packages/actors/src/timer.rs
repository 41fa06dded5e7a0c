//! One-shot timers that message the lock actor.

use std::time::Duration;

use ractor::ActorRef;
use tokio::task::JoinHandle;

use crate::messages::LockMessage;

/// Sends a message to the actor after a delay. Dropping the timer cancels it.
pub(crate) struct Timer(JoinHandle<()>);

impl Timer {
    pub(crate) fn after(delay: Duration, actor: ActorRef<LockMessage>, message: LockMessage) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if actor.send_message(message).is_err() {
                tracing::debug!("Timer fired after the lock stopped");
            }
        }))
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

//! Event types for observing a lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EndReason, JobId, JobInfo};

/// Events broadcast by a lock as jobs move through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LockEvent {
    /// A job was added to the wait queues of its keys.
    JobEnqueued { job: JobInfo, timestamp: DateTime<Utc> },
    /// A job got all of its keys and its unit of work was started.
    JobStarted {
        job_id: JobId,
        waited_ms: i64,
        timestamp: DateTime<Utc>,
    },
    /// A job ended and released its keys.
    JobEnded {
        job_id: JobId,
        reason: EndReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl LockEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LockEvent::JobEnqueued { timestamp, .. } => *timestamp,
            LockEvent::JobStarted { timestamp, .. } => *timestamp,
            LockEvent::JobEnded { timestamp, .. } => *timestamp,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            LockEvent::JobEnqueued { job, .. } => job.id,
            LockEvent::JobStarted { job_id, .. } => *job_id,
            LockEvent::JobEnded { job_id, .. } => *job_id,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            LockEvent::JobEnqueued { job, .. } => format!("{} enqueued", job),
            LockEvent::JobStarted {
                job_id, waited_ms, ..
            } => format!("Job {} started after waiting {}ms", job_id, waited_ms),
            LockEvent::JobEnded {
                job_id,
                reason,
                error,
                ..
            } => match error {
                Some(error) => format!("Job {} ended ({}): {}", job_id, reason, error),
                None => format!("Job {} ended ({})", job_id, reason),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LockKey;

    #[test]
    fn events_are_tagged_by_kind() -> Result<(), serde_json::Error> {
        let event = LockEvent::JobEnded {
            job_id: JobId(3),
            reason: EndReason::WaitTimeout,
            error: Some("timed out".into()),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event)?;
        assert_eq!(json["event"], "job_ended");
        assert_eq!(json["job_id"], 3);
        assert_eq!(json["reason"], "wait_timeout");

        let parsed: LockEvent = serde_json::from_value(json)?;
        assert_eq!(parsed.job_id(), JobId(3));
        Ok(())
    }

    #[test]
    fn descriptions_name_the_job() {
        let now = Utc::now();
        let enqueued = LockEvent::JobEnqueued {
            job: JobInfo {
                id: JobId(1),
                keys: vec![LockKey::named("a"), LockKey::named("b")],
                enqueued_at: now,
                executed_at: None,
            },
            timestamp: now,
        };
        assert_eq!(enqueued.description(), "Job #1 [a, b] enqueued");

        let ended = LockEvent::JobEnded {
            job_id: JobId(1),
            reason: EndReason::Completed,
            error: None,
            timestamp: now,
        };
        assert_eq!(ended.description(), "Job #1 ended (completed)");
        assert_eq!(ended.timestamp(), now);
    }
}

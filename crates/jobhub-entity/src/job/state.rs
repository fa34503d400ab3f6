//! Job state enumeration and the per-state history records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of a background job.
///
/// The uppercase form returned by [`JobState::as_str`] is the persisted
/// representation: it names the per-state queue keys in the key-value
/// layout and the `state` column in the SQL layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Created but not yet released for execution.
    Awaiting,
    /// Due to run at a future instant.
    Scheduled,
    /// Ready to be picked up by a worker.
    Enqueued,
    /// Currently being executed by a worker.
    Processing,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Soft-deleted; kept around until permanently removed.
    Deleted,
}

impl JobState {
    /// Every state, in declaration order.
    pub const ALL: [JobState; 7] = [
        JobState::Awaiting,
        JobState::Scheduled,
        JobState::Enqueued,
        JobState::Processing,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Deleted,
    ];

    /// Return the persisted uppercase name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Awaiting => "AWAITING",
            Self::Scheduled => "SCHEDULED",
            Self::Enqueued => "ENQUEUED",
            Self::Processing => "PROCESSING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Deleted => "DELETED",
        }
    }

    /// Parse a persisted uppercase state name.
    pub fn parse(value: &str) -> Option<JobState> {
        Self::ALL.iter().copied().find(|s| s.as_str() == value)
    }

    /// Check if the job can no longer move to another state on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Deleted)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in a job's state history.
///
/// Each record carries the instant the transition happened plus the
/// state-specific payload. A job's current state is the state of its most
/// recent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateRecord {
    /// The job exists but has not been released for execution.
    Awaiting {
        /// When the record was created.
        created_at: DateTime<Utc>,
    },
    /// The job is due to run at `scheduled_at`.
    Scheduled {
        /// When the record was created.
        created_at: DateTime<Utc>,
        /// The instant the job should fire.
        scheduled_at: DateTime<Utc>,
        /// The recurring job this instance was spawned from, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recurring_job_id: Option<String>,
        /// Human-readable reason for the scheduling, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// The job is ready to be picked up by a worker.
    Enqueued {
        /// When the record was created.
        created_at: DateTime<Utc>,
    },
    /// The job is being executed.
    Processing {
        /// When the record was created.
        created_at: DateTime<Utc>,
        /// The background job server executing the job.
        server_id: Uuid,
    },
    /// The job finished successfully.
    Succeeded {
        /// When the record was created.
        created_at: DateTime<Utc>,
    },
    /// The job finished with an error.
    Failed {
        /// When the record was created.
        created_at: DateTime<Utc>,
        /// The failure message.
        message: String,
    },
    /// The job was soft-deleted.
    Deleted {
        /// When the record was created.
        created_at: DateTime<Utc>,
    },
}

impl StateRecord {
    /// Return the state this record represents.
    pub fn state(&self) -> JobState {
        match self {
            Self::Awaiting { .. } => JobState::Awaiting,
            Self::Scheduled { .. } => JobState::Scheduled,
            Self::Enqueued { .. } => JobState::Enqueued,
            Self::Processing { .. } => JobState::Processing,
            Self::Succeeded { .. } => JobState::Succeeded,
            Self::Failed { .. } => JobState::Failed,
            Self::Deleted { .. } => JobState::Deleted,
        }
    }

    /// Return the instant this record was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Awaiting { created_at }
            | Self::Scheduled { created_at, .. }
            | Self::Enqueued { created_at }
            | Self::Processing { created_at, .. }
            | Self::Succeeded { created_at }
            | Self::Failed { created_at, .. }
            | Self::Deleted { created_at } => *created_at,
        }
    }

    /// Return the fire-at instant if this is a scheduled record.
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Scheduled { scheduled_at, .. } => Some(*scheduled_at),
            _ => None,
        }
    }

    /// Return the recurring-job id if this is a scheduled record that
    /// carries one.
    pub fn recurring_job_id(&self) -> Option<&str> {
        match self {
            Self::Scheduled {
                recurring_job_id, ..
            } => recurring_job_id.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip_through_name() {
        for state in JobState::ALL {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("RUNNING"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Deleted.is_terminal());
        assert!(!JobState::Enqueued.is_terminal());
        assert!(!JobState::Scheduled.is_terminal());
    }

    #[test]
    fn test_record_state_and_payload() {
        let now = Utc::now();
        let record = StateRecord::Scheduled {
            created_at: now,
            scheduled_at: now + chrono::Duration::hours(1),
            recurring_job_id: Some("nightly-report".to_string()),
            reason: None,
        };
        assert_eq!(record.state(), JobState::Scheduled);
        assert_eq!(record.created_at(), now);
        assert_eq!(record.recurring_job_id(), Some("nightly-report"));
        assert!(record.scheduled_at().is_some());

        let record = StateRecord::Enqueued { created_at: now };
        assert_eq!(record.state(), JobState::Enqueued);
        assert_eq!(record.scheduled_at(), None);
    }
}

//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::details::JobDetails;
use super::state::{JobState, StateRecord};

/// A background job.
///
/// A job carries a monotonic version counter and an ordered, non-empty
/// history of state records. The current state is always the state of the
/// most recent record, and `updated_at` is the instant of that record.
///
/// Jobs are created with `version == 0`; every successfully persisted
/// mutation increments the version by exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Number of successful persisted mutations since creation.
    pub version: i32,
    /// Descriptor of the user code this job invokes.
    pub job_details: JobDetails,
    /// Ordered state history, oldest first. Never empty.
    pub state_history: Vec<StateRecord>,
    /// Instant of the most recent state record, microsecond resolution.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new unsaved job with a random id and the given initial
    /// state record.
    pub fn new(job_details: JobDetails, initial_state: StateRecord) -> Self {
        Self::with_id(Uuid::new_v4(), job_details, initial_state)
    }

    /// Create a new unsaved job with an explicit id.
    pub fn with_id(id: Uuid, job_details: JobDetails, initial_state: StateRecord) -> Self {
        let updated_at = initial_state.created_at();
        Self {
            id,
            version: 0,
            job_details,
            state_history: vec![initial_state],
            updated_at,
        }
    }

    /// Check whether the job has never been persisted.
    pub fn is_new(&self) -> bool {
        self.version == 0
    }

    /// Return the current state.
    pub fn state(&self) -> JobState {
        self.last_state_record().state()
    }

    /// Return the most recent state record.
    pub fn last_state_record(&self) -> &StateRecord {
        self.state_history
            .last()
            .unwrap_or_else(|| unreachable!("job state history is never empty"))
    }

    /// Return the state the job was in before the current one, if any.
    pub fn previous_state(&self) -> Option<JobState> {
        let len = self.state_history.len();
        if len >= 2 {
            Some(self.state_history[len - 2].state())
        } else {
            None
        }
    }

    /// Check whether the job currently is in the given state.
    pub fn has_state(&self, state: JobState) -> bool {
        self.state() == state
    }

    /// Return the fire-at instant if the job currently is scheduled.
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.last_state_record().scheduled_at()
    }

    /// Return the recurring-job id this instance was spawned from, if any.
    ///
    /// Looks at the whole history: a job enqueued from a schedule keeps its
    /// link to the recurring job that produced it.
    pub fn recurring_job_id(&self) -> Option<&str> {
        self.state_history
            .iter()
            .find_map(StateRecord::recurring_job_id)
    }

    /// Return the deduplication signature of this job's details.
    pub fn signature(&self) -> String {
        self.job_details.signature()
    }

    /// Append a state record, moving the job to that state.
    pub fn transition(&mut self, record: StateRecord) {
        self.updated_at = record.created_at();
        self.state_history.push(record);
    }

    /// Return up to the `n` most recent state records, newest first.
    pub fn last_state_records(&self, n: usize) -> impl Iterator<Item = &StateRecord> {
        self.state_history.iter().rev().take(n)
    }

    /// Increment the version counter, returning the new value.
    pub fn increment_version(&mut self) -> i32 {
        self.version += 1;
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> JobDetails {
        JobDetails::new("com.acme.Mailer", "sendDigest", vec!["7".to_string()])
    }

    #[test]
    fn test_new_job_starts_at_version_zero() {
        let now = Utc::now();
        let job = Job::new(details(), StateRecord::Enqueued { created_at: now });
        assert!(job.is_new());
        assert_eq!(job.version, 0);
        assert_eq!(job.state(), JobState::Enqueued);
        assert_eq!(job.updated_at, now);
    }

    #[test]
    fn test_transition_tracks_state_and_updated_at() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(5);
        let mut job = Job::new(
            details(),
            StateRecord::Scheduled {
                created_at: t0,
                scheduled_at: t1,
                recurring_job_id: Some("digest".to_string()),
                reason: None,
            },
        );
        job.transition(StateRecord::Enqueued { created_at: t1 });

        assert_eq!(job.state(), JobState::Enqueued);
        assert_eq!(job.previous_state(), Some(JobState::Scheduled));
        assert_eq!(job.updated_at, t1);
        assert_eq!(job.recurring_job_id(), Some("digest"));
        assert_eq!(job.state_history.len(), 2);
    }

    #[test]
    fn test_serde_roundtrip() {
        let now = Utc::now();
        let mut job = Job::new(details(), StateRecord::Enqueued { created_at: now });
        job.transition(StateRecord::Processing {
            created_at: now,
            server_id: Uuid::new_v4(),
        });

        let json = serde_json::to_string(&job).expect("serialize");
        let parsed: Job = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, job);
    }
}

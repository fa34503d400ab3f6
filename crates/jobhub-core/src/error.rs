//! Unified storage error types for JobHub.
//!
//! Every backend maps its transport errors into [`StorageError`] for
//! consistent propagation through the ? operator. An error always means
//! the operation did not commit: atomic groups fail cleanly.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use jobhub_entity::Job;

/// The unified storage error used throughout JobHub.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The version check failed for one or more jobs. Carries the
    /// conflicting jobs so the caller can refresh and reapply, or the
    /// local/stored pairs when a higher layer gave up reconciling.
    #[error("{0}")]
    ConcurrentJobModification(ConcurrentJobModification),

    /// No job exists with the given id.
    #[error("job {0} was not found")]
    JobNotFound(Uuid),

    /// A heartbeat was attempted for a server no longer in the registry.
    #[error("background job server {0} has timed out and was removed from the registry")]
    ServerTimedOut(Uuid),

    /// Malformed page request, mixed new/existing batch, unsupported sort.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Retryable network or contention failure. The operation did not
    /// commit; retry policy lives in the worker layer.
    #[error("transient storage failure: {message}")]
    Transient {
        /// What failed.
        message: String,
        /// Underlying transport error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Non-retryable backend error (schema mismatch, authorization).
    /// The caller should stop using this provider.
    #[error("fatal storage failure: {message}")]
    Fatal {
        /// What failed.
        message: String,
        /// Underlying transport error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    /// A version conflict on a single job.
    pub fn conflict(job: Job) -> Self {
        Self::ConcurrentJobModification(ConcurrentJobModification::Conflicts(vec![job]))
    }

    /// A version conflict on a set of jobs.
    pub fn conflicts(jobs: Vec<Job>) -> Self {
        Self::ConcurrentJobModification(ConcurrentJobModification::Conflicts(jobs))
    }

    /// An unresolvable conflict from local/stored pairs a higher layer
    /// could not reconcile.
    pub fn unresolvable(conflicts: Vec<JobVersionConflict>) -> Self {
        Self::ConcurrentJobModification(ConcurrentJobModification::Unresolvable(conflicts))
    }

    /// Create an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a transient error without an underlying cause.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transient error with an underlying cause.
    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a fatal error without an underlying cause.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
        }
    }

    /// Create a fatal error with an underlying cause.
    pub fn fatal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fatal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check whether the operation may be retried by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<ConcurrentJobModification> for StorageError {
    fn from(modification: ConcurrentJobModification) -> Self {
        Self::ConcurrentJobModification(modification)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::fatal_with_source(format!("JSON serialization error: {err}"), err)
    }
}

/// Payload of a failed version check.
#[derive(Debug, Clone)]
pub enum ConcurrentJobModification {
    /// The jobs whose expected version did not match the stored version.
    Conflicts(Vec<Job>),
    /// Local/stored pairs a higher layer failed to reconcile.
    Unresolvable(Vec<JobVersionConflict>),
}

impl ConcurrentJobModification {
    /// Return the local side of every conflicting job.
    pub fn conflicting_jobs(&self) -> Vec<&Job> {
        match self {
            Self::Conflicts(jobs) => jobs.iter().collect(),
            Self::Unresolvable(conflicts) => conflicts.iter().map(|c| &c.local).collect(),
        }
    }
}

impl fmt::Display for ConcurrentJobModification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflicts(jobs) => {
                write!(f, "version check failed for {} job(s):", jobs.len())?;
                for job in jobs {
                    write!(f, " {} (version {})", job.id, job.version)?;
                }
                Ok(())
            }
            Self::Unresolvable(conflicts) => {
                writeln!(f, "unresolvable concurrent job modifications:")?;
                for conflict in conflicts {
                    conflict.fmt(f)?;
                }
                Ok(())
            }
        }
    }
}

/// One local/stored pair of job snapshots that could not be reconciled.
///
/// Rendering is a read-only diagnostic: the job id, both version numbers
/// and the most recent states (up to three) with their timestamps, for
/// each side.
#[derive(Debug, Clone)]
pub struct JobVersionConflict {
    /// The snapshot the worker process holds.
    pub local: Job,
    /// The snapshot currently persisted.
    pub stored: Job,
}

impl JobVersionConflict {
    /// Pair a local snapshot with the stored one.
    pub fn new(local: Job, stored: Job) -> Self {
        Self { local, stored }
    }
}

impl fmt::Display for JobVersionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "job {}:", self.local.id)?;
        writeln!(
            f,
            "  local version: {}; storage version: {}",
            self.local.version, self.stored.version
        )?;
        writeln!(f, "  local state: {}", recent_states(&self.local))?;
        writeln!(f, "  storage state: {}", recent_states(&self.stored))
    }
}

/// Render the up-to-three most recent states of a job, newest first.
fn recent_states(job: &Job) -> String {
    job.last_state_records(3)
        .map(|record| format!("{} (at {})", record.state(), record.created_at()))
        .collect::<Vec<_>>()
        .join(" <- ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobhub_entity::{JobDetails, StateRecord};

    fn job() -> Job {
        Job::new(
            JobDetails::new("com.acme.Mailer", "send", Vec::new()),
            StateRecord::Enqueued {
                created_at: Utc::now(),
            },
        )
    }

    #[test]
    fn test_conflict_carries_job() {
        let job = job();
        let id = job.id;
        let err = StorageError::conflict(job);
        match err {
            StorageError::ConcurrentJobModification(modification) => {
                let jobs = modification.conflicting_jobs();
                assert_eq!(jobs.len(), 1);
                assert_eq!(jobs[0].id, id);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unresolvable_diagnostic_shows_both_sides() {
        let mut local = job();
        local.version = 2;
        let mut stored = local.clone();
        stored.version = 4;
        stored.transition(StateRecord::Processing {
            created_at: Utc::now(),
            server_id: Uuid::new_v4(),
        });
        stored.transition(StateRecord::Succeeded {
            created_at: Utc::now(),
        });

        let rendered =
            StorageError::unresolvable(vec![JobVersionConflict::new(local, stored)]).to_string();
        assert!(rendered.contains("local version: 2; storage version: 4"));
        assert!(rendered.contains("SUCCEEDED"));
        assert!(rendered.contains("PROCESSING"));
        // Only the three most recent states per side are rendered.
        assert_eq!(rendered.matches("(at ").count(), 4);
    }

    #[test]
    fn test_transient_classification() {
        assert!(StorageError::transient("connection reset").is_transient());
        assert!(!StorageError::fatal("schema mismatch").is_transient());
        assert!(!StorageError::JobNotFound(Uuid::nil()).is_transient());
    }
}

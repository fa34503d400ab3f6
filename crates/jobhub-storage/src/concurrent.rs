//! Optimistic-concurrency helpers shared by the backends.
//!
//! The version-check protocol itself lives in each backend (it needs the
//! backend's native conditional mechanism); this module holds the pure
//! parts: batch lifecycle partitioning and conflict collection.

use jobhub_core::{StorageError, StorageResult};
use jobhub_entity::Job;

/// Lifecycle shape of a batch handed to `save_jobs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Every job has `version == 0`.
    AllNew,
    /// Every job has been persisted before.
    AllExisting,
}

/// Classify a batch, rejecting mixed new/existing batches.
pub fn classify_batch(jobs: &[Job]) -> StorageResult<BatchKind> {
    let new_jobs = jobs.iter().filter(|job| job.is_new()).count();
    if new_jobs == jobs.len() {
        Ok(BatchKind::AllNew)
    } else if new_jobs == 0 {
        Ok(BatchKind::AllExisting)
    } else {
        Err(StorageError::invalid_argument(
            "all jobs in a batch must be either new (version 0) or existing",
        ))
    }
}

/// Outcome of arbitrating a batch of existing jobs independently.
#[derive(Debug, Default)]
pub struct ConflictCollector {
    conflicts: Vec<Job>,
}

impl ConflictCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the local snapshot of a job that failed its version check.
    pub fn record(&mut self, job: Job) {
        self.conflicts.push(job);
    }

    /// Finish: `Ok(())` when every job committed, otherwise one
    /// concurrent-modification error carrying the complete conflict set.
    pub fn into_result(self) -> StorageResult<()> {
        if self.conflicts.is_empty() {
            Ok(())
        } else {
            Err(StorageError::conflicts(self.conflicts))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobhub_core::error::ConcurrentJobModification;
    use jobhub_entity::{JobDetails, StateRecord};

    fn job(version: i32) -> Job {
        let mut job = Job::new(
            JobDetails::new("com.acme.Mailer", "send", Vec::new()),
            StateRecord::Enqueued {
                created_at: Utc::now(),
            },
        );
        job.version = version;
        job
    }

    #[test]
    fn test_classify_batch() {
        assert_eq!(
            classify_batch(&[job(0), job(0)]).expect("all new"),
            BatchKind::AllNew
        );
        assert_eq!(
            classify_batch(&[job(1), job(3)]).expect("all existing"),
            BatchKind::AllExisting
        );
        let err = classify_batch(&[job(0), job(1)]).expect_err("mixed");
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn test_collector_reports_complete_set() {
        let mut collector = ConflictCollector::new();
        collector.record(job(2));
        collector.record(job(5));
        let err = collector.into_result().expect_err("conflicts");
        match err {
            StorageError::ConcurrentJobModification(ConcurrentJobModification::Conflicts(
                jobs,
            )) => assert_eq!(jobs.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_collector_empty_is_ok() {
        assert!(ConflictCollector::new().into_result().is_ok());
    }
}

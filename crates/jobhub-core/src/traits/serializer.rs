//! Job serialization seam.
//!
//! Backends that persist jobs as documents (Redis, SQL) go through this
//! trait so the document format is owned by the host application, not by
//! the core.

use jobhub_entity::{Job, RecurringJob};

use crate::result::StorageResult;

/// Serializes jobs and recurring jobs to and from their persisted
/// document form.
pub trait JobSerializer: Send + Sync + 'static {
    /// Serialize a job to its document form.
    fn serialize_job(&self, job: &Job) -> StorageResult<String>;

    /// Deserialize a job from its document form.
    fn deserialize_job(&self, raw: &str) -> StorageResult<Job>;

    /// Serialize a recurring job to its document form.
    fn serialize_recurring_job(&self, recurring_job: &RecurringJob) -> StorageResult<String>;

    /// Deserialize a recurring job from its document form.
    fn deserialize_recurring_job(&self, raw: &str) -> StorageResult<RecurringJob>;
}

/// The default serializer: JSON via serde.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonJobSerializer;

impl JobSerializer for JsonJobSerializer {
    fn serialize_job(&self, job: &Job) -> StorageResult<String> {
        Ok(serde_json::to_string(job)?)
    }

    fn deserialize_job(&self, raw: &str) -> StorageResult<Job> {
        Ok(serde_json::from_str(raw)?)
    }

    fn serialize_recurring_job(&self, recurring_job: &RecurringJob) -> StorageResult<String> {
        Ok(serde_json::to_string(recurring_job)?)
    }

    fn deserialize_recurring_job(&self, raw: &str) -> StorageResult<RecurringJob> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobhub_entity::{JobDetails, StateRecord};

    #[test]
    fn test_json_job_roundtrip() {
        let serializer = JsonJobSerializer;
        let job = Job::new(
            JobDetails::new("com.acme.Billing", "invoice", vec!["31".to_string()]),
            StateRecord::Enqueued {
                created_at: Utc::now(),
            },
        );
        let raw = serializer.serialize_job(&job).expect("serialize");
        let parsed = serializer.deserialize_job(&raw).expect("deserialize");
        assert_eq!(parsed, job);
    }

    #[test]
    fn test_malformed_document_is_fatal() {
        let serializer = JsonJobSerializer;
        let err = serializer.deserialize_job("{").expect_err("malformed");
        assert!(!err.is_transient());
    }
}

//! Redis key builders for all JobHub entries.
//!
//! Centralising key construction prevents typos and makes it easy to find
//! every key family the store uses. An empty prefix produces bare keys;
//! a non-empty prefix is joined with `:`.

use std::fmt::Display;

use jobhub_entity::JobState;

fn with_prefix(prefix: &str, suffix: String) -> String {
    if prefix.is_empty() {
        suffix
    } else {
        format!("{prefix}:{suffix}")
    }
}

/// Key of the serialized job document.
pub fn job_key(prefix: &str, id: impl Display) -> String {
    with_prefix(prefix, format!("job:{id}"))
}

/// Key of the job's version counter.
pub fn job_version_key(prefix: &str, id: impl Display) -> String {
    with_prefix(prefix, format!("jobversion:{id}"))
}

/// Sorted set of job ids in a state, scored by `updated_at` microseconds.
pub fn job_queue_key(prefix: &str, state: JobState) -> String {
    with_prefix(prefix, format!("queue:{state}"))
}

/// Sorted set of scheduled job ids, scored by fire-at microseconds.
pub fn scheduled_jobs_key(prefix: &str) -> String {
    with_prefix(prefix, "scheduled".to_string())
}

/// Set of job-details signatures present in a state.
pub fn job_details_key(prefix: &str, state: JobState) -> String {
    with_prefix(prefix, format!("jobdetails:{state}"))
}

/// Set of all recurring job ids.
pub fn recurring_jobs_key(prefix: &str) -> String {
    with_prefix(prefix, "recurringjobs".to_string())
}

/// Key of one serialized recurring job document.
pub fn recurring_job_key(prefix: &str, id: &str) -> String {
    with_prefix(prefix, format!("recurringjob:{id}"))
}

/// Set of recurring job ids represented by at least one job in a state.
pub fn recurring_job_state_key(prefix: &str, state: JobState) -> String {
    with_prefix(prefix, format!("recurringjob:{state}"))
}

/// Hash of one metadata record, keyed by the compound `name-owner`.
pub fn metadata_key(prefix: &str, compound: &str) -> String {
    with_prefix(prefix, format!("metadata:{compound}"))
}

/// Set of all metadata hash keys.
pub fn metadatas_key(prefix: &str) -> String {
    with_prefix(prefix, "metadatas".to_string())
}

/// Hash of one background job server record.
pub fn server_key(prefix: &str, id: impl Display) -> String {
    with_prefix(prefix, format!("backgroundjobserver:{id}"))
}

/// Sorted set of server ids, scored by announce-time microseconds.
pub fn servers_created_key(prefix: &str) -> String {
    with_prefix(prefix, "backgroundjobservers:created".to_string())
}

/// Sorted set of server ids, scored by last-heartbeat microseconds.
pub fn servers_updated_key(prefix: &str) -> String {
    with_prefix(prefix, "backgroundjobservers:updated".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_prefix_is_optional() {
        let id = Uuid::nil();
        assert_eq!(
            job_key("", id),
            "job:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            job_key("acme", id),
            "acme:job:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_state_keys_use_uppercase_names() {
        assert_eq!(job_queue_key("", JobState::Enqueued), "queue:ENQUEUED");
        assert_eq!(
            job_details_key("acme", JobState::Scheduled),
            "acme:jobdetails:SCHEDULED"
        );
        assert_eq!(
            recurring_job_state_key("", JobState::Failed),
            "recurringjob:FAILED"
        );
    }
}

//! Recurring job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobDetails;

/// A recurring job definition.
///
/// Recurring jobs are templates: the dispatch loop periodically evaluates
/// the schedule expression and spawns ordinary job instances from the
/// details template. The lifetime of a recurring job is independent of the
/// instances it spawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringJob {
    /// Caller-supplied identifier, unique across recurring jobs.
    pub id: String,
    /// Schedule expression (cron syntax).
    pub cron_expression: String,
    /// Time zone the schedule is evaluated in, if not UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    /// Template for the jobs this schedule spawns.
    pub job_details: JobDetails,
    /// When the definition was created.
    pub created_at: DateTime<Utc>,
}

impl RecurringJob {
    /// Create a new recurring job definition.
    pub fn new(
        id: impl Into<String>,
        cron_expression: impl Into<String>,
        job_details: JobDetails,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            cron_expression: cron_expression.into(),
            zone_id: None,
            job_details,
            created_at,
        }
    }
}

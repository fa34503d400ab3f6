//! Secondary-index write-set derivation.
//!
//! Every mutating job operation rewrites the secondary indexes atomically
//! with the primary write. This module derives that write-set as pure
//! data; each backend lowers the operations to its native mechanism
//! (sorted-set/set commands for the key-value store, map surgery for the
//! in-memory store; the SQL store keeps its indexes as columns and lowers
//! the whole group to one row write).
//!
//! Indexes maintained:
//! - per-state queue, ordered by `updated_at` (microseconds)
//! - scheduled set, ordered by fire-at instant (microseconds)
//! - signature-by-state sets, backing the exists-by-details queries
//! - recurring-refs-by-state sets, backing the recurring-instance queries

use chrono::{DateTime, Utc};
use uuid::Uuid;

use jobhub_entity::{Job, JobState};

/// One index mutation within an atomic group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOp {
    /// Put the job into a state queue at the given score.
    QueueAdd {
        /// Queue state.
        state: JobState,
        /// Job id.
        id: Uuid,
        /// `updated_at` in microseconds since the epoch.
        score_micros: i64,
    },
    /// Drop the job from a state queue.
    QueueRemove {
        /// Queue state.
        state: JobState,
        /// Job id.
        id: Uuid,
    },
    /// Put the job into the scheduled set at its fire-at instant.
    ScheduledAdd {
        /// Job id.
        id: Uuid,
        /// Fire-at instant in microseconds since the epoch.
        score_micros: i64,
    },
    /// Drop the job from the scheduled set.
    ScheduledRemove {
        /// Job id.
        id: Uuid,
    },
    /// Record the signature as present in a state.
    SignatureAdd {
        /// State the signature is present in.
        state: JobState,
        /// Deduplication signature.
        signature: String,
    },
    /// Drop the signature from a state.
    SignatureRemove {
        /// State to drop from.
        state: JobState,
        /// Deduplication signature.
        signature: String,
    },
    /// Record a recurring job as represented in a state.
    RecurringRefAdd {
        /// State the instance is in.
        state: JobState,
        /// Recurring job id.
        recurring_job_id: String,
    },
    /// Drop a recurring-job reference from a state.
    RecurringRefRemove {
        /// State to drop from.
        state: JobState,
        /// Recurring job id.
        recurring_job_id: String,
    },
}

/// Convert an instant to the microsecond score used by every ordered
/// index.
pub fn to_epoch_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// Derive the index rewrite for saving `job`: the removals implied by any
/// prior snapshot followed by the additions implied by the new one.
///
/// Removals are written blind (a fresh insert has nothing to remove, which
/// is harmless) so the same group shape serves inserts and updates. The
/// scheduled signature is kept while a scheduled representative exists and
/// dropped on any transition out of SCHEDULED.
pub fn rewrite_ops(job: &Job) -> Vec<IndexOp> {
    let signature = job.signature();
    let mut ops = Vec::with_capacity(24);

    // Stale entries from the previous state of this job.
    ops.push(IndexOp::ScheduledRemove { id: job.id });
    for state in JobState::ALL {
        ops.push(IndexOp::QueueRemove { state, id: job.id });
    }
    for state in JobState::ALL {
        if state != JobState::Scheduled {
            ops.push(IndexOp::SignatureRemove {
                state,
                signature: signature.clone(),
            });
        }
    }
    if job.previous_state() == Some(JobState::Scheduled) && job.state() != JobState::Scheduled {
        ops.push(IndexOp::SignatureRemove {
            state: JobState::Scheduled,
            signature: signature.clone(),
        });
    }
    if let Some(recurring_job_id) = job.recurring_job_id() {
        for state in JobState::ALL {
            ops.push(IndexOp::RecurringRefRemove {
                state,
                recurring_job_id: recurring_job_id.to_string(),
            });
        }
    }

    // Entries implied by the new snapshot.
    let state = job.state();
    ops.push(IndexOp::QueueAdd {
        state,
        id: job.id,
        score_micros: to_epoch_micros(job.updated_at),
    });
    ops.push(IndexOp::SignatureAdd { state, signature });
    if let Some(scheduled_at) = job.scheduled_at() {
        ops.push(IndexOp::ScheduledAdd {
            id: job.id,
            score_micros: to_epoch_micros(scheduled_at),
        });
    }
    if let Some(recurring_job_id) = job.recurring_job_id() {
        ops.push(IndexOp::RecurringRefAdd {
            state,
            recurring_job_id: recurring_job_id.to_string(),
        });
    }

    ops
}

/// Derive the full index removal for permanently deleting `job`.
pub fn removal_ops(job: &Job) -> Vec<IndexOp> {
    let signature = job.signature();
    let mut ops = Vec::with_capacity(24);

    ops.push(IndexOp::ScheduledRemove { id: job.id });
    for state in JobState::ALL {
        ops.push(IndexOp::QueueRemove { state, id: job.id });
    }
    for state in JobState::ALL {
        ops.push(IndexOp::SignatureRemove {
            state,
            signature: signature.clone(),
        });
    }
    if let Some(recurring_job_id) = job.recurring_job_id() {
        for state in JobState::ALL {
            ops.push(IndexOp::RecurringRefRemove {
                state,
                recurring_job_id: recurring_job_id.to_string(),
            });
        }
    }

    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobhub_entity::{JobDetails, StateRecord};

    fn scheduled_job(recurring: Option<&str>) -> Job {
        let now = Utc::now();
        Job::new(
            JobDetails::new("com.acme.Reports", "weekly", Vec::new()),
            StateRecord::Scheduled {
                created_at: now,
                scheduled_at: now + chrono::Duration::minutes(10),
                recurring_job_id: recurring.map(str::to_string),
                reason: None,
            },
        )
    }

    fn has_scheduled_signature_removal(ops: &[IndexOp]) -> bool {
        ops.iter().any(|op| {
            matches!(
                op,
                IndexOp::SignatureRemove {
                    state: JobState::Scheduled,
                    ..
                }
            )
        })
    }

    #[test]
    fn test_scheduled_job_adds_to_scheduled_set() {
        let job = scheduled_job(None);
        let ops = rewrite_ops(&job);
        assert!(ops
            .iter()
            .any(|op| matches!(op, IndexOp::ScheduledAdd { id, .. } if *id == job.id)));
        assert!(ops.iter().any(|op| matches!(
            op,
            IndexOp::QueueAdd {
                state: JobState::Scheduled,
                ..
            }
        )));
        // Still scheduled, so the scheduled signature must survive.
        assert!(!has_scheduled_signature_removal(&ops));
    }

    #[test]
    fn test_transition_out_of_scheduled_cleans_scheduled_signature() {
        for next in [
            StateRecord::Enqueued {
                created_at: Utc::now(),
            },
            StateRecord::Failed {
                created_at: Utc::now(),
                message: "boom".to_string(),
            },
            StateRecord::Deleted {
                created_at: Utc::now(),
            },
        ] {
            let mut job = scheduled_job(None);
            job.transition(next);
            let ops = rewrite_ops(&job);
            assert!(has_scheduled_signature_removal(&ops));
            assert!(!ops
                .iter()
                .any(|op| matches!(op, IndexOp::ScheduledAdd { .. })));
        }
    }

    #[test]
    fn test_transition_not_from_scheduled_keeps_scheduled_signature() {
        let now = Utc::now();
        let mut job = Job::new(
            JobDetails::new("com.acme.Reports", "weekly", Vec::new()),
            StateRecord::Enqueued { created_at: now },
        );
        job.transition(StateRecord::Processing {
            created_at: now,
            server_id: Uuid::new_v4(),
        });
        let ops = rewrite_ops(&job);
        assert!(!has_scheduled_signature_removal(&ops));
    }

    #[test]
    fn test_recurring_ref_follows_current_state() {
        let mut job = scheduled_job(Some("nightly"));
        job.transition(StateRecord::Enqueued {
            created_at: Utc::now(),
        });
        let ops = rewrite_ops(&job);
        assert!(ops.iter().any(|op| matches!(
            op,
            IndexOp::RecurringRefAdd {
                state: JobState::Enqueued,
                recurring_job_id,
            } if recurring_job_id == "nightly"
        )));
        // References in every other state are dropped first.
        let removals = ops
            .iter()
            .filter(|op| matches!(op, IndexOp::RecurringRefRemove { .. }))
            .count();
        assert_eq!(removals, JobState::ALL.len());
    }

    #[test]
    fn test_removal_ops_clear_everything() {
        let mut job = scheduled_job(Some("nightly"));
        job.transition(StateRecord::Enqueued {
            created_at: Utc::now(),
        });
        let ops = removal_ops(&job);
        assert!(ops
            .iter()
            .all(|op| !matches!(op, IndexOp::QueueAdd { .. }
                | IndexOp::ScheduledAdd { .. }
                | IndexOp::SignatureAdd { .. }
                | IndexOp::RecurringRefAdd { .. })));
        // Signatures are cleared from every state, scheduled included.
        let signature_removals = ops
            .iter()
            .filter(|op| matches!(op, IndexOp::SignatureRemove { .. }))
            .count();
        assert_eq!(signature_removals, JobState::ALL.len());
    }
}

//! Schema migration runner.
//!
//! Table and view names carry a runtime-configurable prefix, so the
//! scripts are templated here instead of living in a migrations directory:
//! compile-time embedding cannot express the prefix. Applied scripts are
//! recorded in the migrations table; `DatabaseOptions` decides whether to
//! apply, validate or skip.

use sqlx::PgPool;
use tracing::info;

use jobhub_core::config::DatabaseOptions;
use jobhub_core::{StorageError, StorageResult};

use super::map_sqlx_err;

/// Ordered schema scripts, templated over the table prefix.
pub fn migrations(prefix: &str) -> Vec<(&'static str, String)> {
    vec![
        (
            "v001_create_jobs",
            format!(
                "CREATE TABLE IF NOT EXISTS {p}jobrunr_jobs (\n\
                 \x20   id UUID PRIMARY KEY,\n\
                 \x20   version INT NOT NULL,\n\
                 \x20   job_as_json TEXT NOT NULL,\n\
                 \x20   job_signature TEXT NOT NULL,\n\
                 \x20   state TEXT NOT NULL,\n\
                 \x20   updated_at TIMESTAMPTZ NOT NULL,\n\
                 \x20   scheduled_at TIMESTAMPTZ,\n\
                 \x20   recurring_job_id TEXT\n\
                 );\n\
                 CREATE INDEX IF NOT EXISTS {p}jobrunr_jobs_state_updated_idx\n\
                 \x20   ON {p}jobrunr_jobs (state, updated_at);\n\
                 CREATE INDEX IF NOT EXISTS {p}jobrunr_jobs_state_scheduled_idx\n\
                 \x20   ON {p}jobrunr_jobs (state, scheduled_at);\n\
                 CREATE INDEX IF NOT EXISTS {p}jobrunr_jobs_recurring_idx\n\
                 \x20   ON {p}jobrunr_jobs (recurring_job_id, state);",
                p = prefix
            ),
        ),
        (
            "v002_create_recurring_jobs",
            format!(
                "CREATE TABLE IF NOT EXISTS {p}jobrunr_recurring_jobs (\n\
                 \x20   id TEXT PRIMARY KEY,\n\
                 \x20   job_as_json TEXT NOT NULL\n\
                 );",
                p = prefix
            ),
        ),
        (
            "v003_create_background_job_servers",
            format!(
                "CREATE TABLE IF NOT EXISTS {p}jobrunr_background_job_servers (\n\
                 \x20   id UUID PRIMARY KEY,\n\
                 \x20   worker_pool_size INT NOT NULL,\n\
                 \x20   poll_interval_seconds INT NOT NULL,\n\
                 \x20   first_heartbeat TIMESTAMPTZ NOT NULL,\n\
                 \x20   last_heartbeat TIMESTAMPTZ NOT NULL,\n\
                 \x20   running BOOLEAN NOT NULL,\n\
                 \x20   system_total_memory BIGINT NOT NULL,\n\
                 \x20   system_free_memory BIGINT NOT NULL,\n\
                 \x20   system_cpu_load DOUBLE PRECISION NOT NULL,\n\
                 \x20   process_max_memory BIGINT NOT NULL,\n\
                 \x20   process_free_memory BIGINT NOT NULL,\n\
                 \x20   process_allocated_memory BIGINT NOT NULL,\n\
                 \x20   process_cpu_load DOUBLE PRECISION NOT NULL\n\
                 );\n\
                 CREATE INDEX IF NOT EXISTS {p}jobrunr_bgjobsrvrs_fsthb_idx\n\
                 \x20   ON {p}jobrunr_background_job_servers (first_heartbeat);\n\
                 CREATE INDEX IF NOT EXISTS {p}jobrunr_bgjobsrvrs_lsthb_idx\n\
                 \x20   ON {p}jobrunr_background_job_servers (last_heartbeat);",
                p = prefix
            ),
        ),
        (
            "v004_create_metadata",
            format!(
                "CREATE TABLE IF NOT EXISTS {p}jobrunr_metadata (\n\
                 \x20   name TEXT NOT NULL,\n\
                 \x20   owner TEXT NOT NULL,\n\
                 \x20   value TEXT NOT NULL,\n\
                 \x20   created_at TIMESTAMPTZ NOT NULL,\n\
                 \x20   updated_at TIMESTAMPTZ NOT NULL,\n\
                 \x20   PRIMARY KEY (name, owner)\n\
                 );\n\
                 INSERT INTO {p}jobrunr_metadata (name, owner, value, created_at, updated_at)\n\
                 VALUES ('succeeded-jobs-counter', 'cluster', '0', now(), now())\n\
                 ON CONFLICT (name, owner) DO NOTHING;",
                p = prefix
            ),
        ),
        (
            "v005_create_jobs_stats_view",
            format!(
                "CREATE OR REPLACE VIEW {p}jobrunr_jobs_stats AS\n\
                 SELECT\n\
                 \x20   count(*) FILTER (WHERE state NOT IN ('AWAITING', 'DELETED')) AS total,\n\
                 \x20   count(*) FILTER (WHERE state = 'AWAITING') AS awaiting,\n\
                 \x20   count(*) FILTER (WHERE state = 'SCHEDULED') AS scheduled,\n\
                 \x20   count(*) FILTER (WHERE state = 'ENQUEUED') AS enqueued,\n\
                 \x20   count(*) FILTER (WHERE state = 'PROCESSING') AS processing,\n\
                 \x20   count(*) FILTER (WHERE state = 'SUCCEEDED') AS succeeded,\n\
                 \x20   count(*) FILTER (WHERE state = 'FAILED') AS failed,\n\
                 \x20   count(*) FILTER (WHERE state = 'DELETED') AS deleted\n\
                 FROM {p}jobrunr_jobs;",
                p = prefix
            ),
        ),
    ]
}

/// Apply or validate the schema according to the database options.
pub async fn run(pool: &PgPool, prefix: &str, options: DatabaseOptions) -> StorageResult<()> {
    match options {
        DatabaseOptions::SkipCreate => Ok(()),
        DatabaseOptions::Create => apply_pending(pool, prefix).await,
        DatabaseOptions::Validate => validate(pool, prefix).await,
    }
}

async fn apply_pending(pool: &PgPool, prefix: &str) -> StorageResult<()> {
    let bootstrap = format!(
        "CREATE TABLE IF NOT EXISTS {prefix}jobrunr_migrations (\n\
         \x20   id SERIAL PRIMARY KEY,\n\
         \x20   script TEXT NOT NULL UNIQUE,\n\
         \x20   installed_at TIMESTAMPTZ NOT NULL DEFAULT now()\n\
         );"
    );
    sqlx::raw_sql(&bootstrap)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_err("failed to create migrations table", e))?;

    let installed_query = format!(
        "SELECT EXISTS (SELECT 1 FROM {prefix}jobrunr_migrations WHERE script = $1)"
    );
    let record_query =
        format!("INSERT INTO {prefix}jobrunr_migrations (script) VALUES ($1)");

    for (script, sql) in migrations(prefix) {
        let installed: bool = sqlx::query_scalar(&installed_query)
            .bind(script)
            .fetch_one(pool)
            .await
            .map_err(|e| map_sqlx_err("failed to read migration state", e))?;
        if installed {
            continue;
        }

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("failed to begin migration transaction", e))?;
        sqlx::raw_sql(&sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("failed to apply schema script", e))?;
        sqlx::query(&record_query)
            .bind(script)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_err("failed to record schema script", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_err("failed to commit schema script", e))?;
        info!(script, "Applied schema script");
    }
    Ok(())
}

async fn validate(pool: &PgPool, prefix: &str) -> StorageResult<()> {
    let installed_query =
        format!("SELECT script FROM {prefix}jobrunr_migrations ORDER BY id");
    let installed: Vec<String> = sqlx::query_scalar(&installed_query)
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_err("schema validation failed: migrations table missing", e))?;

    for (script, _) in migrations(prefix) {
        if !installed.iter().any(|applied| applied == script) {
            return Err(StorageError::fatal(format!(
                "schema validation failed: script '{script}' has not been applied"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_are_prefixed_and_ordered() {
        let scripts = migrations("acme_");
        assert_eq!(scripts.len(), 5);
        assert!(scripts[0].1.contains("acme_jobrunr_jobs"));
        assert!(scripts[4].1.contains("acme_jobrunr_jobs_stats"));
        let names: Vec<_> = scripts.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_counter_seed_is_present() {
        let scripts = migrations("");
        let metadata = &scripts[3].1;
        assert!(metadata.contains("'succeeded-jobs-counter', 'cluster', '0'"));
    }
}

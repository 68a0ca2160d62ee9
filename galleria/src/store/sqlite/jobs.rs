use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{
    from_sql_time, from_sql_u64, json_column, parse_column, to_sql_time, to_sql_u64, SqliteStore,
};
use crate::ids::{ImageId, JobId};
use crate::jobs::{
    ItemOutcome, JobProgress, JobStateStore, JobStatus, ProcessingJob, StatusChange,
    TransitionOutcome,
};
use crate::store::{StoreError, StoreResult};

const JOB_COLUMNS: &str = "id, job_type, scope_json, profile_json, skip_existing, status, \
     total_images, completed_images, failed_images, skipped_images, total_size_bytes, \
     last_progress_at, can_resume, created_at, started_at, completed_at, updated_at, \
     error_message";

/// Heartbeat used for staleness, falling back to start and creation time.
const HEARTBEAT: &str = "COALESCE(last_progress_at, started_at, created_at)";

/// Job row without its per-item sets.
fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ProcessingJob> {
    Ok(ProcessingJob {
        id: parse_column(row, 0)?,
        job_type: parse_column(row, 1)?,
        scope: json_column(row, 2)?,
        profile: json_column(row, 3)?,
        skip_existing: row.get(4)?,
        status: parse_column(row, 5)?,
        progress: JobProgress {
            total: from_sql_u64(row.get(6)?),
            completed: from_sql_u64(row.get(7)?),
            failed: from_sql_u64(row.get(8)?),
            skipped: from_sql_u64(row.get(9)?),
            total_size_bytes: from_sql_u64(row.get(10)?),
        },
        processed_image_ids: BTreeSet::new(),
        failed_image_ids: BTreeSet::new(),
        item_errors: BTreeMap::new(),
        last_progress_at: row.get::<_, Option<i64>>(11)?.map(from_sql_time),
        can_resume: row.get(12)?,
        created_at: from_sql_time(row.get(13)?),
        started_at: row.get::<_, Option<i64>>(14)?.map(from_sql_time),
        completed_at: row.get::<_, Option<i64>>(15)?.map(from_sql_time),
        updated_at: from_sql_time(row.get(16)?),
        error_message: row.get(17)?,
    })
}

/// Loads a job with its per-item sets.
fn load_job(conn: &Connection, id: &JobId) -> StoreResult<Option<ProcessingJob>> {
    let job = conn
        .query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id.to_string()],
            job_from_row,
        )
        .optional()?;

    match job {
        Some(mut job) => {
            load_items(conn, &mut job)?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

fn load_items(conn: &Connection, job: &mut ProcessingJob) -> StoreResult<()> {
    let mut stmt =
        conn.prepare_cached("SELECT image_id, outcome, reason FROM job_items WHERE job_id = ?1")?;
    let rows = stmt.query_map(params![job.id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;

    for row in rows {
        let (image_id, outcome, reason) = row?;
        let image_id = ImageId::from(image_id);
        match outcome.as_str() {
            "failed" => {
                job.failed_image_ids.insert(image_id.clone());
                job.item_errors
                    .insert(image_id, reason.unwrap_or_default());
            }
            "processed" | "skipped" => {
                job.processed_image_ids.insert(image_id);
            }
            other => {
                return Err(StoreError::Corrupt(format!(
                    "unknown item outcome '{}' for job {}",
                    other, job.id
                )))
            }
        }
    }
    Ok(())
}

fn query_jobs(conn: &Connection, sql: &str, arg: Option<String>) -> StoreResult<Vec<ProcessingJob>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = match arg {
        Some(arg) => stmt.query_map(params![arg], job_from_row)?,
        None => stmt.query_map([], job_from_row)?,
    };
    let mut jobs = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    for job in &mut jobs {
        load_items(conn, job)?;
    }
    Ok(jobs)
}

impl JobStateStore for SqliteStore {
    fn insert_job(&self, job: &ProcessingJob) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                JOB_COLUMNS
            ),
            params![
                job.id.to_string(),
                job.job_type.as_str(),
                serde_json::to_string(&job.scope)?,
                serde_json::to_string(&job.profile)?,
                job.skip_existing,
                job.status.as_str(),
                to_sql_u64(job.progress.total)?,
                to_sql_u64(job.progress.completed)?,
                to_sql_u64(job.progress.failed)?,
                to_sql_u64(job.progress.skipped)?,
                to_sql_u64(job.progress.total_size_bytes)?,
                job.last_progress_at.map(to_sql_time),
                job.can_resume,
                to_sql_time(job.created_at),
                job.started_at.map(to_sql_time),
                job.completed_at.map(to_sql_time),
                to_sql_time(job.updated_at),
                job.error_message,
            ],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO job_scope (job_id, image_id) VALUES (?1, ?2)",
            )?;
            for image_id in job.scope.image_ids() {
                stmt.execute(params![job.id.to_string(), image_id.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_job(&self, id: &JobId) -> StoreResult<Option<ProcessingJob>> {
        let conn = self.conn.lock();
        load_job(&conn, id)
    }

    fn list_jobs(&self, status: Option<JobStatus>) -> StoreResult<Vec<ProcessingJob>> {
        let conn = self.conn.lock();
        match status {
            Some(status) => query_jobs(
                &conn,
                &format!(
                    "SELECT {} FROM jobs WHERE status = ?1 ORDER BY created_at DESC, id",
                    JOB_COLUMNS
                ),
                Some(status.as_str().to_string()),
            ),
            None => query_jobs(
                &conn,
                &format!("SELECT {} FROM jobs ORDER BY created_at DESC, id", JOB_COLUMNS),
                None,
            ),
        }
    }

    fn record_item(
        &self,
        id: &JobId,
        image_id: &ImageId,
        outcome: &ItemOutcome,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let status: JobStatus = status
            .ok_or_else(|| StoreError::not_found("job", id))?
            .parse()
            .map_err(StoreError::Corrupt)?;
        if status.is_terminal() {
            return Ok(false);
        }

        let in_scope: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM job_scope WHERE job_id = ?1 AND image_id = ?2)",
            params![id.to_string(), image_id.as_str()],
            |row| row.get(0),
        )?;
        if !in_scope {
            return Ok(false);
        }

        let (size_bytes, reason) = match outcome {
            ItemOutcome::Processed { size_bytes } => (*size_bytes, None),
            ItemOutcome::Failed { reason } => (0, Some(reason.as_str())),
            ItemOutcome::Skipped => (0, None),
        };

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO job_items (job_id, image_id, outcome, size_bytes, reason, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                image_id.as_str(),
                outcome.kind(),
                to_sql_u64(size_bytes)?,
                reason,
                to_sql_time(at),
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        let counter = match outcome {
            ItemOutcome::Processed { .. } => "completed_images",
            ItemOutcome::Failed { .. } => "failed_images",
            ItemOutcome::Skipped => "skipped_images",
        };
        tx.execute(
            &format!(
                "UPDATE jobs SET {c} = {c} + 1, total_size_bytes = total_size_bytes + ?1, \
                 last_progress_at = ?2, updated_at = ?2 WHERE id = ?3",
                c = counter
            ),
            params![to_sql_u64(size_bytes)?, to_sql_time(at), id.to_string()],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn is_item_handled(&self, id: &JobId, image_id: &ImageId) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM job_items WHERE job_id = ?1 AND image_id = ?2)",
            params![id.to_string(), image_id.as_str()],
            |row| row.get(0),
        )?;
        if !exists {
            let known: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
                params![id.to_string()],
                |row| row.get(0),
            )?;
            if !known {
                return Err(StoreError::not_found("job", id));
            }
        }
        Ok(exists)
    }

    fn transition_job(
        &self,
        id: &JobId,
        from: &[JobStatus],
        change: &StatusChange,
    ) -> StoreResult<TransitionOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut job = load_job(&tx, id)?.ok_or_else(|| StoreError::not_found("job", id))?;
        if !job.accepts_transition(from, change.to) {
            return Ok(TransitionOutcome::Rejected {
                current: job.status,
            });
        }
        let previous = job.status;
        job.apply_status(change);

        let updated = tx.execute(
            "UPDATE jobs SET status = ?1, can_resume = ?2, started_at = ?3, completed_at = ?4, \
             last_progress_at = ?5, updated_at = ?6, error_message = ?7 \
             WHERE id = ?8 AND status = ?9",
            params![
                job.status.as_str(),
                job.can_resume,
                job.started_at.map(to_sql_time),
                job.completed_at.map(to_sql_time),
                job.last_progress_at.map(to_sql_time),
                to_sql_time(job.updated_at),
                job.error_message,
                id.to_string(),
                previous.as_str(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::Conflict(format!(
                "job {} changed during transition",
                id
            )));
        }
        tx.commit()?;
        Ok(TransitionOutcome::Applied(job))
    }

    fn flip_stale_job(
        &self,
        id: &JobId,
        cutoff: DateTime<Utc>,
        change: &StatusChange,
    ) -> StoreResult<bool> {
        if !JobStatus::Running.can_transition_to(change.to) {
            return Ok(false);
        }
        let completed_at = matches!(change.to, JobStatus::Failed | JobStatus::Cancelled)
            .then(|| to_sql_time(change.at));

        let conn = self.conn.lock();
        let updated = conn.execute(
            &format!(
                "UPDATE jobs SET status = ?1, error_message = COALESCE(?2, error_message), \
                 completed_at = COALESCE(?3, completed_at), updated_at = ?4 \
                 WHERE id = ?5 AND status = 'running' AND {} < ?6",
                HEARTBEAT
            ),
            params![
                change.to.as_str(),
                change.error_message,
                completed_at,
                to_sql_time(change.at),
                id.to_string(),
                to_sql_time(cutoff),
            ],
        )?;
        Ok(updated > 0)
    }

    fn list_stale_jobs(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<ProcessingJob>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE status = 'running' AND {} < ?1 ORDER BY created_at",
            JOB_COLUMNS, HEARTBEAT
        ))?;
        let mut jobs = stmt
            .query_map(params![to_sql_time(cutoff)], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for job in &mut jobs {
            load_items(&conn, job)?;
        }
        Ok(jobs)
    }

    fn delete_terminal_jobs_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let filter = "status IN ('completed', 'failed', 'cancelled') AND updated_at < ?1";

        for table in ["job_items", "job_scope"] {
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE job_id IN (SELECT id FROM jobs WHERE {})",
                    table, filter
                ),
                params![to_sql_time(cutoff)],
            )?;
        }
        let deleted = tx.execute(
            &format!("DELETE FROM jobs WHERE {}", filter),
            params![to_sql_time(cutoff)],
        )?;
        tx.commit()?;
        Ok(deleted)
    }
}

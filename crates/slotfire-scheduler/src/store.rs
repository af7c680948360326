use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension, Row};
use slotfire_core::{Artifact, JobId, JobPayload, OwnerId, SlotfireError};
use tracing::{debug, info, instrument};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::types::{Job, JobStats, JobStatus};

/// Durable job records.
///
/// Every status change is a conditional write: callers state the status they
/// expect and the store only applies the change if the row still has it. This
/// is what keeps a job replayed after a crash from executing twice.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: &Job) -> Result<JobId>;

    fn get(&self, id: &JobId) -> Result<Option<Job>>;

    /// All `pending` jobs, earliest `fire_at` first.
    fn list_pending(&self) -> Result<Vec<Job>>;

    /// Jobs for `owner`, newest first, at most `limit` rows when given.
    fn list_by_owner(&self, owner: &OwnerId, limit: Option<usize>) -> Result<Vec<Job>>;

    /// Compare-and-swap `expected → new`. Returns `false` when the row was not
    /// in `expected`; errors when the edge is not part of the lifecycle.
    fn try_transition(&self, id: &JobId, expected: JobStatus, new: JobStatus) -> Result<bool>;

    /// Per-attempt progress while the job is `executing`.
    fn record_attempt(
        &self,
        id: &JobId,
        attempt_count: u32,
        message: &str,
        artifact: Option<&Artifact>,
    ) -> Result<()>;

    /// Write the final status. Applies only to an `executing` row, or to a
    /// `pending` row when `status` is `failed`. Returns whether a row changed.
    fn update_outcome(
        &self,
        id: &JobId,
        status: JobStatus,
        message: &str,
        attempt_count: u32,
    ) -> Result<bool>;

    /// `pending → cancelled` for a job owned by `owner`. The row is kept.
    fn cancel_if_pending(&self, id: &JobId, owner: &OwnerId) -> Result<bool>;

    /// Hard-delete a job owned by `owner` that has not fired yet.
    fn delete_if_pending(&self, id: &JobId, owner: &OwnerId) -> Result<bool>;

    fn stats(&self, owner: Option<&OwnerId>) -> Result<JobStats>;

    /// Delete `failed` and `cancelled` rows last touched before `older_than`.
    fn purge_terminal(&self, older_than: DateTime<Utc>) -> Result<usize>;

    /// [`purge_terminal`](Self::purge_terminal) with the cutoff set
    /// `older_than_days` before now.
    fn purge_older_than(&self, older_than_days: u32) -> Result<usize> {
        let cutoff = Duration::try_days(i64::from(older_than_days))
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| {
                SchedulerError::Validation(format!(
                    "purge window of {older_than_days} days is outside the calendar"
                ))
            })?;
        self.purge_terminal(cutoff)
    }
}

/// [`JobStore`] over a single SQLite connection guarded by a `Mutex`.
pub struct SqliteJobStore {
    db: Mutex<Connection>,
}

const JOB_COLUMNS: &str = "id, owner, resource_key, payload, fire_at, timezone, status,
     attempt_count, max_attempts, last_message, artifact, created_at, updated_at";

impl SqliteJobStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) a database file in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobStore for SqliteJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, owner = %job.owner))]
    fn insert(&self, job: &Job) -> Result<JobId> {
        let payload = job.payload.to_json()?;
        let artifact = artifact_json(job.artifact.as_ref())?;
        self.conn().execute(
            "INSERT INTO jobs
             (id, owner, resource_key, payload, fire_at, timezone, status,
              attempt_count, max_attempts, last_message, artifact, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            rusqlite::params![
                job.id.0,
                job.owner.0,
                job.resource_key.0,
                payload,
                ts(&job.fire_at),
                job.timezone,
                job.status.as_str(),
                job.attempt_count,
                job.max_attempts,
                job.last_message,
                artifact,
                ts(&job.created_at),
                ts(&job.updated_at),
            ],
        )?;
        debug!("job inserted");
        Ok(job.id.clone())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    fn get(&self, id: &JobId) -> Result<Option<Job>> {
        let db = self.conn();
        let job = db
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [&id.0],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    #[instrument(skip(self))]
    fn list_pending(&self) -> Result<Vec<Job>> {
        let db = self.conn();
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' ORDER BY fire_at"
        ))?;
        let jobs = stmt
            .query_map([], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    #[instrument(skip(self), fields(owner = %owner))]
    fn list_by_owner(&self, owner: &OwnerId, limit: Option<usize>) -> Result<Vec<Job>> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let db = self.conn();
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE owner = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let jobs = stmt
            .query_map(rusqlite::params![owner.0, limit], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    #[instrument(skip(self), fields(job_id = %id, %expected, %new))]
    fn try_transition(&self, id: &JobId, expected: JobStatus, new: JobStatus) -> Result<bool> {
        if !expected.can_transition_to(new) {
            return Err(SchedulerError::InvalidTransition {
                from: expected,
                to: new,
            });
        }
        let n = self.conn().execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            rusqlite::params![new.as_str(), ts(&Utc::now()), id.0, expected.as_str()],
        )?;
        Ok(n == 1)
    }

    #[instrument(skip(self, message, artifact), fields(job_id = %id, attempt_count))]
    fn record_attempt(
        &self,
        id: &JobId,
        attempt_count: u32,
        message: &str,
        artifact: Option<&Artifact>,
    ) -> Result<()> {
        let artifact = artifact_json(artifact)?;
        // Keep the previous artifact when this attempt produced none.
        self.conn().execute(
            "UPDATE jobs
             SET attempt_count = ?1,
                 last_message  = ?2,
                 artifact      = COALESCE(?3, artifact),
                 updated_at    = ?4
             WHERE id = ?5 AND status = 'executing'",
            rusqlite::params![attempt_count, message, artifact, ts(&Utc::now()), id.0],
        )?;
        Ok(())
    }

    #[instrument(skip(self, message), fields(job_id = %id, %status, attempt_count))]
    fn update_outcome(
        &self,
        id: &JobId,
        status: JobStatus,
        message: &str,
        attempt_count: u32,
    ) -> Result<bool> {
        if !matches!(status, JobStatus::Success | JobStatus::Failed) {
            return Err(SchedulerError::InvalidTransition {
                from: JobStatus::Executing,
                to: status,
            });
        }
        let n = self.conn().execute(
            "UPDATE jobs
             SET status = ?1, last_message = ?2, attempt_count = ?3, updated_at = ?4
             WHERE id = ?5
               AND (status = 'executing' OR (status = 'pending' AND ?1 = 'failed'))",
            rusqlite::params![status.as_str(), message, attempt_count, ts(&Utc::now()), id.0],
        )?;
        Ok(n == 1)
    }

    #[instrument(skip(self), fields(job_id = %id, owner = %owner))]
    fn cancel_if_pending(&self, id: &JobId, owner: &OwnerId) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE jobs SET status = 'cancelled', last_message = 'cancelled by owner',
                             updated_at = ?1
             WHERE id = ?2 AND owner = ?3 AND status = 'pending'",
            rusqlite::params![ts(&Utc::now()), id.0, owner.0],
        )?;
        if n == 1 {
            info!("job cancelled");
        }
        Ok(n == 1)
    }

    #[instrument(skip(self), fields(job_id = %id, owner = %owner))]
    fn delete_if_pending(&self, id: &JobId, owner: &OwnerId) -> Result<bool> {
        let n = self.conn().execute(
            "DELETE FROM jobs WHERE id = ?1 AND owner = ?2 AND status = 'pending'",
            rusqlite::params![id.0, owner.0],
        )?;
        Ok(n == 1)
    }

    #[instrument(skip(self))]
    fn stats(&self, owner: Option<&OwnerId>) -> Result<JobStats> {
        let db = self.conn();
        let stats = db.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'pending'), 0),
                    COALESCE(SUM(status = 'executing'), 0),
                    COALESCE(SUM(status = 'success'), 0),
                    COALESCE(SUM(status = 'failed'), 0),
                    COALESCE(SUM(status = 'cancelled'), 0)
             FROM jobs WHERE ?1 IS NULL OR owner = ?1",
            [owner.map(|o| o.0.as_str())],
            |row| {
                Ok(JobStats {
                    total: row.get::<_, i64>(0)? as u64,
                    pending: row.get::<_, i64>(1)? as u64,
                    executing: row.get::<_, i64>(2)? as u64,
                    success: row.get::<_, i64>(3)? as u64,
                    failed: row.get::<_, i64>(4)? as u64,
                    cancelled: row.get::<_, i64>(5)? as u64,
                })
            },
        )?;
        Ok(stats)
    }

    #[instrument(skip(self), fields(%older_than))]
    fn purge_terminal(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let n = self.conn().execute(
            "DELETE FROM jobs
             WHERE status IN ('failed', 'cancelled') AND updated_at < ?1",
            [ts(&older_than)],
        )?;
        if n > 0 {
            info!(count = n, "purged old terminal jobs");
        }
        Ok(n)
    }
}

/// Fixed-width UTC timestamps so string comparison in SQL orders correctly.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn artifact_json(artifact: Option<&Artifact>) -> Result<Option<String>> {
    let json = artifact
        .map(serde_json::to_string)
        .transpose()
        .map_err(SlotfireError::from)?;
    Ok(json)
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let payload: String = row.get(3)?;
    let payload: JobPayload = serde_json::from_str(&payload).map_err(|e| conversion_err(3, e))?;
    let status: String = row.get(6)?;
    let status: JobStatus = status.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into())
    })?;
    let artifact = row
        .get::<_, Option<String>>(10)?
        .map(|s| serde_json::from_str::<Artifact>(&s))
        .transpose()
        .map_err(|e| conversion_err(10, e))?;

    Ok(Job {
        id: JobId(row.get(0)?),
        owner: OwnerId(row.get(1)?),
        resource_key: row.get::<_, String>(2)?.into(),
        payload,
        fire_at: parse_ts(row, 4)?,
        timezone: row.get(5)?,
        status,
        attempt_count: row.get(7)?,
        max_attempts: row.get(8)?,
        last_message: row.get(9)?,
        artifact,
        created_at: parse_ts(row, 11)?,
        updated_at: parse_ts(row, 12)?,
    })
}

use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` table (idempotent) with an index on `(status, fire_at)`
/// for loading pending work at startup and one on `(owner, created_at)` for
/// per-owner history.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id             TEXT    NOT NULL PRIMARY KEY,
            owner          TEXT    NOT NULL,
            resource_key   TEXT    NOT NULL,
            payload        TEXT    NOT NULL,   -- JSON-encoded JobPayload
            fire_at        TEXT    NOT NULL,   -- RFC 3339 UTC, set once
            timezone       TEXT    NOT NULL,
            status         TEXT    NOT NULL DEFAULT 'pending',
            attempt_count  INTEGER NOT NULL DEFAULT 0,
            max_attempts   INTEGER NOT NULL,
            last_message   TEXT,
            artifact       TEXT,               -- JSON-encoded Artifact or NULL
            created_at     TEXT    NOT NULL,
            updated_at     TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_jobs_status_fire_at ON jobs (status, fire_at);
        CREATE INDEX IF NOT EXISTS idx_jobs_owner_created ON jobs (owner, created_at);
        ",
    )?;
    Ok(())
}

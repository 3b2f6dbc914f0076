//! SQLite storage layer.
//!
//! Single source of truth for job state. Every mutation is a guarded
//! conditional update, so the state machine holds no matter how many
//! processes share the database file. WAL mode lets readers run alongside
//! the writer; `claim_next` takes the write lock up front (`BEGIN IMMEDIATE`)
//! and waits at most `busy_timeout` for it.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::*;
use crate::telemetry::metrics;

const JOB_COLUMNS: &str =
    "id, command, state, attempts, max_retries, created_at, updated_at, run_at";

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long to wait for another connection's write lock before giving
    /// up with [`Error::Transient`].
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(500),
        }
    }
}

/// Job store. Owns one SQLite connection.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(options.busy_timeout)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for concurrent readers
        self.conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                id          TEXT PRIMARY KEY,
                command     TEXT NOT NULL,
                state       TEXT NOT NULL DEFAULT 'pending',
                attempts    INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                run_at      TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(state, created_at)
                WHERE state = 'pending';
            CREATE INDEX IF NOT EXISTS idx_jobs_state_updated ON jobs(state, updated_at);
            ",
        )?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Insert
    // -----------------------------------------------------------------------

    /// Validate an enqueue request and insert it as a fresh pending job.
    ///
    /// `default_max_retries` applies when the request does not set its own,
    /// and is validated the same way as an explicit value.
    pub fn enqueue(&mut self, new: NewJob, default_max_retries: u32) -> Result<Job> {
        let new = match new.max_retries {
            Some(_) => new,
            None => new.max_retries(default_max_retries),
        };
        new.validate()?;
        let now = timestamp_now();
        let job = Job {
            id: new.id.unwrap_or_else(JobId::generate),
            command: new.command,
            state: State::Pending,
            attempts: 0,
            max_retries: new.max_retries.unwrap_or(default_max_retries),
            created_at: now,
            updated_at: now,
            run_at: now,
        };

        let result = self.insert(&job);
        let label = match &result {
            Ok(()) => "ok",
            Err(Error::DuplicateJob(_)) => "duplicate",
            Err(_) => "error",
        };
        metrics::jobs_enqueued().add(1, &[KeyValue::new("result", label)]);

        result.map(|()| job)
    }

    /// Insert a new job. Fails with [`Error::DuplicateJob`] if the id exists.
    pub fn insert(&mut self, job: &Job) -> Result<()> {
        let result = self.conn.execute(
            &format!("INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
            params![
                job.id.as_str(),
                job.command,
                State::Pending.as_str(),
                job.attempts,
                job.max_retries,
                format_timestamp(job.created_at),
                format_timestamp(job.updated_at),
                format_timestamp(job.run_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::DuplicateJob(job.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // Claim
    // -----------------------------------------------------------------------

    /// Claim the oldest eligible pending job, moving it to `processing`.
    ///
    /// Returns `None` when nothing is eligible, and also when another caller
    /// won the race for the candidate; the caller simply polls again.
    pub fn claim_next(&mut self) -> Result<Option<Job>> {
        let now = format_timestamp(timestamp_now());
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<String> = tx
            .query_row(
                "SELECT id FROM jobs
                 WHERE state = 'pending' AND run_at <= ?1
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT 1",
                params![now],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = candidate else {
            tx.commit()?;
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE jobs SET state = 'processing', updated_at = MAX(updated_at, ?1)
             WHERE id = ?2 AND state = 'pending'",
            params![now, id],
        )?;

        if changed != 1 {
            tx.rollback()?;
            debug!(job_id = %id, "claim lost to a concurrent worker");
            metrics::claim_conflicts().add(1, &[]);
            return Ok(None);
        }

        let job = get_job_on(&tx, &JobId(id))?;
        tx.commit()?;

        record_transition(State::Pending, State::Processing);
        Ok(Some(job))
    }

    // -----------------------------------------------------------------------
    // Outcomes
    // -----------------------------------------------------------------------

    /// `processing -> completed`, recording the final attempt count.
    pub fn complete(&mut self, id: &JobId, attempts: u32) -> Result<Job> {
        self.finish(id, State::Completed, attempts, None)
    }

    /// `processing -> pending`, scheduling the next attempt at `run_at`.
    pub fn fail_for_retry(
        &mut self,
        id: &JobId,
        attempts: u32,
        run_at: DateTime<Utc>,
    ) -> Result<Job> {
        self.finish(id, State::Pending, attempts, Some(run_at))
    }

    /// `processing -> dead`, recording the final attempt count.
    pub fn fail_terminal(&mut self, id: &JobId, attempts: u32) -> Result<Job> {
        self.finish(id, State::Dead, attempts, None)
    }

    /// Move a processing job to `to`. The update only applies while the job
    /// is still `processing` and `attempts` is exactly one past the stored
    /// count, so a stale or duplicated report cannot rewrite history.
    fn finish(
        &mut self,
        id: &JobId,
        to: State,
        attempts: u32,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<Job> {
        validate_transition(id, State::Processing, to)?;

        let now = format_timestamp(timestamp_now());
        let changed = self.conn.execute(
            "UPDATE jobs SET
                state = ?1,
                attempts = ?2,
                updated_at = MAX(updated_at, ?3),
                run_at = COALESCE(MAX(created_at, ?4), run_at)
             WHERE id = ?5 AND state = 'processing' AND attempts + 1 = ?2",
            params![
                to.as_str(),
                attempts,
                now,
                run_at.map(format_timestamp),
                id.as_str(),
            ],
        )?;

        if changed == 0 {
            return Err(diagnose_rejected(&self.conn, id, to, attempts));
        }

        record_transition(State::Processing, to);
        get_job_on(&self.conn, id)
    }

    // -----------------------------------------------------------------------
    // Dead letters
    // -----------------------------------------------------------------------

    /// `dead -> pending` with attempts reset. Returns rows affected; zero
    /// means the job does not exist or is not dead, and nothing changed.
    pub fn requeue_dead(&mut self, id: &JobId) -> Result<usize> {
        let now = format_timestamp(timestamp_now());
        let changed = self.conn.execute(
            "UPDATE jobs SET
                state = 'pending',
                attempts = 0,
                updated_at = MAX(updated_at, ?1),
                run_at = MAX(created_at, ?1)
             WHERE id = ?2 AND state = 'dead'",
            params![now, id.as_str()],
        )?;

        if changed > 0 {
            record_transition(State::Dead, State::Pending);
            metrics::jobs_requeued().add(changed as u64, &[]);
        }
        Ok(changed)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Get a job by ID.
    pub fn get(&self, id: &JobId) -> Result<Job> {
        get_job_on(&self.conn, id)
    }

    /// List jobs in `state`, most recently updated first.
    pub fn list_by_state(&self, state: State) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1
             ORDER BY updated_at DESC, rowid DESC"
        ))?;

        let jobs = stmt
            .query_map(params![state.as_str()], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    /// Count jobs per state.
    pub fn status(&self) -> Result<StatusSummary> {
        let mut stmt = self
            .conn
            .prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut summary = StatusSummary::default();
        for (state, count) in rows {
            summary.set(state.parse()?, count as u64);
        }
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Inner functions: accept &Connection so they work with both
// Connection (auto-commit) and Transaction (deref to Connection).
// ---------------------------------------------------------------------------

fn validate_transition(id: &JobId, from: State, to: State) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            id: id.clone(),
            from,
            to,
        })
    }
}

fn get_job_on(conn: &Connection, id: &JobId) -> Result<Job> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        params![id.as_str()],
        row_to_job,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(id.clone()))
}

/// Explain why a guarded outcome update matched no row.
fn diagnose_rejected(conn: &Connection, id: &JobId, to: State, attempts: u32) -> Error {
    match get_job_on(conn, id) {
        Ok(job) if job.state != State::Processing => Error::InvalidTransition {
            id: id.clone(),
            from: job.state,
            to,
        },
        Ok(job) => Error::AttemptMismatch {
            id: id.clone(),
            expected: job.attempts + 1,
            actual: attempts,
        },
        Err(e) => e,
    }
}

fn record_transition(from: State, to: State) {
    metrics::job_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}

// ---------------------------------------------------------------------------
// Row parsing helpers
// ---------------------------------------------------------------------------

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let state: String = row.get("state")?;

    Ok(Job {
        id: JobId(row.get("id")?),
        command: row.get("command")?,
        state: state
            .parse()
            .map_err(|e: Error| conversion_error(2, e))?,
        attempts: row.get("attempts")?,
        max_retries: row.get("max_retries")?,
        created_at: timestamp_column(row, 5, "created_at")?,
        updated_at: timestamp_column(row, 6, "updated_at")?,
        run_at: timestamp_column(row, 7, "run_at")?,
    })
}

fn timestamp_column(row: &rusqlite::Row, idx: usize, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(name)?;
    parse_timestamp(&raw).map_err(|e| conversion_error(idx, e))
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

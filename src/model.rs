//! Core data model.
//!
//! A job is a shell command waiting to be run. It has identity, a retry
//! budget, lifecycle state, and the timestamps that drive scheduling.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A unit of work tracked by the job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, immutable.
    pub id: JobId,

    /// Shell command to execute, immutable.
    pub command: String,

    /// Current lifecycle state.
    pub state: State,

    /// Number of execution attempts made so far.
    pub attempts: u32,

    /// Attempts allowed before the job goes dead. Fixed at enqueue time.
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
}

impl Job {
    /// Pending with `run_at` already passed.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == State::Pending && self.run_at <= now
    }
}

/// Newtype for job IDs. Any non-empty string; generated IDs are UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Waiting for `run_at` and a free worker.
    Pending,
    /// Claimed by exactly one worker, command running.
    Processing,
    /// Command exited successfully. Terminal.
    Completed,
    /// Retries exhausted. Terminal until manually requeued.
    Dead,
}

impl State {
    pub const ALL: [State; 4] = [
        State::Pending,
        State::Processing,
        State::Completed,
        State::Dead,
    ];

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Pending) // retry with backoff
                | (Processing, Dead)
                | (Dead, Pending) // manual requeue only
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Completed | State::Dead)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Processing => "processing",
            State::Completed => "completed",
            State::Dead => "dead",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(State::Pending),
            "processing" => Ok(State::Processing),
            "completed" => Ok(State::Completed),
            "dead" => Ok(State::Dead),
            _ => Err(Error::InvalidInput(format!("unknown state: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Status summary
// ---------------------------------------------------------------------------

/// Job counts grouped by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub dead: u64,
}

impl StatusSummary {
    pub fn count(&self, state: State) -> u64 {
        match state {
            State::Pending => self.pending,
            State::Processing => self.processing,
            State::Completed => self.completed,
            State::Dead => self.dead,
        }
    }

    pub(crate) fn set(&mut self, state: State, n: u64) {
        match state {
            State::Pending => self.pending = n,
            State::Processing => self.processing = n,
            State::Completed => self.completed = n,
            State::Dead => self.dead = n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.dead
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for enqueue requests.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub(crate) id: Option<JobId>,
    pub(crate) command: String,
    pub(crate) max_retries: Option<u32>,
}

impl NewJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: None,
            command: command.into(),
            max_retries: None,
        }
    }

    pub fn id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Overrides the configured default retry budget.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Reject requests the store would otherwise persist as unrunnable jobs.
    ///
    /// `max_retries` counts total attempts, so 0 is refused: a job with no
    /// attempts could only reach `dead` with `attempts > max_retries`.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(Error::InvalidInput("command must not be empty".to_string()));
        }
        if self
            .id
            .as_ref()
            .is_some_and(|id| id.as_str().trim().is_empty())
        {
            return Err(Error::InvalidInput("job id must not be empty".to_string()));
        }
        if self.max_retries == Some(0) {
            return Err(Error::InvalidInput(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Current time at the precision timestamps are stored with.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Fixed-width RFC 3339 (millisecond precision, `Z` suffix), so stored
/// timestamps compare correctly as strings.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

//! Integration tests for the job store.

use std::path::PathBuf;
use std::sync::Barrier;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use queuectl::error::Error;
use queuectl::model::*;
use queuectl::storage::{JobStore, StoreOptions};

fn test_store() -> JobStore {
    JobStore::in_memory().expect("failed to create in-memory store")
}

/// Per-test directory for file-backed stores (several connections, one file).
fn test_dir() -> PathBuf {
    let dir = std::env::temp_dir()
        .join("queuectl-test")
        .join(uuid::Uuid::new_v4().to_string());
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn patient() -> StoreOptions {
    StoreOptions {
        busy_timeout: Duration::from_secs(5),
    }
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

#[test]
fn enqueue_creates_pending_job() {
    let mut store = test_store();

    let job = store.enqueue(NewJob::new("echo hi").id("a"), 3).unwrap();

    assert_eq!(job.id, JobId::from("a"));
    assert_eq!(job.state, State::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_retries, 3);
    assert_eq!(job.run_at, job.created_at);
    assert_eq!(job.updated_at, job.created_at);
    assert_eq!(store.get(&job.id).unwrap(), job);
}

#[test]
fn enqueue_generates_id_and_honours_max_retries_override() {
    let mut store = test_store();

    let job = store.enqueue(NewJob::new("true").max_retries(7), 3).unwrap();

    assert!(!job.id.as_str().is_empty());
    assert_eq!(job.max_retries, 7);
}

#[test]
fn duplicate_id_is_rejected() {
    let mut store = test_store();
    store.enqueue(NewJob::new("echo first").id("dup"), 3).unwrap();

    let err = store
        .enqueue(NewJob::new("echo second").id("dup"), 3)
        .unwrap_err();

    assert!(matches!(err, Error::DuplicateJob(ref id) if id.as_str() == "dup"));
    assert_eq!(store.get(&JobId::from("dup")).unwrap().command, "echo first");
}

#[test]
fn invalid_request_is_rejected_before_insert() {
    let mut store = test_store();

    let err = store.enqueue(NewJob::new(""), 3).unwrap_err();

    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(store.status().unwrap().total(), 0);
}

#[test]
fn zero_default_retry_budget_is_rejected() {
    let mut store = test_store();

    let err = store.enqueue(NewJob::new("false"), 0).unwrap_err();

    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(store.status().unwrap().total(), 0);

    // An explicit budget still wins over the default.
    let job = store.enqueue(NewJob::new("false").max_retries(2), 0).unwrap();
    assert_eq!(job.max_retries, 2);
}

// ---------------------------------------------------------------------------
// Claim
// ---------------------------------------------------------------------------

#[test]
fn claim_returns_none_when_queue_empty() {
    let mut store = test_store();
    assert!(store.claim_next().unwrap().is_none());
}

#[test]
fn claim_moves_job_to_processing() {
    let mut store = test_store();
    let job = store.enqueue(NewJob::new("true").id("a"), 3).unwrap();

    let claimed = store.claim_next().unwrap().expect("should claim");

    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.state, State::Processing);
    assert_eq!(claimed.attempts, 0);
    assert!(claimed.updated_at >= job.updated_at);
    assert!(store.claim_next().unwrap().is_none());
}

#[test]
fn claim_is_fifo_by_creation() {
    let mut store = test_store();
    for id in ["first", "second", "third"] {
        store.enqueue(NewJob::new("true").id(id), 3).unwrap();
    }

    let order: Vec<String> = std::iter::from_fn(|| store.claim_next().unwrap())
        .map(|job| job.id.0)
        .collect();

    assert_eq!(order, ["first", "second", "third"]);
}

#[test]
fn retried_job_is_not_claimable_before_run_at() {
    let mut store = test_store();
    let job = store.enqueue(NewJob::new("false").id("b"), 2).unwrap();
    store.claim_next().unwrap().unwrap();

    let run_at = Utc::now() + TimeDelta::seconds(2);
    let retried = store.fail_for_retry(&job.id, 1, run_at).unwrap();

    assert_eq!(retried.state, State::Pending);
    assert_eq!(retried.attempts, 1);
    assert!(retried.run_at > Utc::now());
    assert!(store.claim_next().unwrap().is_none());
}

#[test]
fn concurrent_claims_never_share_a_job() {
    let dir = test_dir();
    let path = dir.join("queue.db");
    let mut setup = JobStore::open(&path, &patient()).unwrap();
    for i in 0..40 {
        setup
            .enqueue(NewJob::new("true").id(format!("job-{i:02}")), 3)
            .unwrap();
    }

    let workers = 4;
    let barrier = Barrier::new(workers);
    let mut claimed: Vec<JobId> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let path = &path;
                let barrier = &barrier;
                s.spawn(move || {
                    let mut store = JobStore::open(path, &patient()).unwrap();
                    barrier.wait();
                    let mut mine = Vec::new();
                    while let Some(job) = store.claim_next().unwrap() {
                        mine.push(job.id);
                    }
                    mine
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    claimed.sort();
    let before = claimed.len();
    claimed.dedup();
    assert_eq!(before, 40, "every job claimed");
    assert_eq!(claimed.len(), 40, "no job claimed twice");
    assert_eq!(setup.status().unwrap().processing, 40);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn racing_claims_on_single_job_yield_exactly_one_winner() {
    let dir = test_dir();
    let path = dir.join("queue.db");
    let mut setup = JobStore::open(&path, &patient()).unwrap();
    setup.enqueue(NewJob::new("true").id("only"), 3).unwrap();

    let barrier = Barrier::new(2);
    let results: Vec<Option<Job>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let path = &path;
                let barrier = &barrier;
                s.spawn(move || {
                    let mut store = JobStore::open(path, &patient()).unwrap();
                    barrier.wait();
                    store.claim_next().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().flatten().collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id.as_str(), "only");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn lock_timeout_is_transient() {
    let dir = test_dir();
    let path = dir.join("queue.db");
    let mut store = JobStore::open(
        &path,
        &StoreOptions {
            busy_timeout: Duration::from_millis(50),
        },
    )
    .unwrap();
    store.enqueue(NewJob::new("true"), 3).unwrap();

    let holder = rusqlite::Connection::open(&path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = store.claim_next().unwrap_err();
    assert!(err.is_transient(), "expected transient error, got {err:?}");

    holder.execute_batch("ROLLBACK;").unwrap();
    assert!(store.claim_next().unwrap().is_some());

    let _ = std::fs::remove_dir_all(&dir);
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[test]
fn success_path() {
    let mut store = test_store();
    let job = store.enqueue(NewJob::new("true").id("a"), 3).unwrap();
    store.claim_next().unwrap().unwrap();

    let done = store.complete(&job.id, 1).unwrap();

    assert_eq!(done.state, State::Completed);
    assert_eq!(done.attempts, 1);
    assert!(done.state.is_terminal());
}

#[test]
fn exhausted_job_goes_dead() {
    let mut store = test_store();
    let job = store.enqueue(NewJob::new("false").id("b"), 2).unwrap();

    store.claim_next().unwrap().unwrap();
    store.fail_for_retry(&job.id, 1, Utc::now()).unwrap();

    let reclaimed = store.claim_next().unwrap().expect("eligible again");
    assert_eq!(reclaimed.attempts, 1);

    let dead = store.fail_terminal(&job.id, 2).unwrap();
    assert_eq!(dead.state, State::Dead);
    assert_eq!(dead.attempts, dead.max_retries);
}

#[test]
fn outcome_requires_processing_state() {
    let mut store = test_store();
    let job = store.enqueue(NewJob::new("true").id("a"), 3).unwrap();

    let err = store.complete(&job.id, 1).unwrap_err();

    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: State::Pending,
            to: State::Completed,
            ..
        }
    ));
    assert_eq!(store.get(&job.id).unwrap().state, State::Pending);
}

#[test]
fn outcome_requires_next_attempt_number() {
    let mut store = test_store();
    let job = store.enqueue(NewJob::new("true").id("a"), 3).unwrap();
    store.claim_next().unwrap().unwrap();

    let err = store.fail_terminal(&job.id, 5).unwrap_err();

    assert!(matches!(
        err,
        Error::AttemptMismatch {
            expected: 1,
            actual: 5,
            ..
        }
    ));
    assert_eq!(store.get(&job.id).unwrap().state, State::Processing);
}

#[test]
fn outcome_for_unknown_job_is_not_found() {
    let mut store = test_store();
    let err = store.complete(&JobId::from("ghost"), 1).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn completed_job_cannot_be_reported_twice() {
    let mut store = test_store();
    let job = store.enqueue(NewJob::new("true").id("a"), 3).unwrap();
    store.claim_next().unwrap().unwrap();
    store.complete(&job.id, 1).unwrap();

    let err = store.fail_for_retry(&job.id, 2, Utc::now()).unwrap_err();

    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: State::Completed,
            ..
        }
    ));
}

// ---------------------------------------------------------------------------
// Reads and requeue
// ---------------------------------------------------------------------------

#[test]
fn list_by_state_is_most_recently_updated_first() {
    let mut store = test_store();
    store.enqueue(NewJob::new("true").id("old"), 3).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    store.enqueue(NewJob::new("true").id("new"), 3).unwrap();

    let ids: Vec<String> = store
        .list_by_state(State::Pending)
        .unwrap()
        .into_iter()
        .map(|job| job.id.0)
        .collect();

    assert_eq!(ids, ["new", "old"]);
    assert!(store.list_by_state(State::Dead).unwrap().is_empty());
}

#[test]
fn status_counts_jobs_per_state() {
    let mut store = test_store();
    for id in ["a", "b", "c"] {
        store.enqueue(NewJob::new("true").id(id), 1).unwrap();
    }
    let a = store.claim_next().unwrap().unwrap();
    store.complete(&a.id, 1).unwrap();
    let b = store.claim_next().unwrap().unwrap();
    store.fail_terminal(&b.id, 1).unwrap();

    let summary = store.status().unwrap();

    assert_eq!(
        summary,
        StatusSummary {
            pending: 1,
            processing: 0,
            completed: 1,
            dead: 1,
        }
    );
    assert_eq!(summary.total(), 3);
}

#[test]
fn requeue_dead_resets_attempts_and_schedule() {
    let mut store = test_store();
    let job = store.enqueue(NewJob::new("false").id("b"), 1).unwrap();
    store.claim_next().unwrap().unwrap();
    let dead = store.fail_terminal(&job.id, 1).unwrap();

    let before = timestamp_now();
    assert_eq!(store.requeue_dead(&job.id).unwrap(), 1);

    let requeued = store.get(&job.id).unwrap();
    assert_eq!(requeued.state, State::Pending);
    assert_eq!(requeued.attempts, 0);
    assert!(requeued.run_at >= before);
    assert!(requeued.updated_at >= dead.updated_at);
    assert!(requeued.is_eligible(Utc::now()));
}

#[test]
fn requeue_of_non_dead_job_is_a_no_op() {
    let mut store = test_store();
    let job = store.enqueue(NewJob::new("true").id("a"), 3).unwrap();

    assert_eq!(store.requeue_dead(&job.id).unwrap(), 0);
    assert_eq!(store.requeue_dead(&JobId::from("ghost")).unwrap(), 0);
    assert_eq!(store.get(&job.id).unwrap(), job);
}

#[test]
fn jobs_survive_reopen() {
    let dir = test_dir();
    let path = dir.join("queue.db");
    {
        let mut store = JobStore::open(&path, &StoreOptions::default()).unwrap();
        store.enqueue(NewJob::new("echo durable").id("d"), 3).unwrap();
    }

    let store = JobStore::open(&path, &StoreOptions::default()).unwrap();
    assert_eq!(store.get(&JobId::from("d")).unwrap().command, "echo durable");

    let _ = std::fs::remove_dir_all(&dir);
}

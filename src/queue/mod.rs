//! Durable at-least-once task queue on Postgres.
//!
//! Tasks are rows; workers claim due rows with `FOR UPDATE SKIP LOCKED`,
//! retry failures with exponential backoff, and dead-letter after
//! `max_attempts`. Handlers must be idempotent on their payload.

pub mod scheduler;
pub mod worker;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use sqlx::postgres::PgExecutor;
use sqlx::prelude::FromRow;
use uuid::Uuid;

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_DEAD: &str = "dead";

/// Retry backoff: 2s, 4s, 8s, ... capped at 30 minutes.
const BACKOFF_BASE_SECS: u64 = 2;
const BACKOFF_CAP_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Job {
    pub id: Uuid,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub queue: String,
    pub status: String,
    pub run_at: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EnqueueOpts {
    pub delay: Option<Duration>,
    pub max_retries: i32,
    pub queue: &'static str,
}

impl Default for EnqueueOpts {
    fn default() -> Self {
        Self {
            delay: None,
            max_retries: 5,
            queue: "default",
        }
    }
}

/// Enqueue a task. Accepts a transaction handle so callers can make the
/// enqueue atomic with the mutation that warrants it.
pub async fn enqueue<'e, E: PgExecutor<'e>>(
    exec: E,
    task_type: &str,
    payload: serde_json::Value,
    opts: EnqueueOpts,
) -> sqlx::Result<Uuid> {
    let delay_secs = opts.delay.map_or(0.0, |d| d.as_secs_f64());
    let (id,): (Uuid,) = sqlx::query_as(
        r"
        INSERT INTO jobs (task_type, payload, queue, status, run_at, max_attempts)
        VALUES ($1, $2, $3, 'pending', now() + ($4 * interval '1 second'), $5)
        RETURNING id
        ",
    )
    .bind(task_type)
    .bind(&payload)
    .bind(opts.queue)
    .bind(delay_secs)
    .bind(opts.max_retries)
    .fetch_one(exec)
    .await?;
    Ok(id)
}

/// Claim a batch of due tasks for execution. `SKIP LOCKED` keeps concurrent
/// workers from double-claiming; delivery is still at-least-once overall.
pub async fn claim_batch(pool: &PgPool, limit: i64) -> sqlx::Result<Vec<Job>> {
    sqlx::query_as(
        r"
        UPDATE jobs SET status = 'running', attempts = attempts + 1, updated_at = now()
        WHERE id IN (
            SELECT id FROM jobs
            WHERE status = 'pending' AND run_at <= now()
            ORDER BY run_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING *
        ",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn mark_succeeded(pool: &PgPool, id: Uuid) -> sqlx::Result<()> {
    sqlx::query("UPDATE jobs SET status = 'succeeded', last_error = NULL, updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a failed attempt: back off and retry, or dead-letter once the
/// budget is spent.
pub async fn mark_failed(pool: &PgPool, job: &Job, error: &str) -> sqlx::Result<()> {
    if job.attempts >= job.max_attempts {
        sqlx::query(
            "UPDATE jobs SET status = 'dead', last_error = $2, updated_at = now() WHERE id = $1",
        )
        .bind(job.id)
        .bind(error)
        .execute(pool)
        .await?;
        tracing::error!(job_id = %job.id, task_type = %job.task_type, error, "task dead-lettered");
    } else {
        let delay = backoff(job.attempts);
        sqlx::query(
            r"
            UPDATE jobs SET status = 'pending', last_error = $2,
                run_at = now() + ($3 * interval '1 second'), updated_at = now()
            WHERE id = $1
            ",
        )
        .bind(job.id)
        .bind(error)
        .bind(delay.as_secs_f64())
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn list_by_status(
    pool: &PgPool,
    status: &str,
    limit: i64,
    offset: i64,
) -> sqlx::Result<(Vec<Job>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = $1")
        .bind(status)
        .fetch_one(pool)
        .await?;
    let items = sqlx::query_as(
        r"
        SELECT * FROM jobs WHERE status = $1
        ORDER BY created_at DESC, id ASC
        LIMIT $2 OFFSET $3
        ",
    )
    .bind(status)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok((items, total))
}

/// Exponential backoff for the n-th failed attempt (1-based).
pub fn backoff(attempt: i32) -> Duration {
    let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(0).min(30);
    let secs = BACKOFF_BASE_SECS
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(BACKOFF_CAP_SECS);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(2), Duration::from_secs(4));
        assert_eq!(backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_caps_at_thirty_minutes() {
        assert_eq!(backoff(11), Duration::from_secs(30 * 60));
        assert_eq!(backoff(1000), Duration::from_secs(30 * 60));
    }

    #[test]
    fn backoff_tolerates_degenerate_attempts() {
        assert_eq!(backoff(0), Duration::from_secs(2));
        assert_eq!(backoff(-1), Duration::from_secs(2));
    }
}

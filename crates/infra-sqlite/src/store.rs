// SQLite Job Store - every statement the broker runs against `jobs` and `events`

use crate::error::map_sqlx_error;
use conveyor_core::domain::{
    Job, JobCounts, JobFailure, JobId, JobName, JobOptions, JobPayload, JobState, QueueEvent,
};
use conveyor_core::error::{AppError, Result};
use conveyor_core::port::{IdProvider, TimeProvider};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Failure reason recorded for jobs that exceeded their stall limit
pub const STALLED_REASON: &str = "job stalled more than allowable limit";

/// A job popped by a worker, together with the lock token that proves ownership
#[derive(Debug, Clone)]
pub(crate) struct ActiveJob {
    pub job: Job,
    pub token: String,
}

pub(crate) struct JobStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    /// Woken whenever events are appended
    events_notify: Arc<Notify>,
}

impl JobStore {
    pub fn new(
        pool: SqlitePool,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            pool,
            time_provider,
            id_provider,
            events_notify: Arc::new(Notify::new()),
        }
    }

    pub fn now(&self) -> i64 {
        self.time_provider.now_millis()
    }

    pub fn events_notify(&self) -> &Arc<Notify> {
        &self.events_notify
    }

    pub async fn insert(
        &self,
        queue: &str,
        name: &JobName,
        payload: JobPayload,
        opts: JobOptions,
    ) -> Result<Job> {
        let now = self.now();
        let job = Job::new(
            self.id_provider.generate_id(),
            now,
            queue,
            name.clone(),
            payload,
            opts,
        );
        let available_at = after_ms(now, job.opts.delay.unwrap_or(0));

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue, name, payload, opts, state, priority,
                available_at, attempts_made, stalled_count, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.queue)
        .bind(job.name.as_str())
        .bind(job.payload.as_value().to_string())
        .bind(serde_json::to_string(&job.opts)?)
        .bind(job.state.as_str())
        .bind(job.opts.priority.unwrap_or(0) as i64)
        .bind(available_at)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(job)
    }

    pub async fn find(&self, queue: &str, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE queue = ? AND id = ?")
            .bind(queue)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    pub async fn delete(&self, queue: &str, id: &JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE queue = ? AND id = ?")
            .bind(queue)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every job and event of a queue
    ///
    /// Refused while jobs of the queue are being processed.
    pub async fn obliterate(&self, queue: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue = ? AND state = ?")
                .bind(queue)
                .bind(JobState::Active.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        if active > 0 {
            return Err(AppError::Broker(format!(
                "Cannot obliterate queue [{}] with {} active jobs",
                queue, active
            )));
        }

        for statement in ["DELETE FROM jobs WHERE queue = ?", "DELETE FROM events WHERE queue = ?"] {
            sqlx::query(statement)
                .bind(queue)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    pub async fn counts(&self, queue: &str) -> Result<JobCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs WHERE queue = ? GROUP BY state")
                .bind(queue)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        let mut counts = JobCounts::default();
        for (state, count) in rows {
            counts.set(state.parse::<JobState>()?, count as u64);
        }
        Ok(counts)
    }

    /// Atomically claim the next eligible job of `queue`
    ///
    /// Eligible: waiting, or delayed with `available_at` reached. Order:
    /// priority (0 first, then ascending), eligibility time, insertion order.
    pub async fn pop_next(&self, queue: &str, lock_duration_ms: u64) -> Result<Option<ActiveJob>> {
        let now = self.now();
        let token = self.id_provider.generate_id();

        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = ?, processed_on = ?, lock_until = ?, lock_token = ?
            WHERE seq = (
                SELECT seq FROM jobs
                WHERE queue = ? AND state IN (?, ?) AND available_at <= ?
                ORDER BY priority ASC, available_at ASC, seq ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(JobState::Active.as_str())
        .bind(now)
        .bind(after_ms(now, lock_duration_ms))
        .bind(&token)
        .bind(queue)
        .bind(JobState::Waiting.as_str())
        .bind(JobState::Delayed.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => Ok(Some(ActiveJob {
                job: row.into_job()?,
                token,
            })),
            None => Ok(None),
        }
    }

    /// Extend the lock of a job still owned by `active`; false if ownership was lost
    pub async fn renew_lock(&self, active: &ActiveJob, lock_duration_ms: u64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET lock_until = ? WHERE id = ? AND state = ? AND lock_token = ?",
        )
        .bind(after_ms(self.now(), lock_duration_ms))
        .bind(&active.job.id)
        .bind(JobState::Active.as_str())
        .bind(&active.token)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a successful attempt; false if the worker no longer owns the job
    pub async fn complete(&self, active: &ActiveJob, value: &serde_json::Value) -> Result<bool> {
        let now = self.now();
        let job = &active.job;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, finished_on = ?, return_value = ?,
                attempts_made = attempts_made + 1, lock_until = NULL, lock_token = NULL
            WHERE id = ? AND state = ? AND lock_token = ?
            "#,
        )
        .bind(JobState::Completed.as_str())
        .bind(now)
        .bind(value.to_string())
        .bind(&job.id)
        .bind(JobState::Active.as_str())
        .bind(&active.token)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        let event = QueueEvent::Completed {
            job_id: job.id.clone(),
            return_value: value.clone(),
        };
        append_event(&mut tx, &job.queue, &event, now).await?;

        if job.opts.remove_on_complete.unwrap_or(false) {
            delete_job(&mut tx, &job.id).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        self.events_notify.notify_waiters();
        Ok(true)
    }

    /// Record a failed attempt
    ///
    /// Returns the job as it stands afterwards (retry scheduled, or failed for
    /// good), or `None` if the worker no longer owns it.
    pub async fn fail(&self, active: &ActiveJob, reason: &str) -> Result<Option<Job>> {
        let now = self.now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let row = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE id = ? AND state = ? AND lock_token = ?",
        )
        .bind(&active.job.id)
        .bind(JobState::Active.as_str())
        .bind(&active.token)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut job = row.into_job()?;
        job.attempts_made += 1;
        job.failed_reason = Some(reason.to_string());

        let terminal = job.attempts_made >= job.opts.effective_attempts();
        let available_at = if terminal {
            job.state = JobState::Failed;
            job.finished_on = Some(now);
            None
        } else {
            let delay = job
                .opts
                .backoff
                .map(|backoff| backoff.delay_for(job.attempts_made))
                .unwrap_or(0);
            job.state = if delay > 0 {
                JobState::Delayed
            } else {
                JobState::Waiting
            };
            debug!(job_id = %job.id, delay_ms = delay, "Retry scheduled");
            Some(after_ms(now, delay))
        };

        write_failure(&mut tx, &job, available_at).await?;

        if terminal {
            let event = QueueEvent::Failed {
                job_id: job.id.clone(),
                failed_reason: reason.to_string(),
            };
            append_event(&mut tx, &job.queue, &event, now).await?;

            if job.opts.remove_on_fail.unwrap_or(false) {
                delete_job(&mut tx, &job.id).await?;
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        if terminal {
            self.events_notify.notify_waiters();
        }
        Ok(Some(job))
    }

    /// Requeue or fail active jobs whose lock has lapsed
    ///
    /// Each lapse increments `stalled_count`. Past `max_stalled_count` the job
    /// fails for good; the returned failures are those terminal ones, with
    /// `job: None` when the record was removed by `remove_on_fail`.
    pub async fn reclaim_stalled(&self, queue: &str, max_stalled_count: u32) -> Result<Vec<JobFailure>> {
        let now = self.now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs WHERE queue = ? AND state = ? AND lock_until < ? ORDER BY seq",
        )
        .bind(queue)
        .bind(JobState::Active.as_str())
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let mut failures = Vec::new();
        for row in rows {
            let mut job = row.into_job()?;
            job.stalled_count += 1;

            if job.stalled_count <= max_stalled_count {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = ?, stalled_count = ?, available_at = ?,
                        lock_until = NULL, lock_token = NULL
                    WHERE id = ?
                    "#,
                )
                .bind(JobState::Waiting.as_str())
                .bind(job.stalled_count as i64)
                .bind(now)
                .bind(&job.id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

                warn!(queue = %queue, job_id = %job.id, stalled_count = job.stalled_count, "Job stalled, moved back to waiting");
                continue;
            }

            job.state = JobState::Failed;
            job.finished_on = Some(now);
            job.failed_reason = Some(STALLED_REASON.to_string());
            write_failure(&mut tx, &job, None).await?;

            let event = QueueEvent::Failed {
                job_id: job.id.clone(),
                failed_reason: STALLED_REASON.to_string(),
            };
            append_event(&mut tx, queue, &event, now).await?;

            let removed = job.opts.remove_on_fail.unwrap_or(false);
            if removed {
                delete_job(&mut tx, &job.id).await?;
            }

            warn!(queue = %queue, job_id = %job.id, stalled_count = job.stalled_count, "Job failed: stalled too many times");
            failures.push(JobFailure {
                job: if removed { None } else { Some(job) },
                error: STALLED_REASON.to_string(),
            });
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        if !failures.is_empty() {
            self.events_notify.notify_waiters();
        }
        Ok(failures)
    }

    /// Sequence number of the newest event of `queue` (0 if none)
    pub async fn latest_event_seq(&self, queue: &str) -> Result<i64> {
        let seq: Option<i64> = sqlx::query_scalar("SELECT MAX(seq) FROM events WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(seq.unwrap_or(0))
    }

    /// Events of `queue` after `after_seq`, oldest first
    pub async fn events_after(
        &self,
        queue: &str,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<(i64, QueueEvent)>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT seq, data FROM events WHERE queue = ? AND seq > ? ORDER BY seq ASC LIMIT ?",
        )
        .bind(queue)
        .bind(after_seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|(seq, data)| -> Result<(i64, QueueEvent)> { Ok((seq, serde_json::from_str(&data)?)) })
            .collect()
    }

    /// Keep only the newest `max_events` events of `queue`
    pub async fn trim_events(&self, queue: &str, max_events: u64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM events
            WHERE queue = ? AND seq <= (
                SELECT seq FROM events WHERE queue = ?
                ORDER BY seq DESC LIMIT 1 OFFSET ?
            )
            "#,
        )
        .bind(queue)
        .bind(queue)
        .bind(max_events as i64)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}

/// `now + ms`, clamped to the far future instead of wrapping
fn after_ms(now: i64, ms: u64) -> i64 {
    now.saturating_add(i64::try_from(ms).unwrap_or(i64::MAX))
}

async fn append_event(
    conn: &mut SqliteConnection,
    queue: &str,
    event: &QueueEvent,
    now: i64,
) -> Result<()> {
    sqlx::query("INSERT INTO events (queue, job_id, kind, data, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(queue)
        .bind(event.job_id())
        .bind(event.kind())
        .bind(serde_json::to_string(event)?)
        .bind(now)
        .execute(conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

async fn delete_job(conn: &mut SqliteConnection, id: &JobId) -> Result<()> {
    sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

/// Persist the failure bookkeeping of `job`; `available_at` is set for retries only
async fn write_failure(conn: &mut SqliteConnection, job: &Job, available_at: Option<i64>) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET state = ?, attempts_made = ?, stalled_count = ?, failed_reason = ?,
            finished_on = ?, available_at = COALESCE(?, available_at),
            lock_until = NULL, lock_token = NULL
        WHERE id = ?
        "#,
    )
    .bind(job.state.as_str())
    .bind(job.attempts_made as i64)
    .bind(job.stalled_count as i64)
    .bind(&job.failed_reason)
    .bind(job.finished_on)
    .bind(available_at)
    .bind(&job.id)
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue: String,
    name: String,
    payload: String,
    opts: String,
    state: String,
    attempts_made: i64,
    stalled_count: i64,
    created_at: i64,
    processed_on: Option<i64>,
    finished_on: Option<i64>,
    return_value: Option<String>,
    failed_reason: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let return_value = self
            .return_value
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Job {
            id: self.id,
            queue: self.queue,
            name: JobName::new(self.name),
            payload: JobPayload::new(serde_json::from_str(&self.payload)?),
            opts: serde_json::from_str(&self.opts)?,
            state: self.state.parse()?,
            attempts_made: self.attempts_made as u32,
            stalled_count: self.stalled_count as u32,
            created_at: self.created_at,
            processed_on: self.processed_on,
            finished_on: self.finished_on,
            return_value,
            failed_reason: self.failed_reason,
        })
    }
}

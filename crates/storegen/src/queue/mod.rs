//! Durable at-least-once queue of job-start requests.
//!
//! Messages live in the `queue_messages` table. A claimed message is leased
//! to one worker; a worker that dies without acking loses the lease and the
//! message is redelivered to someone else.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::queue_repo::{self, QueueMessageRow};
use crate::db::{Database, DatabaseError};

pub mod retry;

pub use retry::RetryPolicy;

/// Name of the store-generation queue.
pub const QUEUE_NAME: &str = "store-generation";

/// Deduplication key for a job's queue message.
pub fn dedup_key(job_id: i64) -> String {
    format!("store-gen-{}", job_id)
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue message {0} not found")]
    MessageNotFound(i64),

    #[error("Worker {worker_id} no longer holds the lease on queue message {message_id}")]
    LeaseLost { message_id: i64, worker_id: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Lifecycle state of a queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Waiting => "waiting",
            MessageState::Active => "active",
            MessageState::Completed => "completed",
            MessageState::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self, DatabaseError> {
        match s {
            "waiting" => Ok(MessageState::Waiting),
            "active" => Ok(MessageState::Active),
            "completed" => Ok(MessageState::Completed),
            "failed" => Ok(MessageState::Failed),
            other => Err(DatabaseError::UnknownValue {
                column: "queue_messages.state",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one queue message.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub id: i64,
    pub dedup_key: String,
    pub job_id: i64,
    pub state: MessageState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub available_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub last_error: Option<String>,
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn add(now: DateTime<Utc>, delay: Duration) -> i64 {
    to_millis(now).saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
}

impl TryFrom<QueueMessageRow> for QueueMessage {
    type Error = DatabaseError;

    fn try_from(row: QueueMessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            state: MessageState::parse(&row.state)?,
            dedup_key: row.dedup_key,
            job_id: row.job_id,
            attempts_made: row.attempts_made.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            available_at: from_millis(row.available_at),
            lease_expires_at: row.lease_expires_at.map(from_millis),
            worker_id: row.worker_id,
            last_error: row.last_error,
        })
    }
}

/// Result of [`JobQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTicket {
    pub message_id: i64,
    pub dedup_key: String,
    /// `false` when a message for the job was already retained.
    pub created: bool,
}

/// A message leased to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: i64,
    pub job_id: i64,
    /// 1-based attempt number of this delivery.
    pub attempt: u32,
    pub max_attempts: u32,
    pub worker_id: String,
}

/// What happens to a message after a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Redelivered after `delay`; `attempt` is the attempt that failed.
    Retry { delay: Duration, attempt: u32 },
    /// No attempts left; the message is `failed`.
    Exhausted { attempts: u32 },
}

/// A message whose worker vanished after its last allowed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReapedMessage {
    pub message_id: i64,
    pub job_id: i64,
    pub attempts: u32,
}

/// How many finished messages are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub keep_completed: u32,
    pub keep_failed: u32,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            keep_completed: 100,
            keep_failed: 100,
        }
    }
}

/// Message counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// SQLite-backed job queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    name: String,
    retry: RetryPolicy,
    retention: Retention,
    lease: Duration,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            name: QUEUE_NAME.to_string(),
            retry: RetryPolicy::default(),
            retention: Retention::default(),
            lease: Duration::from_secs(600),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Enqueues a start request for `job_id`. A no-op while a message with
    /// the same dedup key is retained.
    pub fn enqueue(&self, job_id: i64, now: DateTime<Utc>) -> Result<QueueTicket, QueueError> {
        let key = dedup_key(job_id);
        let ticket = self.db.with_transaction(|tx| -> Result<QueueTicket, QueueError> {
            let inserted = queue_repo::insert_if_absent(
                tx,
                &self.name,
                &key,
                job_id,
                i64::from(self.retry.max_attempts),
                to_millis(now),
            )?;
            match inserted {
                Some(message_id) => Ok(QueueTicket {
                    message_id,
                    dedup_key: key.clone(),
                    created: true,
                }),
                None => {
                    let existing = queue_repo::find_by_dedup_key(tx, &key)?;
                    let message_id = existing.map(|m| m.id).unwrap_or_default();
                    Ok(QueueTicket {
                        message_id,
                        dedup_key: key.clone(),
                        created: false,
                    })
                }
            }
        })?;

        if ticket.created {
            log::info!("Enqueued job {} as message {}", job_id, ticket.message_id);
        } else {
            log::debug!("Job {} already queued as message {}", job_id, ticket.message_id);
        }
        Ok(ticket)
    }

    /// Leases the oldest ready message to `worker_id`.
    pub fn claim(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Delivery>, QueueError> {
        let row = self.db.with_conn(|conn| {
            queue_repo::claim_next(
                conn,
                &self.name,
                worker_id,
                to_millis(now),
                add(now, self.lease),
            )
        })?;

        Ok(row.map(|row| Delivery {
            message_id: row.id,
            job_id: row.job_id,
            attempt: row.attempts_made.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            worker_id: worker_id.to_string(),
        }))
    }

    /// Fails with `LeaseLost` when an ack changed nothing: the lease expired
    /// and the message was redelivered, reaped or already acknowledged.
    fn ensure_held(
        conn: &rusqlite::Connection,
        delivery: &Delivery,
        changed: usize,
    ) -> Result<(), QueueError> {
        if changed > 0 {
            return Ok(());
        }
        if queue_repo::find_by_id(conn, delivery.message_id)?.is_none() {
            return Err(QueueError::MessageNotFound(delivery.message_id));
        }
        Err(QueueError::LeaseLost {
            message_id: delivery.message_id,
            worker_id: delivery.worker_id.clone(),
        })
    }

    fn finish_delivery(
        &self,
        tx: &rusqlite::Connection,
        delivery: &Delivery,
        state: MessageState,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let changed = queue_repo::finish_held(
            tx,
            delivery.message_id,
            &delivery.worker_id,
            i64::from(delivery.attempt),
            state.as_str(),
            error,
            to_millis(now),
        )?;
        Self::ensure_held(tx, delivery, changed)?;

        let keep = match state {
            MessageState::Completed => self.retention.keep_completed,
            _ => self.retention.keep_failed,
        };
        queue_repo::prune(tx, &self.name, state.as_str(), keep)?;
        Ok(())
    }

    /// Acknowledges a successful delivery.
    pub fn complete(&self, delivery: &Delivery, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.db.with_transaction(|tx| {
            self.finish_delivery(tx, delivery, MessageState::Completed, None, now)
        })
    }

    /// Records a failed delivery and decides about redelivery.
    pub fn fail(
        &self,
        delivery: &Delivery,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, QueueError> {
        let policy = RetryPolicy {
            max_attempts: delivery.max_attempts,
            ..self.retry
        };
        let attempt = delivery.attempt;

        self.db.with_transaction(|tx| {
            if policy.should_retry(attempt) {
                let delay = policy.delay_for(attempt);
                let changed = queue_repo::schedule_retry(
                    tx,
                    delivery.message_id,
                    &delivery.worker_id,
                    i64::from(attempt),
                    error,
                    add(now, delay),
                )?;
                Self::ensure_held(tx, delivery, changed)?;
                Ok(FailOutcome::Retry { delay, attempt })
            } else {
                self.finish_delivery(tx, delivery, MessageState::Failed, Some(error), now)?;
                Ok(FailOutcome::Exhausted { attempts: attempt })
            }
        })
    }

    /// Fails a message without redelivery, e.g. because its job was cancelled.
    pub fn discard(
        &self,
        delivery: &Delivery,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.db.with_transaction(|tx| {
            self.finish_delivery(tx, delivery, MessageState::Failed, Some(reason), now)
        })
    }

    /// Renews the lease of a running delivery. Returns `false` if the
    /// message is no longer held by this worker.
    pub fn extend_lease(&self, delivery: &Delivery, now: DateTime<Utc>) -> Result<bool, QueueError> {
        let changed = self.db.with_conn(|conn| {
            queue_repo::extend_lease(
                conn,
                delivery.message_id,
                &delivery.worker_id,
                add(now, self.lease),
            )
        })?;
        Ok(changed > 0)
    }

    /// Fails every message whose lease expired after its last allowed
    /// attempt. The caller is expected to fail the corresponding jobs.
    pub fn reap_exhausted(&self, now: DateTime<Utc>) -> Result<Vec<ReapedMessage>, QueueError> {
        let reaped = self.db.with_transaction(|tx| -> Result<_, QueueError> {
            let rows = queue_repo::expired_exhausted(tx, &self.name, to_millis(now))?;
            let mut reaped = Vec::with_capacity(rows.len());
            for row in rows {
                queue_repo::finish(
                    tx,
                    row.id,
                    "failed",
                    Some("lease expired after final attempt"),
                    to_millis(now),
                )?;
                reaped.push(ReapedMessage {
                    message_id: row.id,
                    job_id: row.job_id,
                    attempts: row.attempts_made.max(0) as u32,
                });
            }
            Ok(reaped)
        })?;

        for message in &reaped {
            log::warn!(
                "Message {} for job {} stalled on its final attempt",
                message.message_id,
                message.job_id
            );
        }
        Ok(reaped)
    }

    /// Trims finished messages down to the retention limits.
    pub fn prune(&self) -> Result<usize, QueueError> {
        let deleted = self.db.with_transaction(|tx| -> Result<usize, QueueError> {
            let completed =
                queue_repo::prune(tx, &self.name, "completed", self.retention.keep_completed)?;
            let failed = queue_repo::prune(tx, &self.name, "failed", self.retention.keep_failed)?;
            Ok(completed + failed)
        })?;
        Ok(deleted)
    }

    pub fn message_for_job(&self, job_id: i64) -> Result<Option<QueueMessage>, QueueError> {
        let row = self
            .db
            .with_conn(|conn| queue_repo::find_by_dedup_key(conn, &dedup_key(job_id)))?;
        Ok(row.map(QueueMessage::try_from).transpose()?)
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        let counts = self
            .db
            .with_conn(|conn| queue_repo::count_by_state(conn, &self.name))?;

        let mut stats = QueueStats::default();
        for (state, count) in counts {
            match MessageState::parse(&state)? {
                MessageState::Waiting => stats.waiting = count,
                MessageState::Active => stats.active = count,
                MessageState::Completed => stats.completed = count,
                MessageState::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}

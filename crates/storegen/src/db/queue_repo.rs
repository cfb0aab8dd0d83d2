//! Queue repository: row-level access to `queue_messages`.
//!
//! Times are stored as epoch milliseconds so readiness and lease checks are
//! plain integer comparisons.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw row from `queue_messages`.
#[derive(Debug, Clone)]
pub struct QueueMessageRow {
    pub id: i64,
    pub queue: String,
    pub dedup_key: String,
    pub job_id: i64,
    pub state: String,
    pub attempts_made: i64,
    pub max_attempts: i64,
    pub available_at: i64,
    pub lease_expires_at: Option<i64>,
    pub worker_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub finished_at: Option<i64>,
}

impl QueueMessageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            queue: row.get("queue")?,
            dedup_key: row.get("dedup_key")?,
            job_id: row.get("job_id")?,
            state: row.get("state")?,
            attempts_made: row.get("attempts_made")?,
            max_attempts: row.get("max_attempts")?,
            available_at: row.get("available_at")?,
            lease_expires_at: row.get("lease_expires_at")?,
            worker_id: row.get("worker_id")?,
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Inserts a waiting message unless one with the same dedup key exists.
/// Returns the new id, or `None` when the key was already present.
pub fn insert_if_absent(
    conn: &Connection,
    queue: &str,
    dedup_key: &str,
    job_id: i64,
    max_attempts: i64,
    now_ms: i64,
) -> Result<Option<i64>, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO queue_messages
         (queue, dedup_key, job_id, state, attempts_made, max_attempts, available_at, created_at)
         VALUES (?1, ?2, ?3, 'waiting', 0, ?4, ?5, ?5)",
        params![queue, dedup_key, job_id, max_attempts, now_ms],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<QueueMessageRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM queue_messages WHERE id = ?1",
            params![id],
            QueueMessageRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn find_by_dedup_key(
    conn: &Connection,
    dedup_key: &str,
) -> Result<Option<QueueMessageRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM queue_messages WHERE dedup_key = ?1",
            params![dedup_key],
            QueueMessageRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Atomically claims the oldest ready message: a waiting message whose
/// backoff has elapsed, or an active message whose lease expired and which
/// still has attempts left.
pub fn claim_next(
    conn: &Connection,
    queue: &str,
    worker_id: &str,
    now_ms: i64,
    lease_until_ms: i64,
) -> Result<Option<QueueMessageRow>, DatabaseError> {
    let row = conn
        .query_row(
            "UPDATE queue_messages
             SET state = 'active',
                 attempts_made = attempts_made + 1,
                 worker_id = ?2,
                 lease_expires_at = ?4
             WHERE id = (
                 SELECT id FROM queue_messages
                 WHERE queue = ?1
                   AND ((state = 'waiting' AND available_at <= ?3)
                     OR (state = 'active' AND lease_expires_at <= ?3
                         AND attempts_made < max_attempts))
                 ORDER BY available_at ASC, id ASC
                 LIMIT 1
             )
             RETURNING *",
            params![queue, worker_id, now_ms, lease_until_ms],
            QueueMessageRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Moves a message to a finished state (`completed` or `failed`).
pub fn finish(
    conn: &Connection,
    id: i64,
    state: &str,
    error: Option<&str>,
    now_ms: i64,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE queue_messages
         SET state = ?2, last_error = COALESCE(?3, last_error), finished_at = ?4,
             lease_expires_at = NULL
         WHERE id = ?1",
        params![id, state, error, now_ms],
    )?;
    Ok(changed)
}

/// Puts a message held by `worker_id` on its `attempt`-th delivery back to
/// `waiting` until `available_at_ms`. Returns 0 when the lease was lost.
pub fn schedule_retry(
    conn: &Connection,
    id: i64,
    worker_id: &str,
    attempt: i64,
    error: &str,
    available_at_ms: i64,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE queue_messages
         SET state = 'waiting', last_error = ?4, available_at = ?5,
             lease_expires_at = NULL, worker_id = NULL
         WHERE id = ?1 AND state = 'active' AND worker_id = ?2 AND attempts_made = ?3",
        params![id, worker_id, attempt, error, available_at_ms],
    )?;
    Ok(changed)
}

/// Finishes a message only while `worker_id` still holds it on its
/// `attempt`-th delivery. Returns 0 when the lease was lost.
pub fn finish_held(
    conn: &Connection,
    id: i64,
    worker_id: &str,
    attempt: i64,
    state: &str,
    error: Option<&str>,
    now_ms: i64,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE queue_messages
         SET state = ?4, last_error = COALESCE(?5, last_error), finished_at = ?6,
             lease_expires_at = NULL
         WHERE id = ?1 AND state = 'active' AND worker_id = ?2 AND attempts_made = ?3",
        params![id, worker_id, attempt, state, error, now_ms],
    )?;
    Ok(changed)
}

/// Pushes out the lease of an active message held by `worker_id`.
pub fn extend_lease(
    conn: &Connection,
    id: i64,
    worker_id: &str,
    lease_until_ms: i64,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE queue_messages SET lease_expires_at = ?3
         WHERE id = ?1 AND worker_id = ?2 AND state = 'active'",
        params![id, worker_id, lease_until_ms],
    )?;
    Ok(changed)
}

/// Active messages whose lease expired after their last allowed attempt.
pub fn expired_exhausted(
    conn: &Connection,
    queue: &str,
    now_ms: i64,
) -> Result<Vec<QueueMessageRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM queue_messages
         WHERE queue = ?1 AND state = 'active' AND lease_expires_at <= ?2
           AND attempts_made >= max_attempts
         ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map(params![queue, now_ms], QueueMessageRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Deletes all but the newest `keep` messages in `state`.
pub fn prune(
    conn: &Connection,
    queue: &str,
    state: &str,
    keep: u32,
) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM queue_messages
         WHERE queue = ?1 AND state = ?2 AND id NOT IN (
             SELECT id FROM queue_messages
             WHERE queue = ?1 AND state = ?2
             ORDER BY finished_at DESC, id DESC
             LIMIT ?3
         )",
        params![queue, state, keep],
    )?;
    Ok(deleted)
}

/// Counts messages per state.
pub fn count_by_state(conn: &Connection, queue: &str) -> Result<Vec<(String, u64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT state, COUNT(*) FROM queue_messages WHERE queue = ?1 GROUP BY state",
    )?;
    let rows = stmt
        .query_map(params![queue], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    const Q: &str = "store-generation";

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_insert_if_absent_deduplicates() {
        let db = test_db();
        db.with_conn(|conn| {
            let first = insert_if_absent(conn, Q, "store-gen-1", 1, 3, 0)?;
            let second = insert_if_absent(conn, Q, "store-gen-1", 1, 3, 0)?;
            assert!(first.is_some());
            assert!(second.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_claim_respects_available_at() {
        let db = test_db();
        db.with_conn(|conn| {
            let id = insert_if_absent(conn, Q, "store-gen-1", 1, 3, 1_000)?.unwrap();
            assert!(claim_next(conn, Q, "w1", 999, 2_000)?.is_none());

            let claimed = claim_next(conn, Q, "w1", 1_000, 2_000)?.expect("ready message");
            assert_eq!(claimed.id, id);
            assert_eq!(claimed.state, "active");
            assert_eq!(claimed.attempts_made, 1);
            assert_eq!(claimed.lease_expires_at, Some(2_000));

            // Active with a live lease is not claimable.
            assert!(claim_next(conn, Q, "w2", 1_500, 3_000)?.is_none());
            // Expired lease is.
            let stolen = claim_next(conn, Q, "w2", 2_000, 3_000)?.expect("stalled message");
            assert_eq!(stolen.worker_id.as_deref(), Some("w2"));
            assert_eq!(stolen.attempts_made, 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_exhausted_stalled_message_is_not_reclaimed() {
        let db = test_db();
        db.with_conn(|conn| {
            insert_if_absent(conn, Q, "store-gen-1", 1, 1, 0)?;
            claim_next(conn, Q, "w1", 0, 10)?.unwrap();
            assert!(claim_next(conn, Q, "w2", 10, 20)?.is_none());
            assert_eq!(expired_exhausted(conn, Q, 10)?.len(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_extend_lease_requires_owner() {
        let db = test_db();
        db.with_conn(|conn| {
            let id = insert_if_absent(conn, Q, "store-gen-1", 1, 3, 0)?.unwrap();
            claim_next(conn, Q, "w1", 0, 100)?.unwrap();
            assert_eq!(extend_lease(conn, id, "w2", 500)?, 0);
            assert_eq!(extend_lease(conn, id, "w1", 500)?, 1);
            assert_eq!(find_by_id(conn, id)?.unwrap().lease_expires_at, Some(500));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_prune_keeps_newest() {
        let db = test_db();
        db.with_conn(|conn| {
            for job_id in 1..=5 {
                let key = format!("store-gen-{}", job_id);
                let id = insert_if_absent(conn, Q, &key, job_id, 3, 0)?.unwrap();
                finish(conn, id, "completed", None, job_id)?;
            }
            assert_eq!(prune(conn, Q, "completed", 2)?, 3);
            assert!(find_by_dedup_key(conn, "store-gen-5")?.is_some());
            assert!(find_by_dedup_key(conn, "store-gen-4")?.is_some());
            assert!(find_by_dedup_key(conn, "store-gen-3")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_acks_require_current_holder() {
        let db = test_db();
        db.with_conn(|conn| {
            let id = insert_if_absent(conn, Q, "store-gen-1", 1, 3, 0)?.unwrap();
            claim_next(conn, Q, "w1", 0, 100)?.unwrap();
            claim_next(conn, Q, "w2", 100, 200)?.unwrap();

            assert_eq!(schedule_retry(conn, id, "w1", 1, "late", 500)?, 0);
            assert_eq!(finish_held(conn, id, "w1", 1, "completed", None, 150)?, 0);
            assert_eq!(find_by_id(conn, id)?.unwrap().state, "active");

            assert_eq!(finish_held(conn, id, "w2", 2, "completed", None, 150)?, 1);
            assert_eq!(find_by_id(conn, id)?.unwrap().state, "completed");
            Ok(())
        })
        .unwrap();
    }
}

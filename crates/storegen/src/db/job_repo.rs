//! Job repository: row-level access to `generation_jobs` and `job_steps`.
//!
//! Functions take a plain `&Connection` so callers can compose several of
//! them inside one transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw row from `generation_jobs`.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    pub owner_id: i64,
    pub shop_id: i64,
    pub source_url: String,
    pub theme_config: Option<String>,
    pub audience: Option<String>,
    pub tone: Option<String>,
    pub status: String,
    pub current_step_index: i64,
    pub result_product_id: Option<String>,
    pub error: Option<String>,
    pub attempts: i64,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub cancelled_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            shop_id: row.get("shop_id")?,
            source_url: row.get("source_url")?,
            theme_config: row.get("theme_config")?,
            audience: row.get("audience")?,
            tone: row.get("tone")?,
            status: row.get("status")?,
            current_step_index: row.get("current_step_index")?,
            result_product_id: row.get("result_product_id")?,
            error: row.get("error")?,
            attempts: row.get("attempts")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
            cancelled_at: row.get("cancelled_at")?,
        })
    }
}

/// A raw row from `job_steps`.
#[derive(Debug, Clone)]
pub struct StepRow {
    pub job_id: i64,
    pub position: i64,
    pub name: String,
    pub status: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<String>,
    pub output: Option<String>,
}

impl StepRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            position: row.get("position")?,
            name: row.get("name")?,
            status: row.get("status")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            error: row.get("error")?,
            output: row.get("output")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobQuery {
    pub owner_id: Option<i64>,
    pub shop_id: Option<i64>,
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row and returns its assigned id. `row.id` is ignored.
pub fn insert(conn: &Connection, row: &JobRow) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO generation_jobs (owner_id, shop_id, source_url, theme_config, audience,
         tone, status, current_step_index, result_product_id, error, attempts, created_at,
         updated_at, completed_at, cancelled_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            row.owner_id,
            row.shop_id,
            row.source_url,
            row.theme_config,
            row.audience,
            row.tone,
            row.status,
            row.current_step_index,
            row.result_product_id,
            row.error,
            row.attempts,
            row.created_at,
            row.updated_at,
            row.completed_at,
            row.cancelled_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Inserts one step row.
pub fn insert_step(conn: &Connection, step: &StepRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO job_steps (job_id, position, name, status, started_at, completed_at,
         error, output)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            step.job_id,
            step.position,
            step.name,
            step.status,
            step.started_at,
            step.completed_at,
            step.error,
            step.output,
        ],
    )?;
    Ok(())
}

/// Overwrites the mutable columns of a job row.
pub fn update(conn: &Connection, row: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE generation_jobs SET status=?2, current_step_index=?3, result_product_id=?4,
         error=?5, attempts=?6, updated_at=?7, completed_at=?8, cancelled_at=?9
         WHERE id=?1",
        params![
            row.id,
            row.status,
            row.current_step_index,
            row.result_product_id,
            row.error,
            row.attempts,
            row.updated_at,
            row.completed_at,
            row.cancelled_at,
        ],
    )?;
    Ok(())
}

/// Overwrites the mutable columns of a step row.
pub fn update_step(conn: &Connection, step: &StepRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE job_steps SET status=?3, started_at=?4, completed_at=?5, error=?6, output=?7
         WHERE job_id=?1 AND position=?2",
        params![
            step.job_id,
            step.position,
            step.status,
            step.started_at,
            step.completed_at,
            step.error,
            step.output,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM generation_jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Returns the steps of a job ordered by position.
pub fn steps_for(conn: &Connection, job_id: i64) -> Result<Vec<StepRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM job_steps WHERE job_id = ?1 ORDER BY position ASC")?;
    let rows = stmt
        .query_map(params![job_id], StepRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Queries jobs with filters, newest first, returning (rows, total_count).
pub fn query(conn: &Connection, filter: &JobQuery) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    let mut conditions = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(owner_id) = filter.owner_id {
        conditions.push(format!("owner_id = ?{}", param_values.len() + 1));
        param_values.push(Box::new(owner_id));
    }
    if let Some(shop_id) = filter.shop_id {
        conditions.push(format!("shop_id = ?{}", param_values.len() + 1));
        param_values.push(Box::new(shop_id));
    }
    if let Some(ref status) = filter.status {
        conditions.push(format!("status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.clone()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM generation_jobs {}", where_clause);
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

    let limit = filter.limit.unwrap_or(100) as i64;
    let offset = filter.offset.unwrap_or(0) as i64;
    param_values.push(Box::new(limit));
    param_values.push(Box::new(offset));
    // id breaks ties between jobs created within the same timestamp.
    let query_sql = format!(
        "SELECT * FROM generation_jobs {} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows: Vec<JobRow> = stmt
        .query_map(params_ref.as_slice(), JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

/// Counts jobs with the given status.
pub fn count_by_status(conn: &Connection, status: &str) -> Result<u64, DatabaseError> {
    let count: u64 = conn.query_row(
        "SELECT COUNT(*) FROM generation_jobs WHERE status = ?1",
        params![status],
        |r| r.get(0),
    )?;
    Ok(count)
}

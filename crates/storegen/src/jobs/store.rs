//! Durable job store backed by the `generation_jobs` and `job_steps` tables.
//!
//! Every mutating operation runs in a single SQLite transaction: the step
//! row and the job row change together or not at all.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::collaborators::{ThemeConfig, Tone};
use crate::db::job_repo::{self, JobQuery, JobRow, StepRow};
use crate::db::{Database, DatabaseError};
use crate::pipeline::step::{StepName, StepOutput};

use super::model::{Job, JobCounts, JobFilter, JobStatus, NewJob, StepRecord};

/// Error message recorded on cancelled jobs.
pub const CANCELLED_MESSAGE: &str = "cancelled";

#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("Job {0} not found")]
    NotFound(i64),

    #[error("Invalid job input: {0}")]
    Validation(String),

    #[error("Job {0} was cancelled")]
    Cancelled(i64),

    #[error("Cannot {action} job {job_id} in status '{status}'")]
    InvalidState {
        job_id: i64,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Job {job_id} has no step at index {index}")]
    StepOutOfRange { job_id: i64, index: usize },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Transition applied to one step by [`JobStore::update_step`].
#[derive(Debug, Clone)]
pub enum StepTransition {
    /// Step starts executing.
    Start,
    /// Step finished; the output is persisted alongside.
    Complete(Option<StepOutput>),
    /// Step failed with a human-readable message. Fails the job.
    Fail(String),
}

impl StepTransition {
    fn target(&self) -> JobStatus {
        match self {
            StepTransition::Start => JobStatus::Processing,
            StepTransition::Complete(_) => JobStatus::Completed,
            StepTransition::Fail(_) => JobStatus::Failed,
        }
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_status(column: &'static str, s: &str) -> Result<JobStatus, DatabaseError> {
    JobStatus::parse(s).ok_or_else(|| DatabaseError::UnknownValue {
        column,
        value: s.to_string(),
    })
}

fn step_from_row(row: &StepRow) -> Result<StepRecord, DatabaseError> {
    let name = StepName::parse(&row.name).ok_or_else(|| DatabaseError::UnknownValue {
        column: "job_steps.name",
        value: row.name.clone(),
    })?;
    let output = row
        .output
        .as_deref()
        .map(serde_json::from_str::<StepOutput>)
        .transpose()
        .map_err(|source| DatabaseError::Json {
            column: "job_steps.output",
            source,
        })?;

    Ok(StepRecord {
        name,
        status: parse_status("job_steps.status", &row.status)?,
        started_at: row.started_at.as_deref().map(parse_timestamp),
        completed_at: row.completed_at.as_deref().map(parse_timestamp),
        error: row.error.clone(),
        output,
    })
}

fn step_to_row(job_id: i64, record: &StepRecord) -> Result<StepRow, DatabaseError> {
    let output = record
        .output
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|source| DatabaseError::Json {
            column: "job_steps.output",
            source,
        })?;

    Ok(StepRow {
        job_id,
        position: record.name.index() as i64,
        name: record.name.as_str().to_string(),
        status: record.status.as_str().to_string(),
        started_at: record.started_at.map(format_timestamp),
        completed_at: record.completed_at.map(format_timestamp),
        error: record.error.clone(),
        output,
    })
}

fn job_from_rows(row: &JobRow, steps: &[StepRow]) -> Result<Job, DatabaseError> {
    let theme_config = row
        .theme_config
        .as_deref()
        .map(serde_json::from_str::<ThemeConfig>)
        .transpose()
        .map_err(|source| DatabaseError::Json {
            column: "generation_jobs.theme_config",
            source,
        })?;
    let tone = match row.tone.as_deref() {
        None => Tone::default(),
        Some(s) => Tone::parse(s).unwrap_or_else(|| {
            log::warn!("Unknown tone '{}' for job {}, using default", s, row.id);
            Tone::default()
        }),
    };

    Ok(Job {
        id: row.id,
        owner_id: row.owner_id,
        shop_id: row.shop_id,
        source_url: row.source_url.clone(),
        theme_config,
        audience: row.audience.clone(),
        tone,
        status: parse_status("generation_jobs.status", &row.status)?,
        current_step_index: row.current_step_index.max(0) as usize,
        steps: steps.iter().map(step_from_row).collect::<Result<_, _>>()?,
        result_product_id: row.result_product_id.clone(),
        error: row.error.clone(),
        attempts: row.attempts.max(0) as u32,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        completed_at: row.completed_at.as_deref().map(parse_timestamp),
        cancelled_at: row.cancelled_at.as_deref().map(parse_timestamp),
    })
}

fn job_to_row(job: &Job) -> Result<JobRow, DatabaseError> {
    let theme_config = job
        .theme_config
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|source| DatabaseError::Json {
            column: "generation_jobs.theme_config",
            source,
        })?;

    Ok(JobRow {
        id: job.id,
        owner_id: job.owner_id,
        shop_id: job.shop_id,
        source_url: job.source_url.clone(),
        theme_config,
        audience: job.audience.clone(),
        tone: Some(job.tone.as_str().to_string()),
        status: job.status.as_str().to_string(),
        current_step_index: job.current_step_index as i64,
        result_product_id: job.result_product_id.clone(),
        error: job.error.clone(),
        attempts: job.attempts as i64,
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
        completed_at: job.completed_at.map(format_timestamp),
        cancelled_at: job.cancelled_at.map(format_timestamp),
    })
}

fn load(conn: &Connection, job_id: i64) -> Result<Job, JobStoreError> {
    let row = job_repo::find_by_id(conn, job_id)?.ok_or(JobStoreError::NotFound(job_id))?;
    let steps = job_repo::steps_for(conn, job_id)?;
    Ok(job_from_rows(&row, &steps)?)
}

fn save_job(conn: &Connection, job: &Job) -> Result<(), JobStoreError> {
    job_repo::update(conn, &job_to_row(job)?)?;
    Ok(())
}

fn save_step(conn: &Connection, job_id: i64, record: &StepRecord) -> Result<(), JobStoreError> {
    job_repo::update_step(conn, &step_to_row(job_id, record)?)?;
    Ok(())
}

/// Persistent store of generation jobs. Cheap to clone.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts a new job in `pending` with all six steps `pending`.
    pub fn create_job(&self, input: NewJob) -> Result<Job, JobStoreError> {
        input.validate().map_err(JobStoreError::Validation)?;

        let now = Utc::now();
        let job = Job {
            id: 0,
            owner_id: input.owner_id,
            shop_id: input.shop_id,
            source_url: input.source_url.trim().to_string(),
            theme_config: input.theme_config,
            audience: input.audience.filter(|a| !a.trim().is_empty()),
            tone: input.tone.unwrap_or_default(),
            status: JobStatus::Pending,
            current_step_index: 0,
            steps: StepName::ALL.iter().map(|s| StepRecord::pending(*s)).collect(),
            result_product_id: None,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
        };

        let created = self.db.with_transaction(|tx| -> Result<Job, JobStoreError> {
            let id = job_repo::insert(tx, &job_to_row(&job)?)?;
            for record in &job.steps {
                job_repo::insert_step(tx, &step_to_row(id, record)?)?;
            }
            load(tx, id)
        })?;

        log::info!(
            "Created job {} for shop {} ({})",
            created.id,
            created.shop_id,
            created.source_url
        );
        Ok(created)
    }

    pub fn get_job(&self, job_id: i64) -> Result<Job, JobStoreError> {
        self.db.with_transaction(|tx| load(tx, job_id))
    }

    /// Applies one step transition and the matching job-level change
    /// atomically. Short-circuits with `Cancelled` once the job is
    /// cancelled, which is how a running pipeline observes cancellation.
    pub fn update_step(
        &self,
        job_id: i64,
        step_index: usize,
        transition: StepTransition,
    ) -> Result<Job, JobStoreError> {
        self.db.with_transaction(|tx| {
            let mut job = load(tx, job_id)?;
            if job.is_cancelled() {
                return Err(JobStoreError::Cancelled(job_id));
            }
            if job.status.is_terminal() {
                return Err(JobStoreError::InvalidState {
                    job_id,
                    status: job.status,
                    action: "update step of",
                });
            }
            let Some(current) = job.steps.get(step_index) else {
                return Err(JobStoreError::StepOutOfRange {
                    job_id,
                    index: step_index,
                });
            };

            let expected = match transition {
                StepTransition::Start => JobStatus::Pending,
                _ => JobStatus::Processing,
            };
            if current.status != expected {
                return Err(JobStoreError::InvalidState {
                    job_id,
                    status: current.status,
                    action: "transition step of",
                });
            }
            if matches!(transition, StepTransition::Start)
                && (step_index < job.current_step_index || job.active_step().is_some())
            {
                return Err(JobStoreError::InvalidState {
                    job_id,
                    status: job.status,
                    action: "start step of",
                });
            }

            let now = Utc::now();
            let status = transition.target();
            let step = &mut job.steps[step_index];
            step.status = status;
            match transition {
                StepTransition::Start => {
                    step.started_at = Some(now);
                    step.completed_at = None;
                    step.error = None;
                    step.output = None;
                    job.current_step_index = step_index;
                    job.status = JobStatus::Processing;
                }
                StepTransition::Complete(output) => {
                    step.completed_at = Some(now);
                    step.output = output;
                }
                StepTransition::Fail(message) => {
                    step.completed_at = Some(now);
                    step.error = Some(message.clone());
                    job.status = JobStatus::Failed;
                    job.error = Some(message);
                }
            }
            job.updated_at = now;

            save_step(tx, job_id, &job.steps[step_index])?;
            save_job(tx, &job)?;
            Ok(job)
        })
    }

    /// Marks the job completed. Every step must already be completed.
    pub fn complete_job(&self, job_id: i64, result_product_id: &str) -> Result<Job, JobStoreError> {
        let job = self.db.with_transaction(|tx| -> Result<Job, JobStoreError> {
            let mut job = load(tx, job_id)?;
            if job.is_cancelled() {
                return Err(JobStoreError::Cancelled(job_id));
            }
            let all_done = job.steps.iter().all(|s| s.status == JobStatus::Completed);
            if job.status.is_terminal() || !all_done {
                return Err(JobStoreError::InvalidState {
                    job_id,
                    status: job.status,
                    action: "complete",
                });
            }

            let now = Utc::now();
            job.status = JobStatus::Completed;
            job.current_step_index = StepName::COUNT - 1;
            job.result_product_id = Some(result_product_id.to_string());
            job.completed_at = Some(now);
            job.updated_at = now;
            save_job(tx, &job)?;
            Ok(job)
        })?;

        log::info!("Job {} completed (product {})", job_id, result_product_id);
        Ok(job)
    }

    /// Marks the job failed with `error`. A step left in `processing` (a
    /// crashed delivery) is failed with the same message. Cancelled jobs
    /// keep their cancellation error.
    pub fn fail_job(&self, job_id: i64, error: &str) -> Result<Job, JobStoreError> {
        self.db.with_transaction(|tx| {
            let mut job = load(tx, job_id)?;
            if job.status == JobStatus::Completed {
                return Err(JobStoreError::InvalidState {
                    job_id,
                    status: job.status,
                    action: "fail",
                });
            }
            if job.is_cancelled() {
                return Ok(job);
            }

            let now = Utc::now();
            if let Some(index) = job.active_step().map(|s| s.name.index()) {
                let step = &mut job.steps[index];
                step.status = JobStatus::Failed;
                step.completed_at = Some(now);
                step.error = Some(error.to_string());
                save_step(tx, job_id, &job.steps[index])?;
            }
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
            job.updated_at = now;
            save_job(tx, &job)?;
            Ok(job)
        })
    }

    /// Cancels a pending or processing job: forces `failed` with error
    /// `"cancelled"`. Completed steps stay completed; an in-flight step is
    /// marked failed.
    pub fn cancel_job(&self, job_id: i64) -> Result<Job, JobStoreError> {
        let job = self.db.with_transaction(|tx| -> Result<Job, JobStoreError> {
            let mut job = load(tx, job_id)?;
            if job.status.is_terminal() {
                return Err(JobStoreError::InvalidState {
                    job_id,
                    status: job.status,
                    action: "cancel",
                });
            }

            let now = Utc::now();
            if let Some(index) = job.active_step().map(|s| s.name.index()) {
                let step = &mut job.steps[index];
                step.status = JobStatus::Failed;
                step.completed_at = Some(now);
                step.error = Some(CANCELLED_MESSAGE.to_string());
                save_step(tx, job_id, &job.steps[index])?;
            }
            job.status = JobStatus::Failed;
            job.error = Some(CANCELLED_MESSAGE.to_string());
            job.cancelled_at = Some(now);
            job.updated_at = now;
            save_job(tx, &job)?;
            Ok(job)
        })?;

        log::info!("Job {} cancelled", job_id);
        Ok(job)
    }

    /// Prepares a job for a new execution attempt: bumps `attempts`, resets
    /// failed or stale processing steps to pending and points
    /// `currentStepIndex` at the first step that still has to run.
    pub fn begin_attempt(&self, job_id: i64) -> Result<Job, JobStoreError> {
        self.db.with_transaction(|tx| {
            let mut job = load(tx, job_id)?;
            if job.is_cancelled() {
                return Err(JobStoreError::Cancelled(job_id));
            }
            if job.status == JobStatus::Completed {
                return Err(JobStoreError::InvalidState {
                    job_id,
                    status: job.status,
                    action: "start attempt of",
                });
            }

            let now = Utc::now();
            for index in 0..job.steps.len() {
                if matches!(
                    job.steps[index].status,
                    JobStatus::Failed | JobStatus::Processing
                ) {
                    job.steps[index] = StepRecord::pending(job.steps[index].name);
                    save_step(tx, job_id, &job.steps[index])?;
                }
            }

            job.attempts += 1;
            job.current_step_index = job
                .steps
                .iter()
                .position(|s| s.status != JobStatus::Completed)
                .unwrap_or(StepName::COUNT - 1);
            job.status = JobStatus::Pending;
            job.updated_at = now;
            save_job(tx, &job)?;
            Ok(job)
        })
    }

    /// Lists jobs newest first. Returns the page and the total match count.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<(Vec<Job>, u64), JobStoreError> {
        let query = JobQuery {
            owner_id: filter.owner_id,
            shop_id: filter.shop_id,
            status: filter.status.map(|s| s.as_str().to_string()),
            limit: filter.limit,
            offset: filter.offset,
        };

        self.db.with_transaction(|tx| {
            let (rows, total) = job_repo::query(tx, &query)?;
            let mut jobs = Vec::with_capacity(rows.len());
            for row in &rows {
                let steps = job_repo::steps_for(tx, row.id)?;
                jobs.push(job_from_rows(row, &steps)?);
            }
            Ok((jobs, total))
        })
    }

    pub fn counts(&self) -> Result<JobCounts, JobStoreError> {
        let counts = self.db.with_conn(|conn| {
            Ok(JobCounts {
                pending: job_repo::count_by_status(conn, "pending")?,
                processing: job_repo::count_by_status(conn, "processing")?,
                completed: job_repo::count_by_status(conn, "completed")?,
                failed: job_repo::count_by_status(conn, "failed")?,
            })
        })?;
        Ok(counts)
    }
}

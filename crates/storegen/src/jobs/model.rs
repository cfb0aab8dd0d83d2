//! Job and step records as read by status-polling consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::{ThemeConfig, Tone};
use crate::pipeline::step::{StepName, StepOutput};

/// Status shared by jobs and their steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one pipeline step within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub name: StepName,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Persisted result of a completed step. Internal to the runner.
    #[serde(skip)]
    pub output: Option<StepOutput>,
}

impl StepRecord {
    pub fn pending(name: StepName) -> Self {
        Self {
            name,
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            output: None,
        }
    }
}

/// One store-generation request and its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i64,
    pub owner_id: i64,
    pub shop_id: i64,
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_config: Option<ThemeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    pub tone: Tone,
    pub status: JobStatus,
    pub current_step_index: usize,
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn step(&self, name: StepName) -> Option<&StepRecord> {
        self.steps.get(name.index())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    /// The step currently in `processing`, if any.
    pub fn active_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.status == JobStatus::Processing)
    }
}

/// Input for creating a job. Missing fields deserialize to empty values and
/// are rejected by validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewJob {
    pub owner_id: i64,
    pub shop_id: i64,
    pub source_url: String,
    pub theme_config: Option<ThemeConfig>,
    pub audience: Option<String>,
    pub tone: Option<Tone>,
}

impl NewJob {
    pub fn new(owner_id: i64, shop_id: i64, source_url: impl Into<String>) -> Self {
        Self {
            owner_id,
            shop_id,
            source_url: source_url.into(),
            ..Default::default()
        }
    }

    pub fn with_theme(mut self, theme: ThemeConfig) -> Self {
        self.theme_config = Some(theme);
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = Some(tone);
        self
    }

    /// Checks required fields. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        let url = self.source_url.trim();
        if url.is_empty() {
            return Err("sourceUrl is required".to_string());
        }
        match reqwest::Url::parse(url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            Ok(parsed) => {
                return Err(format!(
                    "sourceUrl must use http or https, got '{}'",
                    parsed.scheme()
                ))
            }
            Err(e) => return Err(format!("sourceUrl is not a valid URL: {}", e)),
        }
        if self.shop_id <= 0 {
            return Err("shopId is required".to_string());
        }
        Ok(())
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub owner_id: Option<i64>,
    pub shop_id: Option<i64>,
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

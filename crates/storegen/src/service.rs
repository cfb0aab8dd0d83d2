//! The entry point callers use: submit, poll, cancel and run jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::collaborators::{
    CollaboratorError, Collaborators, DefaultThemeBuilder, HttpScraper, OpenAiGenerator,
    ShopRegistry, ShopifyRestClient,
};
use crate::config::Config;
use crate::db::Database;
use crate::error::{ConfigError, Result};
use crate::jobs::{Job, JobFilter, JobStore, JobStoreError, NewJob};
use crate::pipeline::Pipeline;
use crate::queue::{JobQueue, QueueTicket};
use crate::worker::{WorkerPool, WorkerSettings};

/// Owns the job store, the queue and the collaborators of one process.
pub struct PipelineService {
    store: JobStore,
    queue: JobQueue,
    collaborators: Collaborators,
    settings: WorkerSettings,
    progress: JobProgressBroadcaster,
}

impl PipelineService {
    pub fn new(db: Database, collaborators: Collaborators, config: &Config) -> Self {
        let queue = JobQueue::new(db.clone())
            .with_retry_policy(config.queue.retry_policy())
            .with_retention(config.queue.retention())
            .with_lease(config.queue.lease());

        Self {
            store: JobStore::new(db),
            queue,
            collaborators,
            settings: WorkerSettings {
                worker_count: config.worker_count,
                poll_interval: config.queue.poll_interval(),
                ..WorkerSettings::default()
            },
            progress: JobProgressBroadcaster::default(),
        }
    }

    /// Overrides worker tuning, e.g. a short reap interval in tests.
    pub fn with_worker_settings(mut self, settings: WorkerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Validates and persists a new job, then enqueues it. Returns the job id.
    /// A shop that is not connected is rejected before the job is created.
    pub fn submit(&self, input: NewJob) -> Result<i64> {
        match self.collaborators.shops.resolve(input.shop_id) {
            Ok(_) => {}
            Err(CollaboratorError::ShopNotConnected(shop_id)) => {
                return Err(JobStoreError::Validation(format!(
                    "shop {} is not connected",
                    shop_id
                ))
                .into());
            }
            Err(e) => return Err(e.into()),
        }

        let job = self.store.create_job(input)?;
        self.queue.enqueue(job.id, Utc::now())?;
        self.progress.start_job(job.id);
        Ok(job.id)
    }

    pub fn get_status(&self, job_id: i64) -> Result<Job> {
        Ok(self.store.get_job(job_id)?)
    }

    pub fn cancel(&self, job_id: i64) -> Result<Job> {
        Ok(self.store.cancel_job(job_id)?)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<(Vec<Job>, u64)> {
        Ok(self.store.list_jobs(filter)?)
    }

    /// Enqueues an existing job again. A no-op while its previous message
    /// is still retained by the queue.
    pub fn enqueue(&self, job_id: i64) -> Result<QueueTicket> {
        self.store.get_job(job_id)?;
        Ok(self.queue.enqueue(job_id, Utc::now())?)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobProgressEvent> {
        self.progress.subscribe()
    }

    /// Starts the worker pool. Call once per process.
    pub fn start_workers(&self) -> Result<WorkerPool> {
        let pipeline = Arc::new(Pipeline::new(
            self.store.clone(),
            self.collaborators.clone(),
        ));
        let pool = WorkerPool::start(
            pipeline,
            self.queue.clone(),
            self.settings,
            Some(self.progress.sender()),
        )?;
        Ok(pool)
    }
}

/// Builds the reqwest-backed collaborators described by `config`.
pub fn build_collaborators(config: &Config, db: &Database) -> Result<Collaborators> {
    let api_key = config
        .ai
        .api_key_source()
        .resolve()
        .map_err(|source| ConfigError::Secret {
            name: "ai.apiKey",
            source,
        })?;

    let mut generator =
        OpenAiGenerator::new(api_key, config.ai.model.clone(), config.ai.timeout())?;
    if let Some(base_url) = &config.ai.base_url {
        generator = generator.with_base_url(base_url.clone());
    }

    let scraper = HttpScraper::new(
        Duration::from_secs(config.scraper.timeout_secs),
        &config.scraper.user_agent,
    )?;

    let shopify = ShopifyRestClient::new(
        config.shopify.api_version.clone(),
        config.shopify.timeout(),
    )?;

    Ok(Collaborators {
        scraper: Arc::new(scraper),
        generator: Arc::new(generator),
        theme_builder: Arc::new(DefaultThemeBuilder),
        shopify: Arc::new(shopify),
        shops: Arc::new(ShopRegistry::new(db.clone())),
    })
}

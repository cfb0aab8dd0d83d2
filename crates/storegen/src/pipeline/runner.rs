use tracing::{debug, info, info_span, warn, Instrument};

use crate::collaborators::Collaborators;
use crate::jobs::{JobStore, StepTransition};

use super::context::PipelineContext;
use super::error::PipelineError;
use super::executors;
use super::progress::{ProgressEvent, ProgressReporter};
use super::step::StepName;

/// Drives one job through the six steps, persisting every transition.
pub struct Pipeline {
    store: JobStore,
    collaborators: Collaborators,
}

impl Pipeline {
    pub fn new(store: JobStore, collaborators: Collaborators) -> Self {
        Self {
            store,
            collaborators,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Runs one execution attempt of a job.
    ///
    /// Steps completed by an earlier attempt are skipped and their outputs
    /// restored. The first failing step fails the job and stops the run;
    /// whether the job is retried is up to the queue. Returns the Shopify
    /// product id on success.
    pub async fn run(
        &self,
        job_id: i64,
        progress: &dyn ProgressReporter,
    ) -> Result<String, PipelineError> {
        self.run_attempt(job_id, progress)
            .instrument(info_span!("pipeline", job_id))
            .await
    }

    async fn run_attempt(
        &self,
        job_id: i64,
        progress: &dyn ProgressReporter,
    ) -> Result<String, PipelineError> {
        let job = self
            .store
            .begin_attempt(job_id)
            .map_err(|e| PipelineError::from_store(job_id, e))?;
        info!(
            attempt = job.attempts,
            "Starting store generation for shop {}", job.shop_id
        );

        let mut ctx = PipelineContext::new(job);
        for step in ctx.restore_completed()? {
            debug!("Step {} already completed, reusing its output", step);
            progress.report(ProgressEvent::StepSkipped { step });
        }

        for step in StepName::ALL {
            if ctx.is_completed(step) {
                continue;
            }
            self.run_step(step, &mut ctx, progress)
                .instrument(info_span!("step", name = %step))
                .await?;
        }

        let product_id = ctx.product_id()?.to_string();
        self.store
            .complete_job(job_id, &product_id)
            .map_err(|e| PipelineError::from_store(job_id, e))?;
        info!("Store generation completed, product {}", product_id);
        progress.report(ProgressEvent::Completed {
            product_id: product_id.clone(),
        });
        Ok(product_id)
    }

    async fn run_step(
        &self,
        step: StepName,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        let job_id = ctx.job.id;
        let index = step.index();

        ctx.job = self
            .store
            .update_step(job_id, index, StepTransition::Start)
            .map_err(|e| PipelineError::from_store(job_id, e))?;
        progress.report(ProgressEvent::StepStarted { step });
        debug!(key = %step.idempotency_key(job_id), "Step {} started", step);

        match executors::execute(step, ctx, &self.collaborators).await {
            Ok(output) => {
                ctx.job = self
                    .store
                    .update_step(job_id, index, StepTransition::Complete(Some(output.clone())))
                    .map_err(|e| PipelineError::from_store(job_id, e))?;
                ctx.record(output);
                progress.report(ProgressEvent::StepCompleted { step });
                debug!("Step {} completed", step);
                Ok(())
            }
            Err(err) => {
                let message = match &err {
                    PipelineError::Step { source, .. } => source.to_string(),
                    other => other.to_string(),
                };
                warn!("Step {} failed: {}", step, message);

                if let Err(store_err) =
                    self.store
                        .update_step(job_id, index, StepTransition::Fail(message.clone()))
                {
                    return Err(PipelineError::from_store(job_id, store_err));
                }
                progress.report(ProgressEvent::Failed {
                    step: Some(step),
                    error: message,
                });
                Err(err)
            }
        }
    }
}

use crate::collaborators::{GeneratedContent, ScrapedProduct, ThemeAsset};
use crate::jobs::{Job, JobStatus};

use super::error::PipelineError;
use super::step::{StepName, StepOutput};

/// Job input plus the results accumulated by the steps run so far.
pub struct PipelineContext {
    // Input
    pub job: Job,

    // scrape
    pub scraped: Option<ScrapedProduct>,

    // ai_generate
    pub content: Option<GeneratedContent>,

    // build_theme
    pub theme_assets: Option<Vec<ThemeAsset>>,

    // upload_theme
    pub theme_id: Option<String>,

    // create_product
    pub product_id: Option<String>,

    // create_pages
    pub page_ids: Vec<String>,
}

impl PipelineContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            scraped: None,
            content: None,
            theme_assets: None,
            theme_id: None,
            product_id: None,
            page_ids: Vec::new(),
        }
    }

    /// Restores the outputs of steps completed by an earlier attempt.
    /// Returns the steps that were restored.
    pub fn restore_completed(&mut self) -> Result<Vec<StepName>, PipelineError> {
        let mut restored = Vec::new();
        let outputs: Vec<(StepName, Option<StepOutput>)> = self
            .job
            .steps
            .iter()
            .filter(|s| s.status == JobStatus::Completed)
            .map(|s| (s.name, s.output.clone()))
            .collect();

        for (step, output) in outputs {
            let output = output
                .filter(|o| o.step() == step)
                .ok_or(PipelineError::MissingOutput {
                    job_id: self.job.id,
                    step,
                })?;
            self.record(output);
            restored.push(step);
        }
        Ok(restored)
    }

    pub fn record(&mut self, output: StepOutput) {
        match output {
            StepOutput::Scraped(product) => self.scraped = Some(product),
            StepOutput::Generated(content) => self.content = Some(content),
            StepOutput::ThemeBuilt(assets) => self.theme_assets = Some(assets),
            StepOutput::ThemeUploaded { theme_id } => self.theme_id = Some(theme_id),
            StepOutput::ProductCreated { product_id } => self.product_id = Some(product_id),
            StepOutput::PagesCreated { page_ids } => self.page_ids = page_ids,
        }
    }

    pub fn is_completed(&self, step: StepName) -> bool {
        self.job
            .step(step)
            .is_some_and(|s| s.status == JobStatus::Completed)
    }

    pub fn scraped(&self) -> Result<&ScrapedProduct, PipelineError> {
        self.scraped.as_ref().ok_or_else(|| self.missing(StepName::Scrape))
    }

    pub fn content(&self) -> Result<&GeneratedContent, PipelineError> {
        self.content.as_ref().ok_or_else(|| self.missing(StepName::AiGenerate))
    }

    pub fn theme_assets(&self) -> Result<&[ThemeAsset], PipelineError> {
        self.theme_assets
            .as_deref()
            .ok_or_else(|| self.missing(StepName::BuildTheme))
    }

    pub fn product_id(&self) -> Result<&str, PipelineError> {
        self.product_id
            .as_deref()
            .ok_or_else(|| self.missing(StepName::CreateProduct))
    }

    fn missing(&self, step: StepName) -> PipelineError {
        PipelineError::MissingOutput {
            job_id: self.job.id,
            step,
        }
    }
}

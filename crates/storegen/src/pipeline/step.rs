//! The fixed, ordered list of pipeline steps and their typed results.

use serde::{Deserialize, Serialize};

use crate::collaborators::{GeneratedContent, ScrapedProduct, ThemeAsset};

/// One step of the store-generation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Scrape,
    AiGenerate,
    BuildTheme,
    UploadTheme,
    CreateProduct,
    CreatePages,
}

impl StepName {
    /// Canonical execution order.
    pub const ALL: [StepName; 6] = [
        StepName::Scrape,
        StepName::AiGenerate,
        StepName::BuildTheme,
        StepName::UploadTheme,
        StepName::CreateProduct,
        StepName::CreatePages,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Position of this step in [`StepName::ALL`].
    pub fn index(self) -> usize {
        match self {
            StepName::Scrape => 0,
            StepName::AiGenerate => 1,
            StepName::BuildTheme => 2,
            StepName::UploadTheme => 3,
            StepName::CreateProduct => 4,
            StepName::CreatePages => 5,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepName::Scrape => "scrape",
            StepName::AiGenerate => "ai_generate",
            StepName::BuildTheme => "build_theme",
            StepName::UploadTheme => "upload_theme",
            StepName::CreateProduct => "create_product",
            StepName::CreatePages => "create_pages",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.as_str() == s)
    }

    /// Key identifying this step of this job to external services.
    pub fn idempotency_key(self, job_id: i64) -> String {
        format!("store-gen-{}-{}", job_id, self.as_str())
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result payload of a completed step. Persisted with the step so a retried
/// job can resume without calling the collaborator again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", content = "data", rename_all = "snake_case")]
pub enum StepOutput {
    Scraped(ScrapedProduct),
    Generated(GeneratedContent),
    ThemeBuilt(Vec<ThemeAsset>),
    ThemeUploaded { theme_id: String },
    ProductCreated { product_id: String },
    PagesCreated { page_ids: Vec<String> },
}

impl StepOutput {
    /// The step that produces this kind of output.
    pub fn step(&self) -> StepName {
        match self {
            StepOutput::Scraped(_) => StepName::Scrape,
            StepOutput::Generated(_) => StepName::AiGenerate,
            StepOutput::ThemeBuilt(_) => StepName::BuildTheme,
            StepOutput::ThemeUploaded { .. } => StepName::UploadTheme,
            StepOutput::ProductCreated { .. } => StepName::CreateProduct,
            StepOutput::PagesCreated { .. } => StepName::CreatePages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_order() {
        let names: Vec<&str> = StepName::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "scrape",
                "ai_generate",
                "build_theme",
                "upload_theme",
                "create_product",
                "create_pages"
            ]
        );
    }

    #[test]
    fn test_index_matches_position() {
        for (i, step) in StepName::ALL.iter().enumerate() {
            assert_eq!(step.index(), i);
            assert_eq!(StepName::from_index(i), Some(*step));
            assert_eq!(StepName::parse(step.as_str()), Some(*step));
        }
        assert_eq!(StepName::from_index(6), None);
        assert_eq!(StepName::parse("publish"), None);
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&StepName::AiGenerate).unwrap();
        assert_eq!(json, "\"ai_generate\"");
    }

    #[test]
    fn test_idempotency_key() {
        assert_eq!(
            StepName::CreateProduct.idempotency_key(17),
            "store-gen-17-create_product"
        );
    }

    #[test]
    fn test_output_reports_its_step() {
        let output = StepOutput::ProductCreated {
            product_id: "555".to_string(),
        };
        assert_eq!(output.step(), StepName::CreateProduct);

        let json = serde_json::to_string(&output).unwrap();
        let back: StepOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, output);
    }
}

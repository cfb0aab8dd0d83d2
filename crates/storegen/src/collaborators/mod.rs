//! External collaborators called by the step executors.
//!
//! The pipeline only depends on the traits below. The submodules hold thin
//! reqwest-based implementations used by the worker binary; tests plug in
//! scripted fakes instead.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod openai;
pub mod scraper;
pub mod shop_registry;
pub mod shopify;
pub mod theme;
pub mod types;

pub use openai::OpenAiGenerator;
pub use scraper::HttpScraper;
pub use shop_registry::ShopRegistry;
pub use shopify::ShopifyRestClient;
pub use theme::DefaultThemeBuilder;
pub use types::{
    ContentRequest, CreatedResource, FaqItem, GeneratedContent, ImageSpec, PageSpec,
    ProductSpec, ProductVariant, ScrapedProduct, ShopCredentials, ThemeAsset, ThemeConfig,
    ThemeSettings, Tone, VariantSpec,
};

/// Failure of a call to an external service.
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("{service} request failed: {message}")]
    Request {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} returned a malformed response: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },

    #[error("Shop {0} is not connected")]
    ShopNotConnected(i64),
}

impl CollaboratorError {
    pub fn request(service: &'static str, message: impl Into<String>) -> Self {
        Self::Request {
            service,
            message: message.into(),
        }
    }

    pub fn malformed(service: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            service,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, source_url: &str) -> Result<ScrapedProduct, CollaboratorError>;
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &ContentRequest)
        -> Result<GeneratedContent, CollaboratorError>;
}

/// Pure function from configuration and copy to theme files. No I/O.
pub trait ThemeBuilder: Send + Sync {
    fn build(&self, config: Option<&ThemeConfig>, content: &GeneratedContent) -> Vec<ThemeAsset>;
}

#[async_trait]
pub trait ShopifyClient: Send + Sync {
    /// Creates an unpublished theme and uploads every asset into it.
    async fn upload_theme(
        &self,
        shop: &ShopCredentials,
        name: &str,
        assets: &[ThemeAsset],
    ) -> Result<CreatedResource, CollaboratorError>;

    async fn create_product(
        &self,
        shop: &ShopCredentials,
        product: &ProductSpec,
    ) -> Result<CreatedResource, CollaboratorError>;

    async fn create_page(
        &self,
        shop: &ShopCredentials,
        page: &PageSpec,
    ) -> Result<CreatedResource, CollaboratorError>;
}

/// Looks up the Admin API credentials of a connected shop.
pub trait ShopResolver: Send + Sync {
    fn resolve(&self, shop_id: i64) -> Result<ShopCredentials, CollaboratorError>;
}

/// The full set of collaborators a pipeline run needs.
#[derive(Clone)]
pub struct Collaborators {
    pub scraper: Arc<dyn Scraper>,
    pub generator: Arc<dyn ContentGenerator>,
    pub theme_builder: Arc<dyn ThemeBuilder>,
    pub shopify: Arc<dyn ShopifyClient>,
    pub shops: Arc<dyn ShopResolver>,
}

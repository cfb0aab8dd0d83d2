//! Builders for job input and collaborator payloads.

#![allow(dead_code)]

use storegen::collaborators::{FaqItem, GeneratedContent, ScrapedProduct, ThemeConfig};
use storegen::config::Config;
use storegen::NewJob;

pub const OWNER_ID: i64 = 7;
pub const SHOP_ID: i64 = 42;
pub const SHOP_DOMAIN: &str = "demo-store.myshopify.com";
pub const SOURCE_URL: &str = "https://supplier.example/products/garden-widget";
pub const WIDGET_URL: &str = "https://shop.example/p/1";

/// Builder for `NewJob` instances.
pub struct JobBuilder {
    owner_id: i64,
    shop_id: i64,
    source_url: String,
    theme: Option<ThemeConfig>,
    audience: Option<String>,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            owner_id: OWNER_ID,
            shop_id: SHOP_ID,
            source_url: SOURCE_URL.to_string(),
            theme: None,
            audience: None,
        }
    }

    pub fn shop_id(mut self, shop_id: i64) -> Self {
        self.shop_id = shop_id;
        self
    }

    pub fn source_url(mut self, url: &str) -> Self {
        self.source_url = url.to_string();
        self
    }

    pub fn theme_name(mut self, name: &str) -> Self {
        let mut theme = self.theme.unwrap_or_default();
        theme.name = Some(name.to_string());
        self.theme = Some(theme);
        self
    }

    pub fn audience(mut self, audience: &str) -> Self {
        self.audience = Some(audience.to_string());
        self
    }

    pub fn build(self) -> NewJob {
        let mut job = NewJob::new(self.owner_id, self.shop_id, self.source_url);
        if let Some(theme) = self.theme {
            job = job.with_theme(theme);
        }
        if let Some(audience) = self.audience {
            job = job.with_audience(audience);
        }
        job
    }
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn scraped_product() -> ScrapedProduct {
    ScrapedProduct {
        title: "Garden Widget".to_string(),
        description: "A sturdy widget for every garden.".to_string(),
        images: vec![
            "https://cdn.supplier.example/widget-1.jpg".to_string(),
            "https://cdn.supplier.example/widget-2.jpg".to_string(),
        ],
        price: 24.5,
        currency: "USD".to_string(),
        source_url: SOURCE_URL.to_string(),
        variants: vec![],
    }
}

/// The "Widget" product at 9.99 found at `WIDGET_URL`.
pub fn widget_product() -> ScrapedProduct {
    ScrapedProduct {
        title: "Widget".to_string(),
        description: "A widget.".to_string(),
        images: vec!["https://shop.example/img/widget.jpg".to_string()],
        price: 9.99,
        currency: "USD".to_string(),
        source_url: WIDGET_URL.to_string(),
        variants: vec![],
    }
}

pub fn generated_content() -> GeneratedContent {
    GeneratedContent {
        description: "Meet the widget your garden deserves.\n\nBuilt to last.".to_string(),
        bullet_points: vec![
            "Weatherproof steel".to_string(),
            "Tool-free assembly".to_string(),
        ],
        faq: vec![
            FaqItem {
                question: "Does it rust?".to_string(),
                answer: "No, it is coated.".to_string(),
            },
            FaqItem {
                question: "How big is it?".to_string(),
                answer: "30 cm tall.".to_string(),
            },
        ],
        seo_title: "Garden Widget | Weatherproof".to_string(),
        seo_description: "The weatherproof garden widget.".to_string(),
        tags: vec!["garden".to_string(), "outdoor".to_string()],
    }
}

/// Config with millisecond backoff and polling for worker pool tests.
pub fn fast_config(worker_count: usize) -> Config {
    let mut config = Config::default();
    config.worker_count = worker_count;
    config.queue.backoff_base_ms = 10;
    config.queue.poll_interval_ms = 10;
    config
}

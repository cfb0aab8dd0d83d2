//! Test harness for pipeline and queue integration tests.
//!
//! `TestHarness` owns an in-memory database, a real `JobStore`, `JobQueue`
//! and shop registry, and fake collaborators whose failures are scripted
//! and whose calls are counted.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use secrecy::SecretString;

use storegen::collaborators::{
    CollaboratorError, ContentGenerator, ContentRequest, CreatedResource, DefaultThemeBuilder,
    GeneratedContent, PageSpec, ProductSpec, ScrapedProduct, Scraper, ShopCredentials,
    ShopRegistry, ShopifyClient, ThemeAsset,
};
use storegen::pipeline::NoopProgress;
use storegen::{
    Collaborators, Database, Job, JobQueue, JobStore, NewJob, Pipeline, PipelineError,
};

use super::builders::{generated_content, scraped_product, SHOP_DOMAIN, SHOP_ID};

/// Counts calls and fails the first `failures` of them.
#[derive(Default)]
pub struct Script {
    failures: AtomicU32,
    calls: AtomicU32,
    always_fail: std::sync::atomic::AtomicBool,
}

impl Script {
    pub fn fail_times(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_always(&self) {
        self.always_fail.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn call(&self, service: &'static str) -> Result<(), CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Status {
                service,
                status: 422,
                body: "Unprocessable Entity".to_string(),
            });
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CollaboratorError::request(service, "connection reset"));
        }
        Ok(())
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct FakeScraper {
    pub script: Script,
    product: Mutex<Option<ScrapedProduct>>,
}

impl FakeScraper {
    /// Returns `product` instead of the default fixture.
    pub fn returns(&self, product: ScrapedProduct) {
        *self.product.lock().unwrap() = Some(product);
    }
}

#[async_trait]
impl Scraper for FakeScraper {
    async fn scrape(&self, source_url: &str) -> Result<ScrapedProduct, CollaboratorError> {
        self.script.call("scraper")?;
        let mut product = self
            .product
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(scraped_product);
        product.source_url = source_url.to_string();
        Ok(product)
    }
}

#[derive(Default)]
pub struct FakeGenerator {
    pub script: Script,
    before_call: Mutex<Option<Hook>>,
    requests: Mutex<Vec<ContentRequest>>,
}

impl FakeGenerator {
    /// Runs `hook` at the start of every generate call.
    pub fn before_call(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.before_call.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn requests(&self) -> Vec<ContentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn generate(
        &self,
        request: &ContentRequest,
    ) -> Result<GeneratedContent, CollaboratorError> {
        if let Some(hook) = self.before_call.lock().unwrap().as_ref() {
            hook();
        }
        self.requests.lock().unwrap().push(request.clone());
        self.script.call("openai")?;
        Ok(generated_content())
    }
}

#[derive(Default)]
pub struct FakeShopify {
    pub themes: Script,
    pub products: Script,
    pub pages: Script,
    next_id: AtomicU64,
    theme_names: Mutex<Vec<String>>,
    created_products: Mutex<Vec<ProductSpec>>,
    created_pages: Mutex<Vec<PageSpec>>,
}

impl FakeShopify {
    fn next_id(&self, base: u64) -> String {
        (base + self.next_id.fetch_add(1, Ordering::SeqCst)).to_string()
    }

    pub fn theme_names(&self) -> Vec<String> {
        self.theme_names.lock().unwrap().clone()
    }

    pub fn created_products(&self) -> Vec<ProductSpec> {
        self.created_products.lock().unwrap().clone()
    }

    pub fn created_pages(&self) -> Vec<PageSpec> {
        self.created_pages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShopifyClient for FakeShopify {
    async fn upload_theme(
        &self,
        shop: &ShopCredentials,
        name: &str,
        assets: &[ThemeAsset],
    ) -> Result<CreatedResource, CollaboratorError> {
        assert_eq!(shop.domain, SHOP_DOMAIN);
        assert!(!assets.is_empty());
        self.themes.call("shopify")?;
        self.theme_names.lock().unwrap().push(name.to_string());
        Ok(CreatedResource {
            id: self.next_id(90_000),
        })
    }

    async fn create_product(
        &self,
        _shop: &ShopCredentials,
        product: &ProductSpec,
    ) -> Result<CreatedResource, CollaboratorError> {
        self.products.call("shopify")?;
        self.created_products.lock().unwrap().push(product.clone());
        Ok(CreatedResource {
            id: self.next_id(80_000),
        })
    }

    async fn create_page(
        &self,
        _shop: &ShopCredentials,
        page: &PageSpec,
    ) -> Result<CreatedResource, CollaboratorError> {
        self.pages.call("shopify")?;
        self.created_pages.lock().unwrap().push(page.clone());
        Ok(CreatedResource {
            id: self.next_id(70_000),
        })
    }
}

/// Isolated store, queue and fake collaborators.
pub struct TestHarness {
    pub db: Database,
    pub store: JobStore,
    pub queue: JobQueue,
    pub scraper: Arc<FakeScraper>,
    pub generator: Arc<FakeGenerator>,
    pub shopify: Arc<FakeShopify>,
    pub collaborators: Collaborators,
    pipeline: Pipeline,
}

impl TestHarness {
    pub fn new() -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        let registry = ShopRegistry::new(db.clone());
        registry
            .register(SHOP_ID, SHOP_DOMAIN, &SecretString::from("shpat_test"))
            .expect("Failed to register shop");

        let scraper = Arc::new(FakeScraper::default());
        let generator = Arc::new(FakeGenerator::default());
        let shopify = Arc::new(FakeShopify::default());
        let collaborators = Collaborators {
            scraper: scraper.clone(),
            generator: generator.clone(),
            theme_builder: Arc::new(DefaultThemeBuilder),
            shopify: shopify.clone(),
            shops: Arc::new(registry),
        };

        let store = JobStore::new(db.clone());
        let pipeline = Pipeline::new(store.clone(), collaborators.clone());

        Self {
            queue: JobQueue::new(db.clone()),
            db,
            store,
            scraper,
            generator,
            shopify,
            collaborators,
            pipeline,
        }
    }

    /// Fixed point in time for queue scheduling.
    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    pub fn create(&self, input: NewJob) -> Job {
        self.store.create_job(input).expect("Failed to create job")
    }

    /// Creates a job and enqueues it at `t0`.
    pub fn submit(&self, input: NewJob) -> i64 {
        let job = self.create(input);
        self.queue
            .enqueue(job.id, Self::t0())
            .expect("Failed to enqueue job");
        job.id
    }

    pub async fn run(&self, job_id: i64) -> Result<String, PipelineError> {
        self.pipeline.run(job_id, &NoopProgress).await
    }

    pub fn job(&self, job_id: i64) -> Job {
        self.store.get_job(job_id).expect("Job not found")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

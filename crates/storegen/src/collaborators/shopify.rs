//! Shopify Admin REST API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    CollaboratorError, CreatedResource, PageSpec, ProductSpec, ShopCredentials, ShopifyClient,
    ThemeAsset,
};

const SERVICE: &str = "shopify";

pub const DEFAULT_API_VERSION: &str = "2024-01";

#[derive(Deserialize)]
struct Resource {
    id: serde_json::Value,
}

#[derive(Deserialize)]
struct ThemeEnvelope {
    theme: Resource,
}

#[derive(Deserialize)]
struct ProductEnvelope {
    product: Resource,
}

#[derive(Deserialize)]
struct PageEnvelope {
    page: Resource,
}

impl Resource {
    /// Shopify ids are JSON numbers; they are carried as strings.
    fn into_created(self) -> Result<CreatedResource, CollaboratorError> {
        let id = match self.id {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) if !s.is_empty() => s,
            other => {
                return Err(CollaboratorError::malformed(
                    SERVICE,
                    format!("unexpected resource id {}", other),
                ))
            }
        };
        Ok(CreatedResource { id })
    }
}

/// Thin client over the Admin REST API of any connected shop.
pub struct ShopifyRestClient {
    client: reqwest::Client,
    api_version: String,
}

impl ShopifyRestClient {
    /// `timeout` applies to every Admin API request separately.
    pub fn new(
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::request(SERVICE, e.to_string()))?;
        Ok(Self {
            client,
            api_version: api_version.into(),
        })
    }

    pub fn base_url(&self, domain: &str) -> String {
        format!("https://{}/admin/api/{}", domain, self.api_version)
    }

    async fn request<B, T>(
        &self,
        shop: &ShopCredentials,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, CollaboratorError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url(&shop.domain), path);
        let response = self
            .client
            .request(method.clone(), &url)
            .header("X-Shopify-Access-Token", shop.access_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| CollaboratorError::request(SERVICE, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("Shopify {} {} failed with {}: {}", method, path, status, body);
            return Err(CollaboratorError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| CollaboratorError::request(SERVICE, e.to_string()))?;
        parse_body(&text)
    }
}

/// Decodes a response body; an empty body reads as JSON `null`.
fn parse_body<T: DeserializeOwned>(text: &str) -> Result<T, CollaboratorError> {
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| CollaboratorError::malformed(SERVICE, e.to_string()))
}

#[async_trait]
impl ShopifyClient for ShopifyRestClient {
    async fn upload_theme(
        &self,
        shop: &ShopCredentials,
        name: &str,
        assets: &[ThemeAsset],
    ) -> Result<CreatedResource, CollaboratorError> {
        let body = json!({ "theme": { "name": name, "role": "unpublished" } });
        let envelope: ThemeEnvelope = self
            .request(shop, Method::POST, "/themes.json", &body)
            .await?;
        let theme = envelope.theme.into_created()?;

        let path = format!("/themes/{}/assets.json", theme.id);
        for asset in assets {
            let body = json!({ "asset": asset });
            let _: serde_json::Value = self.request(shop, Method::PUT, &path, &body).await?;
            log::debug!("Uploaded {} to theme {}", asset.key, theme.id);
        }

        log::info!(
            "Uploaded theme '{}' ({} assets) to {}",
            name,
            assets.len(),
            shop.domain
        );
        Ok(theme)
    }

    async fn create_product(
        &self,
        shop: &ShopCredentials,
        product: &ProductSpec,
    ) -> Result<CreatedResource, CollaboratorError> {
        let body = json!({ "product": product });
        let envelope: ProductEnvelope = self
            .request(shop, Method::POST, "/products.json", &body)
            .await?;
        envelope.product.into_created()
    }

    async fn create_page(
        &self,
        shop: &ShopCredentials,
        page: &PageSpec,
    ) -> Result<CreatedResource, CollaboratorError> {
        let body = json!({ "page": page });
        let envelope: PageEnvelope = self.request(shop, Method::POST, "/pages.json", &body).await?;
        envelope.page.into_created()
    }
}

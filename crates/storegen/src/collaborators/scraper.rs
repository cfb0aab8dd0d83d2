//! HTTP product-page scraper.
//!
//! Extracts product data from OpenGraph / product meta tags and schema.org
//! JSON-LD blocks. Pages that need JavaScript to render are not supported.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::{CollaboratorError, ProductVariant, ScrapedProduct, Scraper};

const SERVICE: &str = "scraper";
const MAX_IMAGES: usize = 10;

static META_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<meta\s[^>]*>").unwrap());
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z:_-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});
static TITLE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static H1_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").unwrap());
static JSON_LD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .unwrap()
});
static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

/// Scrapes product pages over plain HTTP.
pub struct HttpScraper {
    client: reqwest::Client,
}

impl HttpScraper {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| CollaboratorError::request(SERVICE, e.to_string()))?;
        Ok(Self { client })
    }

    async fn fetch_html(&self, url: &str) -> Result<String, CollaboratorError> {
        let response = self
            .client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .send()
            .await
            .map_err(|e| CollaboratorError::request(SERVICE, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| CollaboratorError::request(SERVICE, e.to_string()))
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape(&self, source_url: &str) -> Result<ScrapedProduct, CollaboratorError> {
        let html = self.fetch_html(source_url).await?;
        let product = parse_product_page(&html, source_url)?;
        log::debug!(
            "Scraped '{}' from {} ({} images)",
            product.title,
            source_url,
            product.images.len()
        );
        Ok(product)
    }
}

/// `property`/`name` → `content` pairs of every meta tag, in document order.
fn meta_tags(html: &str) -> Vec<(String, String)> {
    let mut tags = Vec::new();
    for tag in META_TAG.find_iter(html) {
        let mut key = None;
        let mut content = None;
        for attr in ATTRIBUTE.captures_iter(tag.as_str()) {
            let name = attr[1].to_ascii_lowercase();
            let value = attr
                .get(2)
                .or_else(|| attr.get(3))
                .map(|m| decode_entities(m.as_str()))
                .unwrap_or_default();
            match name.as_str() {
                "property" | "name" | "itemprop" => key = Some(value.to_ascii_lowercase()),
                "content" => content = Some(value),
                _ => {}
            }
        }
        if let (Some(key), Some(content)) = (key, content) {
            tags.push((key, content));
        }
    }
    tags
}

fn first_meta<'a>(tags: &'a [(String, String)], keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        tags.iter()
            .find(|(k, v)| k == key && !v.trim().is_empty())
            .map(|(_, v)| v.trim())
    })
}

fn text_of(fragment: &str) -> String {
    let stripped = TAGS.replace_all(fragment, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Parses a price such as `$1,234.56`, `1.234,56 €` or `12,99`.
/// Unparseable input yields `0.0`.
pub fn parse_price(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(period)) if comma > period => {
            cleaned.replace('.', "").replacen(',', ".", 1)
        }
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => {
            let parts: Vec<&str> = cleaned.split(',').collect();
            if parts.len() == 2 && parts[1].len() == 2 {
                cleaned.replacen(',', ".", 1)
            } else {
                cleaned.replace(',', "")
            }
        }
        _ => cleaned,
    };

    normalized
        .parse::<f64>()
        .map(|p| (p * 100.0).round() / 100.0)
        .unwrap_or(0.0)
}

fn is_image_url(url: &str) -> bool {
    if url.is_empty() || url.starts_with("data:") {
        return false;
    }
    let path = url.split(['?', '#']).next().unwrap_or_default().to_lowercase();
    let last = path.rsplit('/').next().unwrap_or_default();
    !last.contains('.')
        || [".jpg", ".jpeg", ".png", ".webp", ".gif"]
            .iter()
            .any(|ext| last.ends_with(ext))
}

fn normalize_image_url(url: &str) -> String {
    match url.strip_prefix("//") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}

/// The first schema.org `Product` found in the page's JSON-LD blocks.
fn json_ld_product(html: &str) -> Option<serde_json::Value> {
    fn find_product(value: serde_json::Value) -> Option<serde_json::Value> {
        match value {
            serde_json::Value::Array(items) => items.into_iter().find_map(find_product),
            serde_json::Value::Object(ref map) => {
                let is_product = match map.get("@type") {
                    Some(serde_json::Value::String(t)) => t == "Product",
                    Some(serde_json::Value::Array(types)) => {
                        types.iter().any(|t| t.as_str() == Some("Product"))
                    }
                    _ => false,
                };
                if is_product {
                    return Some(value);
                }
                map.get("@graph").cloned().and_then(find_product)
            }
            _ => None,
        }
    }

    JSON_LD
        .captures_iter(html)
        .filter_map(|c| serde_json::from_str::<serde_json::Value>(c[1].trim()).ok())
        .find_map(find_product)
}

fn json_str(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extracts a [`ScrapedProduct`] from a product page.
pub fn parse_product_page(html: &str, source_url: &str) -> Result<ScrapedProduct, CollaboratorError> {
    let tags = meta_tags(html);
    let ld = json_ld_product(html);
    let ld_field = |key: &str| ld.as_ref().and_then(|p| p.get(key)).and_then(json_str);
    let offers: Vec<serde_json::Value> = match ld.as_ref().and_then(|p| p.get("offers")) {
        Some(serde_json::Value::Array(items)) => items.clone(),
        Some(offer @ serde_json::Value::Object(_)) => vec![offer.clone()],
        _ => Vec::new(),
    };

    let title = ld_field("name")
        .or_else(|| first_meta(&tags, &["og:title", "title"]).map(str::to_string))
        .or_else(|| H1_TAG.captures(html).map(|c| text_of(&c[1])))
        .or_else(|| TITLE_TAG.captures(html).map(|c| text_of(&c[1])))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CollaboratorError::malformed(SERVICE, "no product title found"))?;

    let description = ld_field("description")
        .or_else(|| first_meta(&tags, &["og:description", "description"]).map(str::to_string))
        .map(|d| text_of(&d))
        .unwrap_or_default();

    let mut images: Vec<String> = Vec::new();
    let ld_images = match ld.as_ref().and_then(|p| p.get("image")) {
        Some(serde_json::Value::Array(items)) => items.iter().filter_map(json_str).collect(),
        Some(value) => json_str(value).into_iter().collect(),
        None => Vec::new(),
    };
    let meta_images = tags
        .iter()
        .filter(|(k, _)| k == "og:image" || k == "og:image:secure_url")
        .map(|(_, v)| v.trim().to_string());
    for src in ld_images.into_iter().chain(meta_images) {
        let src = normalize_image_url(&src);
        if is_image_url(&src) && !images.contains(&src) {
            images.push(src);
        }
    }
    images.truncate(MAX_IMAGES);

    let offer_price = offers.first().and_then(|o| o.get("price")).and_then(json_str);
    let price = offer_price
        .or_else(|| {
            first_meta(&tags, &["product:price:amount", "og:price:amount", "price"])
                .map(str::to_string)
        })
        .map(|p| parse_price(&p))
        .unwrap_or(0.0);

    let currency = offers
        .first()
        .and_then(|o| o.get("priceCurrency"))
        .and_then(json_str)
        .or_else(|| {
            first_meta(&tags, &["product:price:currency", "og:price:currency", "pricecurrency"])
                .map(str::to_string)
        })
        .unwrap_or_else(|| "USD".to_string());

    let variants = if offers.len() > 1 {
        offers
            .iter()
            .map(|offer| ProductVariant {
                title: offer
                    .get("name")
                    .and_then(json_str)
                    .unwrap_or_else(|| title.clone()),
                price: offer
                    .get("price")
                    .and_then(json_str)
                    .map(|p| parse_price(&p))
                    .unwrap_or(price),
                sku: offer.get("sku").and_then(json_str),
                inventory: None,
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(ScrapedProduct {
        title,
        description,
        images,
        price,
        currency,
        source_url: source_url.to_string(),
        variants,
    })
}

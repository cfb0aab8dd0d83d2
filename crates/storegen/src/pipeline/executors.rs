//! One executor per pipeline step. Each calls its collaborator and returns
//! the typed step output.

use chrono::Utc;

use crate::collaborators::{
    Collaborators, ContentRequest, GeneratedContent, ImageSpec, PageSpec, ProductSpec,
    ScrapedProduct, ThemeSettings, VariantSpec,
};

use super::context::PipelineContext;
use super::error::PipelineError;
use super::step::{StepName, StepOutput};

pub async fn execute(
    step: StepName,
    ctx: &PipelineContext,
    collaborators: &Collaborators,
) -> Result<StepOutput, PipelineError> {
    let fail = |source| PipelineError::Step { step, source };

    match step {
        StepName::Scrape => {
            let product = collaborators
                .scraper
                .scrape(&ctx.job.source_url)
                .await
                .map_err(fail)?;
            Ok(StepOutput::Scraped(product))
        }
        StepName::AiGenerate => {
            let scraped = ctx.scraped()?;
            let request = ContentRequest {
                title: scraped.title.clone(),
                description: scraped.description.clone(),
                audience: ctx.job.audience.clone(),
                tone: ctx.job.tone,
            };
            let content = collaborators
                .generator
                .generate(&request)
                .await
                .map_err(fail)?;
            Ok(StepOutput::Generated(content))
        }
        StepName::BuildTheme => {
            let assets = collaborators
                .theme_builder
                .build(ctx.job.theme_config.as_ref(), ctx.content()?);
            Ok(StepOutput::ThemeBuilt(assets))
        }
        StepName::UploadTheme => {
            let shop = collaborators.shops.resolve(ctx.job.shop_id).map_err(fail)?;
            let name = theme_name(ctx);
            let theme = collaborators
                .shopify
                .upload_theme(&shop, &name, ctx.theme_assets()?)
                .await
                .map_err(fail)?;
            log::info!("Job {}: theme uploaded with id {}", ctx.job.id, theme.id);
            Ok(StepOutput::ThemeUploaded { theme_id: theme.id })
        }
        StepName::CreateProduct => {
            let shop = collaborators.shops.resolve(ctx.job.shop_id).map_err(fail)?;
            let spec = product_spec(ctx.scraped()?, ctx.content()?);
            let product = collaborators
                .shopify
                .create_product(&shop, &spec)
                .await
                .map_err(fail)?;
            Ok(StepOutput::ProductCreated {
                product_id: product.id,
            })
        }
        StepName::CreatePages => {
            let shop = collaborators.shops.resolve(ctx.job.shop_id).map_err(fail)?;
            let page = faq_page(ctx.content()?);
            let created = collaborators
                .shopify
                .create_page(&shop, &page)
                .await
                .map_err(fail)?;
            Ok(StepOutput::PagesCreated {
                page_ids: vec![created.id],
            })
        }
    }
}

/// The configured theme name, or the default name stamped with today's date.
fn theme_name(ctx: &PipelineContext) -> String {
    ctx.job
        .theme_config
        .as_ref()
        .and_then(|c| c.name.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "{} - {}",
                ThemeSettings::default().name,
                Utc::now().format("%Y-%m-%d")
            )
        })
}

pub fn product_spec(scraped: &ScrapedProduct, content: &GeneratedContent) -> ProductSpec {
    let variants = if scraped.variants.is_empty() {
        vec![VariantSpec {
            title: "Default".to_string(),
            price: format_price(scraped.price),
            sku: None,
        }]
    } else {
        scraped
            .variants
            .iter()
            .map(|v| VariantSpec {
                title: v.title.clone(),
                price: format_price(v.price),
                sku: v.sku.clone(),
            })
            .collect()
    };

    let images = scraped
        .images
        .iter()
        .enumerate()
        .map(|(i, src)| ImageSpec {
            src: src.clone(),
            position: i as u32 + 1,
        })
        .collect();

    ProductSpec {
        title: scraped.title.clone(),
        body_html: product_description_html(content),
        tags: content.tags.join(", "),
        variants,
        images,
    }
}

pub fn faq_page(content: &GeneratedContent) -> PageSpec {
    PageSpec {
        title: "FAQ".to_string(),
        body_html: faq_page_html(content),
        handle: Some("faq".to_string()),
        published: true,
    }
}

fn format_price(price: f64) -> String {
    format!("{:.2}", price)
}

/// Description paragraphs followed by the feature bullet list.
pub fn product_description_html(content: &GeneratedContent) -> String {
    let mut html = String::from("<div class=\"product-description\"><div class=\"description\">");
    for paragraph in content
        .description
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        html.push_str(&format!("<p>{}</p>", escape_html(paragraph)));
    }
    html.push_str("</div>");

    if !content.bullet_points.is_empty() {
        html.push_str("<ul class=\"features\">");
        for bullet in &content.bullet_points {
            html.push_str(&format!("<li>{}</li>", escape_html(bullet)));
        }
        html.push_str("</ul>");
    }

    html.push_str("</div>");
    html
}

pub fn faq_page_html(content: &GeneratedContent) -> String {
    let mut html = String::from("<div class=\"faq-page\"><h1>Frequently Asked Questions</h1>");
    for item in &content.faq {
        html.push_str(&format!(
            "<div class=\"faq-item\"><h3>{}</h3><p>{}</p></div>",
            escape_html(&item.question),
            escape_html(&item.answer)
        ));
    }
    html.push_str("</div>");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{FaqItem, ProductVariant};

    fn content() -> GeneratedContent {
        GeneratedContent {
            description: "First paragraph.\n\nSecond <b>bold</b> one.".to_string(),
            bullet_points: vec!["Fast & light".to_string(), "Durable".to_string()],
            faq: vec![FaqItem {
                question: "Is it \"waterproof\"?".to_string(),
                answer: "Yes.".to_string(),
            }],
            seo_title: "Widget".to_string(),
            seo_description: "The widget".to_string(),
            tags: vec!["garden".to_string(), "tools".to_string()],
        }
    }

    fn scraped() -> ScrapedProduct {
        ScrapedProduct {
            title: "Widget".to_string(),
            description: "A widget".to_string(),
            images: vec![
                "https://cdn.example/a.jpg".to_string(),
                "https://cdn.example/b.jpg".to_string(),
            ],
            price: 19.9,
            currency: "USD".to_string(),
            source_url: "https://shop.example/p/1".to_string(),
            variants: vec![],
        }
    }

    #[test]
    fn test_product_spec_defaults_variant() {
        let spec = product_spec(&scraped(), &content());
        assert_eq!(spec.variants.len(), 1);
        assert_eq!(spec.variants[0].title, "Default");
        assert_eq!(spec.variants[0].price, "19.90");
        assert_eq!(spec.tags, "garden, tools");
        assert_eq!(spec.images[0].position, 1);
        assert_eq!(spec.images[1].position, 2);
    }

    #[test]
    fn test_product_spec_keeps_scraped_variants() {
        let mut product = scraped();
        product.variants = vec![
            ProductVariant {
                title: "Small".to_string(),
                price: 10.0,
                sku: Some("W-S".to_string()),
                inventory: None,
            },
            ProductVariant {
                title: "Large".to_string(),
                price: 12.5,
                sku: None,
                inventory: Some(3),
            },
        ];
        let spec = product_spec(&product, &content());
        let titles: Vec<&str> = spec.variants.iter().map(|v| v.title.as_str()).collect();
        assert_eq!(titles, vec!["Small", "Large"]);
        assert_eq!(spec.variants[0].sku.as_deref(), Some("W-S"));
        assert_eq!(spec.variants[1].price, "12.50");
    }

    #[test]
    fn test_description_html_is_escaped() {
        let html = product_description_html(&content());
        assert!(html.contains("<p>First paragraph.</p>"));
        assert!(html.contains("Second &lt;b&gt;bold&lt;/b&gt; one."));
        assert!(html.contains("<li>Fast &amp; light</li>"));
    }

    #[test]
    fn test_description_without_bullets_has_no_list() {
        let mut content = content();
        content.bullet_points.clear();
        assert!(!product_description_html(&content).contains("<ul"));
    }

    #[test]
    fn test_faq_page() {
        let page = faq_page(&content());
        assert_eq!(page.title, "FAQ");
        assert!(page.published);
        assert!(page
            .body_html
            .contains("<h3>Is it &quot;waterproof&quot;?</h3><p>Yes.</p>"));
    }
}

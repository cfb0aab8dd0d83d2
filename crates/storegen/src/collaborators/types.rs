//! Data exchanged with the external collaborators.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Product data extracted from a source product page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedProduct {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub price: f64,
    pub currency: String,
    pub source_url: String,
    /// Empty when the source page exposes no variant information.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<ProductVariant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    pub title: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<i64>,
}

/// Copywriting tone requested from the content generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    #[default]
    Professional,
    Casual,
    Luxury,
    Playful,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "professional",
            Tone::Casual => "casual",
            Tone::Luxury => "luxury",
            Tone::Playful => "playful",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "professional" => Some(Tone::Professional),
            "casual" => Some(Tone::Casual),
            "luxury" => Some(Tone::Luxury),
            "playful" => Some(Tone::Playful),
            _ => None,
        }
    }
}

/// Input to the AI content generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRequest {
    pub title: String,
    pub description: String,
    pub audience: Option<String>,
    pub tone: Tone,
}

/// Marketing copy produced by the AI content generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    pub description: String,
    pub bullet_points: Vec<String>,
    pub faq: Vec<FaqItem>,
    pub seo_title: String,
    pub seo_description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqItem {
    pub question: String,
    pub answer: String,
}

/// Partial theme configuration supplied with a job. Every field is optional
/// and is merged onto [`ThemeSettings::default`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub colors: ThemeColors,
    #[serde(default)]
    pub typography: ThemeTypography,
    #[serde(default)]
    pub hero: HeroConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeColors {
    pub primary: Option<String>,
    pub secondary: Option<String>,
    pub background: Option<String>,
    pub text: Option<String>,
    pub accent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeTypography {
    pub heading_font: Option<String>,
    pub body_font: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroConfig {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub cta_text: Option<String>,
}

/// Fully resolved theme settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ThemeSettings {
    pub name: String,
    pub primary: String,
    pub secondary: String,
    pub background: String,
    pub text: String,
    pub accent: String,
    pub heading_font: String,
    pub body_font: String,
    pub hero_title: String,
    pub hero_subtitle: String,
    pub hero_cta: String,
}

impl Default for ThemeSettings {
    fn default() -> Self {
        let system_font = "system-ui, -apple-system, sans-serif".to_string();
        Self {
            name: "Dropifi Theme".to_string(),
            primary: "#2563eb".to_string(),
            secondary: "#1e40af".to_string(),
            background: "#ffffff".to_string(),
            text: "#1f2937".to_string(),
            accent: "#f59e0b".to_string(),
            heading_font: system_font.clone(),
            body_font: system_font,
            hero_title: "Welcome to Our Store".to_string(),
            hero_subtitle: "Discover amazing products".to_string(),
            hero_cta: "Shop Now".to_string(),
        }
    }
}

impl ThemeSettings {
    /// Merges a partial configuration onto the defaults.
    pub fn merged(config: Option<&ThemeConfig>) -> Self {
        let mut settings = Self::default();
        let Some(config) = config else {
            return settings;
        };

        fn apply(slot: &mut String, value: &Option<String>) {
            if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                *slot = v.to_string();
            }
        }

        apply(&mut settings.name, &config.name);
        apply(&mut settings.primary, &config.colors.primary);
        apply(&mut settings.secondary, &config.colors.secondary);
        apply(&mut settings.background, &config.colors.background);
        apply(&mut settings.text, &config.colors.text);
        apply(&mut settings.accent, &config.colors.accent);
        apply(&mut settings.heading_font, &config.typography.heading_font);
        apply(&mut settings.body_font, &config.typography.body_font);
        apply(&mut settings.hero_title, &config.hero.title);
        apply(&mut settings.hero_subtitle, &config.hero.subtitle);
        apply(&mut settings.hero_cta, &config.hero.cta_text);
        settings
    }
}

/// One file of a Shopify theme (`layout/theme.liquid`, `assets/main.css`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeAsset {
    pub key: String,
    pub value: String,
}

/// Admin API credentials for one connected shop.
#[derive(Debug)]
pub struct ShopCredentials {
    pub shop_id: i64,
    /// The `*.myshopify.com` domain.
    pub domain: String,
    pub access_token: SecretString,
}

/// Product payload for the Shopify Admin API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSpec {
    pub title: String,
    pub body_html: String,
    pub tags: String,
    pub variants: Vec<VariantSpec>,
    pub images: Vec<ImageSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantSpec {
    pub title: String,
    pub price: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageSpec {
    pub src: String,
    pub position: u32,
}

/// Page payload for the Shopify Admin API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageSpec {
    pub title: String,
    pub body_html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub published: bool,
}

/// Identifier of a resource created on the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theme_settings_defaults_without_config() {
        let settings = ThemeSettings::merged(None);
        assert_eq!(settings.name, "Dropifi Theme");
        assert_eq!(settings.primary, "#2563eb");
    }

    #[test]
    fn test_theme_settings_merge_partial_config() {
        let config: ThemeConfig = serde_json::from_str(
            r##"{"name": "Summer", "colors": {"primary": "#ff0000"}, "typography": {"bodyFont": "Inter"}}"##,
        )
        .unwrap();

        let settings = ThemeSettings::merged(Some(&config));
        assert_eq!(settings.name, "Summer");
        assert_eq!(settings.primary, "#ff0000");
        assert_eq!(settings.secondary, "#1e40af");
        assert_eq!(settings.body_font, "Inter");
        assert_eq!(settings.heading_font, "system-ui, -apple-system, sans-serif");
    }

    #[test]
    fn test_blank_overrides_are_ignored() {
        let config = ThemeConfig {
            name: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(ThemeSettings::merged(Some(&config)).name, "Dropifi Theme");
    }

    #[test]
    fn test_generated_content_uses_camel_case() {
        let content: GeneratedContent = serde_json::from_str(
            r#"{"description":"d","bulletPoints":["a"],"faq":[{"question":"q","answer":"a"}],
                "seoTitle":"t","seoDescription":"s","tags":["x"]}"#,
        )
        .unwrap();
        assert_eq!(content.bullet_points, vec!["a"]);
        assert_eq!(content.faq[0].question, "q");
    }

    #[test]
    fn test_tone_round_trip() {
        for tone in [Tone::Professional, Tone::Casual, Tone::Luxury, Tone::Playful] {
            assert_eq!(Tone::parse(tone.as_str()), Some(tone));
        }
        assert_eq!(Tone::parse("angry"), None);
    }
}

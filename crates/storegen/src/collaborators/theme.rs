//! Default theme builder: a small Online Store 2.0 theme generated from the
//! merged [`ThemeSettings`] and the AI-written FAQ.

use serde_json::{json, Value};

use super::{GeneratedContent, ThemeAsset, ThemeBuilder, ThemeConfig, ThemeSettings};

const FAQ_TITLE: &str = "Frequently Asked Questions";

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultThemeBuilder;

impl ThemeBuilder for DefaultThemeBuilder {
    fn build(&self, config: Option<&ThemeConfig>, content: &GeneratedContent) -> Vec<ThemeAsset> {
        let settings = ThemeSettings::merged(config);
        vec![
            layout(&settings),
            index_template(),
            product_template(),
            hero_section(&settings),
            product_section(),
            faq_section(content),
            header_section(),
            footer_section(),
            settings_schema(&settings),
            settings_data(&settings),
            product_card_snippet(),
            main_css(&settings),
        ]
    }
}

fn asset(key: &str, value: String) -> ThemeAsset {
    ThemeAsset {
        key: key.to_string(),
        value,
    }
}

/// Pretty-printed JSON. Formatting a `Value` cannot fail.
fn pretty(value: &Value) -> String {
    format!("{:#}", value)
}

fn with_schema(schema: &Value, markup: &str) -> String {
    format!("{{% schema %}}\n{}\n{{% endschema %}}\n\n{}", pretty(schema), markup)
}

fn layout(settings: &ThemeSettings) -> ThemeAsset {
    let value = format!(
        r#"<!DOCTYPE html>
<html lang="{{{{ shop.locale }}}}">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{{{{ page_title }}}} | {{{{ shop.name }}}}</title>
  {{% if page_description %}}<meta name="description" content="{{{{ page_description | escape }}}}">{{% endif %}}
  <link rel="canonical" href="{{{{ canonical_url }}}}">
  {{{{ 'main.css' | asset_url | stylesheet_tag }}}}
  {{{{ content_for_header }}}}
  <style>
    :root {{
      --color-primary: {primary};
      --color-secondary: {secondary};
      --color-background: {background};
      --color-text: {text};
      --color-accent: {accent};
      --font-heading: {heading};
      --font-body: {body};
    }}
  </style>
</head>
<body class="template-{{{{ template | replace: '.', '-' }}}}">
  {{% section 'header' %}}
  <main id="main-content" role="main">
    {{{{ content_for_layout }}}}
  </main>
  {{% section 'footer' %}}
</body>
</html>
"#,
        primary = settings.primary,
        secondary = settings.secondary,
        background = settings.background,
        text = settings.text,
        accent = settings.accent,
        heading = settings.heading_font,
        body = settings.body_font,
    );
    asset("layout/theme.liquid", value)
}

fn index_template() -> ThemeAsset {
    let value = json!({
        "sections": {
            "hero": { "type": "hero", "settings": {} },
            "featured-products": { "type": "product-section", "settings": {} },
            "faq": { "type": "faq", "settings": {} }
        },
        "order": ["hero", "featured-products", "faq"]
    });
    asset("templates/index.json", pretty(&value))
}

fn product_template() -> ThemeAsset {
    let value = json!({
        "sections": {
            "main": { "type": "product-section", "settings": { "show_vendor": false } },
            "faq": { "type": "faq", "settings": {} }
        },
        "order": ["main", "faq"]
    });
    asset("templates/product.json", pretty(&value))
}

fn hero_section(settings: &ThemeSettings) -> ThemeAsset {
    let schema = json!({
        "name": "Hero",
        "settings": [
            { "type": "text", "id": "title", "label": "Title", "default": settings.hero_title },
            { "type": "text", "id": "subtitle", "label": "Subtitle", "default": settings.hero_subtitle },
            { "type": "text", "id": "cta_text", "label": "Button Text", "default": settings.hero_cta },
            { "type": "url", "id": "cta_link", "label": "Button Link" },
            { "type": "image_picker", "id": "background_image", "label": "Background Image" }
        ]
    });
    let markup = r#"<section class="hero">
  {% if section.settings.background_image %}
    <div class="hero__background">
      {{ section.settings.background_image | image_url: width: 1920 | image_tag }}
    </div>
  {% endif %}
  <div class="hero__content container">
    <h1 class="hero__title">{{ section.settings.title }}</h1>
    <p class="hero__subtitle">{{ section.settings.subtitle }}</p>
    {% if section.settings.cta_link %}
      <a href="{{ section.settings.cta_link }}" class="btn btn--primary">{{ section.settings.cta_text }}</a>
    {% endif %}
  </div>
</section>
"#;
    asset("sections/hero.liquid", with_schema(&schema, markup))
}

fn product_section() -> ThemeAsset {
    let schema = json!({
        "name": "Product",
        "settings": [
            { "type": "checkbox", "id": "show_price", "label": "Show price", "default": true },
            { "type": "checkbox", "id": "show_description", "label": "Show description", "default": true }
        ]
    });
    let markup = r#"<section class="product-section container">
  {% assign current = product | default: collections.all.products.first %}
  {% if current %}
    <div class="product">
      <div class="product__media">
        {% for image in current.images %}
          {{ image | image_url: width: 800 | image_tag: class: 'product__image' }}
        {% endfor %}
      </div>
      <div class="product__info">
        <h1 class="product__title">{{ current.title }}</h1>
        {% if section.settings.show_price %}
          <p class="product__price">{{ current.price | money }}</p>
        {% endif %}
        {% form 'product', current %}
          <input type="hidden" name="id" value="{{ current.selected_or_first_available_variant.id }}">
          <button type="submit" class="btn btn--primary">Add to cart</button>
        {% endform %}
        {% if section.settings.show_description %}
          <div class="product__description">{{ current.description }}</div>
        {% endif %}
      </div>
    </div>
  {% endif %}
</section>
"#;
    asset("sections/product-section.liquid", with_schema(&schema, markup))
}

fn faq_section(content: &GeneratedContent) -> ThemeAsset {
    let blocks: Vec<Value> = content
        .faq
        .iter()
        .map(|item| {
            json!({
                "type": "faq_item",
                "settings": { "question": item.question, "answer": item.answer }
            })
        })
        .collect();
    let schema = json!({
        "name": "FAQ",
        "settings": [
            { "type": "text", "id": "title", "label": "Title", "default": FAQ_TITLE }
        ],
        "blocks": [
            {
                "type": "faq_item",
                "name": "FAQ Item",
                "settings": [
                    { "type": "text", "id": "question", "label": "Question" },
                    { "type": "richtext", "id": "answer", "label": "Answer" }
                ]
            }
        ],
        "presets": [ { "name": "FAQ", "blocks": blocks } ]
    });
    let markup = r#"<section class="faq-section">
  <div class="container">
    <h2 class="section-title">{{ section.settings.title }}</h2>
    <div class="faq-list">
      {% for block in section.blocks %}
        <details class="faq-item" {{ block.shopify_attributes }}>
          <summary class="faq-item__question">{{ block.settings.question }}</summary>
          <div class="faq-item__answer">{{ block.settings.answer }}</div>
        </details>
      {% endfor %}
    </div>
  </div>
</section>
"#;
    asset("sections/faq.liquid", with_schema(&schema, markup))
}

fn header_section() -> ThemeAsset {
    let schema = json!({
        "name": "Header",
        "settings": [ { "type": "link_list", "id": "menu", "label": "Menu", "default": "main-menu" } ]
    });
    let markup = r#"<header class="site-header">
  <div class="container site-header__inner">
    <a href="{{ routes.root_url }}" class="site-header__logo">{{ shop.name }}</a>
    <nav class="site-header__nav">
      {% for link in linklists[section.settings.menu].links %}
        <a href="{{ link.url }}">{{ link.title }}</a>
      {% endfor %}
    </nav>
    <a href="{{ routes.cart_url }}" class="site-header__cart">Cart ({{ cart.item_count }})</a>
  </div>
</header>
"#;
    asset("sections/header.liquid", with_schema(&schema, markup))
}

fn footer_section() -> ThemeAsset {
    let schema = json!({ "name": "Footer", "settings": [] });
    let markup = r#"<footer class="site-footer">
  <div class="container">
    <p>&copy; {{ 'now' | date: '%Y' }} {{ shop.name }}</p>
  </div>
</footer>
"#;
    asset("sections/footer.liquid", with_schema(&schema, markup))
}

fn settings_schema(settings: &ThemeSettings) -> ThemeAsset {
    let color = |id: &str, label: &str, default: &str| {
        json!({ "type": "color", "id": id, "label": label, "default": default })
    };
    let value = json!([
        {
            "name": "theme_info",
            "theme_name": settings.name,
            "theme_version": "1.0.0",
            "theme_author": "Dropifi"
        },
        {
            "name": "Colors",
            "settings": [
                color("color_primary", "Primary Color", &settings.primary),
                color("color_secondary", "Secondary Color", &settings.secondary),
                color("color_background", "Background Color", &settings.background),
                color("color_text", "Text Color", &settings.text),
                color("color_accent", "Accent Color", &settings.accent)
            ]
        },
        {
            "name": "Typography",
            "settings": [
                { "type": "font_picker", "id": "font_heading", "label": "Heading Font", "default": "assistant_n4" },
                { "type": "font_picker", "id": "font_body", "label": "Body Font", "default": "assistant_n4" }
            ]
        }
    ]);
    asset("config/settings_schema.json", pretty(&value))
}

fn settings_data(settings: &ThemeSettings) -> ThemeAsset {
    let value = json!({
        "current": {
            "color_primary": settings.primary,
            "color_secondary": settings.secondary,
            "color_background": settings.background,
            "color_text": settings.text,
            "color_accent": settings.accent
        }
    });
    asset("config/settings_data.json", pretty(&value))
}

fn product_card_snippet() -> ThemeAsset {
    let value = r#"<div class="product-card">
  <a href="{{ product.url }}" class="product-card__link">
    {% if product.featured_image %}
      {{ product.featured_image | image_url: width: 400 | image_tag: class: 'product-card__image' }}
    {% endif %}
    <h3 class="product-card__title">{{ product.title }}</h3>
    <p class="product-card__price">{{ product.price | money }}</p>
  </a>
</div>
"#;
    asset("snippets/product-card.liquid", value.to_string())
}

fn main_css(settings: &ThemeSettings) -> ThemeAsset {
    let value = format!(
        r#"/* {name} - Main Styles */
*, *::before, *::after {{ box-sizing: border-box; }}
body {{
  margin: 0;
  font-family: var(--font-body, {body});
  color: var(--color-text, {text});
  background: var(--color-background, {background});
  line-height: 1.6;
}}
h1, h2, h3 {{ font-family: var(--font-heading, {heading}); line-height: 1.2; }}
.container {{ max-width: 1200px; margin: 0 auto; padding: 0 1rem; }}
.btn {{ display: inline-block; padding: 0.75rem 1.5rem; border-radius: 0.375rem; border: 0; cursor: pointer; text-decoration: none; }}
.btn--primary {{ background: var(--color-primary, {primary}); color: #fff; }}
.btn--primary:hover {{ background: var(--color-secondary, {secondary}); }}
.site-header__inner {{ display: flex; align-items: center; justify-content: space-between; padding: 1rem 0; }}
.site-header__nav a {{ margin: 0 0.75rem; color: inherit; text-decoration: none; }}
.hero {{ position: relative; padding: 6rem 0; text-align: center; }}
.hero__title {{ font-size: 3rem; margin: 0 0 1rem; }}
.product {{ display: grid; grid-template-columns: 1fr 1fr; gap: 2rem; padding: 3rem 0; }}
.product__image {{ width: 100%; height: auto; border-radius: 0.5rem; }}
.product__price {{ font-size: 1.5rem; color: var(--color-accent, {accent}); }}
.faq-section {{ padding: 3rem 0; }}
.faq-item {{ border-bottom: 1px solid rgba(0, 0, 0, 0.1); padding: 1rem 0; }}
.faq-item__question {{ cursor: pointer; font-weight: 600; }}
.site-footer {{ padding: 2rem 0; text-align: center; font-size: 0.875rem; }}
@media (max-width: 768px) {{
  .product {{ grid-template-columns: 1fr; }}
  .hero__title {{ font-size: 2rem; }}
}}
"#,
        name = settings.name,
        body = settings.body_font,
        heading = settings.heading_font,
        text = settings.text,
        background = settings.background,
        primary = settings.primary,
        secondary = settings.secondary,
        accent = settings.accent,
    );
    asset("assets/main.css", value)
}

//! OpenAI chat-completions content generator.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{CollaboratorError, ContentGenerator, ContentRequest, GeneratedContent, Tone};

const SERVICE: &str = "openai";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Generates marketing copy with a single JSON-mode chat completion.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl OpenAiGenerator {
    /// `timeout` bounds each completion request end to end.
    pub fn new(
        api_key: SecretString,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::request(SERVICE, e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Sets a custom base URL (proxies, compatible APIs).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

fn tone_description(tone: Tone) -> &'static str {
    match tone {
        Tone::Professional => "professional, trustworthy, and informative",
        Tone::Casual => "friendly, conversational, and approachable",
        Tone::Luxury => "sophisticated, exclusive, and premium",
        Tone::Playful => "fun, energetic, and engaging",
    }
}

fn system_prompt(tone: Tone) -> String {
    format!(
        "You are an e-commerce copywriter and SEO specialist writing product content that \
         converts visitors into buyers. Use a {} tone.\n\n\
         Respond only with a JSON object of the form:\n\
         {{\"description\": string, \"bulletPoints\": [string], \
         \"faq\": [{{\"question\": string, \"answer\": string}}], \
         \"seoTitle\": string, \"seoDescription\": string, \"tags\": [string]}}",
        tone_description(tone)
    )
}

fn user_prompt(request: &ContentRequest) -> String {
    let mut prompt = format!(
        "Product title: {}\n\nOriginal description: {}",
        request.title, request.description
    );
    if let Some(audience) = request.audience.as_deref().filter(|a| !a.trim().is_empty()) {
        prompt.push_str(&format!("\n\nTarget audience: {}", audience));
    }
    prompt.push_str(
        "\n\nWrite a 2-3 paragraph description, 5 benefit-focused bullet points under 100 \
         characters, 5 FAQ entries, an SEO title of 50-60 characters, an SEO description of \
         150-160 characters and 5-10 tags.",
    );
    prompt
}

/// Parses and validates the model's JSON answer.
pub fn parse_generated_content(raw: &str) -> Result<GeneratedContent, CollaboratorError> {
    let content: GeneratedContent = serde_json::from_str(raw).map_err(|e| {
        CollaboratorError::malformed(SERVICE, format!("invalid generated content: {}", e))
    })?;
    if content.description.trim().is_empty() {
        return Err(CollaboratorError::malformed(
            SERVICE,
            "invalid generated content: empty description",
        ));
    }
    Ok(content)
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        request: &ContentRequest,
    ) -> Result<GeneratedContent, CollaboratorError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(request.tone),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(request),
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.7,
            max_tokens: 2000,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| CollaboratorError::request(SERVICE, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::warn!("OpenAI API error {}: {}", status, body);
            return Err(CollaboratorError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::malformed(SERVICE, e.to_string()))?;
        let raw = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::malformed(SERVICE, "no content generated"))?;

        parse_generated_content(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_content() {
        let raw = r#"{"description":"Great","bulletPoints":["a","b"],
            "faq":[{"question":"Q?","answer":"A"}],"seoTitle":"T","seoDescription":"D","tags":["x"]}"#;
        let content = parse_generated_content(raw).unwrap();
        assert_eq!(content.bullet_points.len(), 2);
        assert_eq!(content.tags, vec!["x"]);
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let raw = r#"{"description":"Great","bulletPoints":[]}"#;
        let err = parse_generated_content(raw).unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed { .. }));
    }

    #[test]
    fn test_parse_rejects_empty_description() {
        let raw = r#"{"description":" ","bulletPoints":[],"faq":[],"seoTitle":"","seoDescription":"","tags":[]}"#;
        assert!(parse_generated_content(raw).is_err());
    }

    #[test]
    fn test_user_prompt_includes_audience() {
        let request = ContentRequest {
            title: "Widget".to_string(),
            description: "Useful".to_string(),
            audience: Some("gardeners".to_string()),
            tone: Tone::Casual,
        };
        let prompt = user_prompt(&request);
        assert!(prompt.contains("Widget"));
        assert!(prompt.contains("Target audience: gardeners"));
        assert!(system_prompt(request.tone).contains("friendly"));
    }

    #[tokio::test]
    async fn test_unresponsive_api_times_out() {
        // Accepts connections but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        let generator = OpenAiGenerator::new(
            SecretString::from("sk-test"),
            "gpt-4o-mini",
            Duration::from_millis(200),
        )
        .unwrap()
        .with_base_url(base_url);

        let request = ContentRequest {
            title: "Widget".to_string(),
            description: "Useful".to_string(),
            audience: None,
            tone: Tone::Professional,
        };
        let started = std::time::Instant::now();
        let result = generator.generate(&request).await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }
}

//! Content synthesizers.
//!
//! [`TemplateSynthesizer`] builds copy from the payload alone and never fails
//! on a valid payload. [`OpenRouterSynthesizer`] asks a chat-completions model
//! for the same JSON shape.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sitegen_core::ContentSynthesizer;
use sitegen_shared::{
    BusinessPayload, NarrativeContent, NarrativeSection, OpenRouterConfig, Result, SiteGenError,
};

const USER_AGENT: &str = concat!("sitegen/", env!("CARGO_PKG_VERSION"));

/// Default timeout for one completion request.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// Offline synthesizer: fills fixed templates from payload fields and the
/// `tagline`, `description`, `industry`, `services` and `hours` attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateSynthesizer;

impl TemplateSynthesizer {
    pub fn compose(business: &BusinessPayload) -> Result<NarrativeContent> {
        business.validate()?;
        let name = business.name.trim();
        let industry = business.attribute_str("industry");

        let tagline = business
            .attribute_str("tagline")
            .map(str::to_string)
            .unwrap_or_else(|| match industry {
                Some(industry) => format!("Your local {industry}"),
                None => format!("Welcome to {name}"),
            });

        let about = business
            .attribute_str("description")
            .map(str::to_string)
            .unwrap_or_else(|| match (industry, &business.address) {
                (Some(industry), Some(address)) => {
                    format!("{name} is a {industry} based at {address}.")
                }
                (Some(industry), None) => format!("{name} is a {industry} that cares about its customers."),
                (None, Some(address)) => format!("{name} welcomes you at {address}."),
                (None, None) => format!("{name} is glad to have you here."),
            });

        let mut sections = Vec::new();
        if let Some(services) = business.attributes.get("services").and_then(|v| v.as_array()) {
            let items: Vec<&str> = services.iter().filter_map(|s| s.as_str()).collect();
            if !items.is_empty() {
                sections.push(NarrativeSection {
                    title: "What we offer".into(),
                    body: items.join(", "),
                });
            }
        }
        if let Some(hours) = business.attribute_str("hours") {
            sections.push(NarrativeSection {
                title: "Opening hours".into(),
                body: hours.to_string(),
            });
        }
        sections.push(NarrativeSection {
            title: "Get in touch".into(),
            body: format!("Reach us at {}.", business.contact_email.trim()),
        });

        Ok(NarrativeContent {
            headline: name.to_string(),
            tagline,
            about,
            sections,
            call_to_action: "Contact us".into(),
        })
    }
}

#[async_trait]
impl ContentSynthesizer for TemplateSynthesizer {
    async fn synthesize(&self, business: &BusinessPayload) -> Result<NarrativeContent> {
        Self::compose(business)
    }

    fn name(&self) -> &str {
        "template"
    }
}

// ---------------------------------------------------------------------------
// OpenRouter
// ---------------------------------------------------------------------------

const SYSTEM_PROMPT: &str = "You write concise website copy for small businesses. \
Reply with a single JSON object and nothing else, with keys: \
headline (string), tagline (string), about (string, 2-4 sentences), \
sections (array of {title, body}, at most 4), call_to_action (string).";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Chat-completions synthesizer against an OpenRouter-compatible endpoint.
pub struct OpenRouterSynthesizer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterSynthesizer {
    pub fn new(config: &OpenRouterConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| SiteGenError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.default_model.clone(),
        })
    }

    fn user_prompt(business: &BusinessPayload) -> Result<String> {
        // The login identifier is not copy material.
        let mut brief = business.clone();
        brief.contact_email.clear();
        let json = serde_json::to_string_pretty(&brief)
            .map_err(|e| SiteGenError::validation(format!("cannot encode payload: {e}")))?;
        Ok(format!("Write the website copy for this business:\n{json}"))
    }
}

#[async_trait]
impl ContentSynthesizer for OpenRouterSynthesizer {
    #[instrument(skip_all, fields(model = %self.model, business = %business.name))]
    async fn synthesize(&self, business: &BusinessPayload) -> Result<NarrativeContent> {
        business.validate()?;
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: Self::user_prompt(business)?,
                },
            ],
            temperature: 0.7,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SiteGenError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SiteGenError::Network(format!(
                "{url}: HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| SiteGenError::Network(format!("{url}: invalid response: {e}")))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SiteGenError::Network(format!("{url}: completion has no content")))?;

        let narrative = parse_narrative(&content)?;
        debug!(sections = narrative.sections.len(), "narrative synthesized");
        Ok(narrative)
    }

    fn name(&self) -> &str {
        "openrouter"
    }
}

/// Parse model output into narrative content, tolerating a Markdown code fence.
fn parse_narrative(raw: &str) -> Result<NarrativeContent> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let narrative: NarrativeContent = serde_json::from_str(body)
        .map_err(|e| SiteGenError::validation(format!("model returned malformed content: {e}")))?;

    if narrative.headline.trim().is_empty() || narrative.about.trim().is_empty() {
        return Err(SiteGenError::validation(
            "model returned an empty headline or about section",
        ));
    }
    Ok(narrative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn bakery() -> BusinessPayload {
        let mut business = BusinessPayload::new("Harbor Bakery", "owner@harbor.test");
        business.address = Some("1 Quay Street".into());
        business
            .attributes
            .insert("industry".into(), json!("bakery"));
        business
            .attributes
            .insert("services".into(), json!(["Sourdough", "Pastries"]));
        business
    }

    fn config(base_url: &str) -> OpenRouterConfig {
        OpenRouterConfig {
            base_url: base_url.to_string(),
            ..OpenRouterConfig::default()
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({
            "id": "gen-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
    }

    const GOOD: &str = r#"{"headline":"Harbor Bakery","tagline":"Bread by the sea",
        "about":"Family bakers since 1998.","sections":[{"title":"Menu","body":"Loaves"}],
        "call_to_action":"Order now"}"#;

    #[tokio::test]
    async fn template_uses_attributes() {
        let content = TemplateSynthesizer.synthesize(&bakery()).await.unwrap();
        assert_eq!(content.headline, "Harbor Bakery");
        assert_eq!(content.tagline, "Your local bakery");
        assert_eq!(content.about, "Harbor Bakery is a bakery based at 1 Quay Street.");
        assert_eq!(content.sections[0].body, "Sourdough, Pastries");
        assert_eq!(content.sections.last().unwrap().title, "Get in touch");
    }

    #[tokio::test]
    async fn template_rejects_invalid_payload() {
        let business = BusinessPayload::new("  ", "owner@harbor.test");
        assert!(TemplateSynthesizer.synthesize(&business).await.is_err());
    }

    #[tokio::test]
    async fn openrouter_parses_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(GOOD)))
            .expect(1)
            .mount(&server)
            .await;

        let synth = OpenRouterSynthesizer::new(&config(&server.uri()), "test-key").unwrap();
        let content = synth.synthesize(&bakery()).await.unwrap();
        assert_eq!(content.tagline, "Bread by the sea");
        assert_eq!(content.sections.len(), 1);

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(
            !body["messages"][1]["content"]
                .as_str()
                .unwrap()
                .contains("owner@harbor.test")
        );
    }

    #[tokio::test]
    async fn openrouter_accepts_fenced_json() {
        let server = MockServer::start().await;
        let fenced = format!("```json\n{GOOD}\n```");
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(&fenced)))
            .mount(&server)
            .await;

        let synth = OpenRouterSynthesizer::new(&config(&server.uri()), "k").unwrap();
        assert_eq!(synth.synthesize(&bakery()).await.unwrap().call_to_action, "Order now");
    }

    #[tokio::test]
    async fn openrouter_http_error_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let synth = OpenRouterSynthesizer::new(&config(&server.uri()), "k").unwrap();
        let err = synth.synthesize(&bakery()).await.unwrap_err();
        assert!(matches!(err, SiteGenError::Network(_)));
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn openrouter_rejects_malformed_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("Sure! Here it is.")))
            .mount(&server)
            .await;

        let synth = OpenRouterSynthesizer::new(&config(&server.uri()), "k").unwrap();
        assert!(matches!(
            synth.synthesize(&bakery()).await,
            Err(SiteGenError::Validation { .. })
        ));
    }

    #[test]
    fn empty_headline_is_rejected() {
        let raw = r#"{"headline":" ","tagline":"t","about":"a","call_to_action":"c"}"#;
        assert!(parse_narrative(raw).is_err());
    }
}

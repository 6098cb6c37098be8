//! Text-completion client for content providers
//!
//! Talks to either an Ollama server (`/api/generate`) or an OpenAI-compatible
//! endpoint (`/chat/completions`). Responses from language models are often
//! wrapped in prose or markdown, so [`extract_json`] pulls the JSON payload out
//! and repairs the most common defects before parsing.

use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

use crate::provider::ProviderError;

/// Wire protocol spoken by the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmBackend {
    Ollama,
    OpenAiCompatible,
}

impl LlmBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAiCompatible => "openai",
        }
    }
}

/// Configuration for LLM client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,

    /// Base URL (e.g. http://localhost:11434 or https://api.openai.com/v1)
    pub endpoint: String,

    /// Model name
    pub model: String,

    /// Bearer token for OpenAI-compatible endpoints
    pub api_key: Option<String>,

    /// Transport-level request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature for generation (0.0 - 1.0)
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Ollama,
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            api_key: None,
            timeout_secs: 60,
            max_tokens: 2048,
            temperature: 0.7,
        }
    }
}

impl LlmConfig {
    /// Ollama endpoint with the given model
    pub fn ollama(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// OpenAI-compatible endpoint with the given model
    pub fn openai(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            backend: LlmBackend::OpenAiCompatible,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            ..Default::default()
        }
    }
}

/// Ollama generate request
#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

/// Ollama generation options
#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

/// Ollama generate response
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatContent,
}

#[derive(Debug, Deserialize)]
struct ChatContent {
    content: String,
}

/// HTTP client for one language-model endpoint
#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
    name: String,
}

impl LlmClient {
    /// Create a new LLM client with custom config
    pub fn with_config(config: LlmConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let name = format!("{}:{}", config.backend.as_str(), config.model);

        Ok(Self {
            client,
            config,
            name,
        })
    }

    /// Provider name, `<backend>:<model>`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    /// Check if the endpoint answers
    pub async fn is_available(&self) -> bool {
        let path = match self.config.backend {
            LlmBackend::Ollama => "api/tags",
            LlmBackend::OpenAiCompatible => "models",
        };
        let mut request = self.client.get(self.url(path));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        matches!(request.send().await, Ok(r) if r.status().is_success())
    }

    /// Complete a prompt, returning the raw model text
    pub async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let text = match self.config.backend {
            LlmBackend::Ollama => self.complete_ollama(prompt).await?,
            LlmBackend::OpenAiCompatible => self.complete_chat(prompt).await?,
        };

        if text.trim().is_empty() {
            return Err(ProviderError::malformed("empty completion"));
        }
        Ok(text)
    }

    /// Complete a prompt and parse the JSON payload of the answer
    pub async fn complete_json<T: DeserializeOwned>(&self, prompt: &str) -> Result<T, ProviderError> {
        let text = self.complete(prompt).await?;
        let json = extract_json(&text);
        tracing::debug!(
            provider = %self.name,
            json = %crate::utils::truncate_text(&json, 500),
            "Extracted JSON"
        );
        Ok(serde_json::from_str(&json)?)
    }

    async fn complete_ollama(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = OllamaRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let response = self
            .client
            .post(self.url("api/generate"))
            .json(&request)
            .send()
            .await?;

        let response = check_status(response).await?;
        let body: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(e.to_string()))?;
        Ok(body.response)
    }

    async fn complete_chat(&self, prompt: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut builder = self.client.post(self.url("chat/completions")).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = check_status(builder.send().await?).await?;
        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::malformed("no choices in completion"))
    }
}

/// Turn a non-2xx response into [`ProviderError::Status`]
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status,
        body: crate::utils::truncate_text(&body, 200),
    })
}

// ============================================================================
// JSON extraction
// ============================================================================

/// Extract JSON from markdown code blocks or raw text, repairing common issues
pub fn extract_json(text: &str) -> String {
    let raw_json = extract_raw_json(text);
    fix_json(&raw_json)
}

/// Extract raw JSON string from text
fn extract_raw_json(text: &str) -> String {
    // Fenced ```json block
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim().to_string();
        }
    }

    // Generic fenced block
    if let Some(start) = text.find("```") {
        let after_start = &text[start + 3..];
        let content_start = after_start.find('\n').map_or(0, |i| i + 1);
        if let Some(end) = after_start[content_start..].find("```") {
            return after_start[content_start..content_start + end]
                .trim()
                .to_string();
        }
    }

    // Outermost object or array, whichever opens first
    let open = match (text.find('{'), text.find('[')) {
        (Some(o), Some(a)) => Some(o.min(a)),
        (o, a) => o.or(a),
    };
    if let Some(start) = open {
        let close = if text[start..].starts_with('{') { '}' } else { ']' };
        if let Some(end) = text.rfind(close) {
            if end > start {
                return text[start..=end].to_string();
            }
        }
    }

    text.trim().to_string()
}

/// Fix common JSON issues from LLM output
fn fix_json(json: &str) -> String {
    if serde_json::from_str::<serde_json::Value>(json).is_ok() {
        return json.to_string();
    }

    static TRAILING_COMMA: OnceLock<Regex> = OnceLock::new();
    let trailing = TRAILING_COMMA
        .get_or_init(|| Regex::new(r",\s*([}\]])").expect("Invalid regex pattern"));

    let fixed = json
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    let fixed = trailing.replace_all(&fixed, "$1").to_string();

    if serde_json::from_str::<serde_json::Value>(&fixed).is_ok() {
        fixed
    } else {
        json.to_string()
    }
}

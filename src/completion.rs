//! Chat-completion client (OpenAI-style API, DeepSeek by default).

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";
const MODEL: &str = "deepseek-chat";

/// Ceiling applied to caller-requested token counts.
const MAX_TOKENS_CEILING: u32 = 4096;

pub struct Client {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Sampling configuration for one completion call.
#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
}

impl SamplingParams {
    pub fn new(max_tokens: u32, temperature: f64) -> Self {
        Self {
            max_tokens,
            temperature,
            presence_penalty: None,
            frequency_penalty: None,
        }
    }

    pub fn with_penalties(mut self, presence: f64, frequency: f64) -> Self {
        self.presence_penalty = Some(presence);
        self.frequency_penalty = Some(frequency);
        self
    }

    /// Clamp to the ranges the API accepts.
    fn clamped(self) -> Self {
        Self {
            max_tokens: self.max_tokens.clamp(1, MAX_TOKENS_CEILING),
            temperature: self.temperature.clamp(0.0, 2.0),
            presence_penalty: self.presence_penalty.map(|p| p.clamp(-2.0, 2.0)),
            frequency_penalty: self.frequency_penalty.map(|p| p.clamp(-2.0, 2.0)),
        }
    }
}

/// Seam between callers and the hosted completion endpoint.
pub trait ChatCompletion {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        params: SamplingParams,
    ) -> Result<String, Error>;
}

impl<T: ChatCompletion + Sync> ChatCompletion for std::sync::Arc<T> {
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        params: SamplingParams,
    ) -> Result<String, Error> {
        (**self).complete(system, messages, params).await
    }
}

#[derive(Serialize)]
struct ApiRequest {
    model: &'static str,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    stream: bool,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

impl Client {
    pub fn new(api_key: String, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self { api_key, base_url, http }
    }
}

impl ChatCompletion for Client {
    /// Run one completion. The persona system prompt is always the first
    /// message; no internal retries — the caller owns retry policy.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        params: SamplingParams,
    ) -> Result<String, Error> {
        let params = params.clamped();

        let mut api_messages = Vec::with_capacity(messages.len() + 1);
        api_messages.push(ApiMessage {
            role: "system",
            content: system.to_string(),
        });
        api_messages.extend(messages.iter().map(|m| ApiMessage {
            role: match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.content.clone(),
        }));

        let request = ApiRequest {
            model: MODEL,
            messages: api_messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api { status, body });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(Error::Empty)
    }
}

/// Upstream failure talking to the completion endpoint.
#[derive(Debug)]
pub enum Error {
    Http(String),
    Api { status: u16, body: String },
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api { status, body } => write!(f, "API error {status}: {body}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}

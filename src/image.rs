//! Image-generation client (prompt in, image URL out).
//!
//! Optional feature: constructed only when an image API key is configured;
//! everything else degrades gracefully without it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct ImageClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'static str,
    prompt: &'a str,
    n: u8,
    size: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    url: String,
}

impl ImageClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self { api_key, base_url, http }
    }

    /// Generate one image and return its hosted URL.
    pub async fn generate(&self, prompt: &str) -> Result<String, String> {
        info!("🎨 Generating image: {prompt}");

        let request = GenerateRequest {
            model: "dall-e-3",
            prompt,
            n: 1,
            size: "1024x1024",
        };

        let response = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("API error {status}: {body}"));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse response: {e}"))?;

        let url = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.url)
            .ok_or("No image in response")?;

        info!("🎨 Image ready: {url}");
        Ok(url)
    }
}

//! Microblogging client: OAuth 1.0a signed calls to the X API v2.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com";

/// OAuth 1.0a credential set for the posting account.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

/// Failure submitting a post.
#[derive(Debug)]
pub enum PostingError {
    Http(String),
    /// 401/403 — credentials rejected. The scheduler reloads credentials and
    /// retries once on this variant.
    Auth { status: u16, body: String },
    Api { status: u16, body: String },
    Parse(String),
}

impl PostingError {
    pub fn is_auth(&self) -> bool {
        matches!(self, PostingError::Auth { .. })
    }
}

impl std::fmt::Display for PostingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PostingError::Http(e) => write!(f, "HTTP error: {e}"),
            PostingError::Auth { status, body } => write!(f, "authorization failed ({status}): {body}"),
            PostingError::Api { status, body } => write!(f, "API error {status}: {body}"),
            PostingError::Parse(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for PostingError {}

/// Posting seam consumed by the scheduler.
pub trait PostingApi {
    /// Submit a post; returns the platform-assigned post id.
    async fn submit(&self, text: &str) -> Result<String, PostingError>;
    /// Re-read credentials from the environment. Returns false when the
    /// reload itself failed and the old credentials remain in place.
    fn reload_credentials(&mut self) -> bool;
}

pub struct XClient {
    creds: Credentials,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct TweetRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
}

impl XClient {
    pub fn new(creds: Credentials, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to build HTTP client");

        Self { creds, base_url, http }
    }

    fn auth_header(&self, method: &str, url: &str) -> String {
        oauth::authorization_header(&self.creds, method, url, &oauth::nonce(), Utc::now().timestamp())
    }

    /// Probe the credentials against `GET /2/users/me`.
    pub async fn verify_credentials(&self) -> Result<(), PostingError> {
        let url = format!("{}/2/users/me", self.base_url);
        let header = self.auth_header("GET", &url);

        let response = self
            .http
            .get(&url)
            .header("Authorization", header)
            .send()
            .await
            .map_err(|e| PostingError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), body))
    }
}

fn classify_status(status: u16, body: String) -> PostingError {
    if status == 401 || status == 403 {
        PostingError::Auth { status, body }
    } else {
        PostingError::Api { status, body }
    }
}

impl PostingApi for XClient {
    async fn submit(&self, text: &str) -> Result<String, PostingError> {
        let url = format!("{}/2/tweets", self.base_url);
        let header = self.auth_header("POST", &url);

        let response = self
            .http
            .post(&url)
            .header("Authorization", header)
            .json(&TweetRequest { text })
            .send()
            .await
            .map_err(|e| PostingError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let parsed: TweetResponse = response
            .json()
            .await
            .map_err(|e| PostingError::Parse(e.to_string()))?;

        info!("Posted to X: id {}", parsed.data.id);
        Ok(parsed.data.id)
    }

    fn reload_credentials(&mut self) -> bool {
        match crate::config::posting_credentials_from_env() {
            Ok(creds) => {
                info!("Reloaded posting credentials");
                self.creds = creds;
                true
            }
            Err(e) => {
                warn!("Credential reload failed: {e}");
                false
            }
        }
    }
}

/// OAuth 1.0a HMAC-SHA1 request signing.
///
/// JSON-body requests sign only the oauth_* protocol parameters; body content
/// is not part of the signature base.
mod oauth {
    use base64::Engine;
    use hmac::{Hmac, Mac};
    use rand::Rng;
    use rand::distributions::Alphanumeric;
    use sha1::Sha1;
    use urlencoding::encode;

    use super::Credentials;

    type HmacSha1 = Hmac<Sha1>;

    pub(super) fn nonce() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }

    pub(super) fn signature_base(method: &str, url: &str, params: &[(&str, &str)]) -> String {
        let mut encoded: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (encode(k).into_owned(), encode(v).into_owned()))
            .collect();
        encoded.sort();

        let param_string = encoded
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}&{}&{}", method.to_uppercase(), encode(url), encode(&param_string))
    }

    pub(super) fn sign(base: &str, consumer_secret: &str, token_secret: &str) -> String {
        let key = format!("{}&{}", encode(consumer_secret), encode(token_secret));
        let mut mac = HmacSha1::new_from_slice(key.as_bytes())
            .expect("HMAC-SHA1 accepts any key length");
        mac.update(base.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    pub(super) fn authorization_header(
        creds: &Credentials,
        method: &str,
        url: &str,
        nonce: &str,
        timestamp: i64,
    ) -> String {
        let timestamp = timestamp.to_string();
        let params = [
            ("oauth_consumer_key", creds.api_key.as_str()),
            ("oauth_nonce", nonce),
            ("oauth_signature_method", "HMAC-SHA1"),
            ("oauth_timestamp", timestamp.as_str()),
            ("oauth_token", creds.access_token.as_str()),
            ("oauth_version", "1.0"),
        ];

        let base = signature_base(method, url, &params);
        let signature = sign(&base, &creds.api_secret, &creds.access_secret);

        let mut fields: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, encode(v)))
            .collect();
        fields.push(format!("oauth_signature=\"{}\"", encode(&signature)));

        format!("OAuth {}", fields.join(", "))
    }

}

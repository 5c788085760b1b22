//! Remote AI classifier.
//!
//! Sends the window title and the candidate activity names to the Gemini
//! `generateContent` endpoint and reads back a category plus a confidence.
//! The client retries transient failures with exponential backoff, but the
//! whole exchange is bounded by the caller's timeout.

use crate::classify::types::{clamp_confidence, Activity, ActivityId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default Gemini endpoint.
pub const GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

/// Category the model is told to use when nothing fits.
pub const OTHER_CATEGORY: &str = "Other";

/// Remote classifier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    /// Hard deadline for one classification, retries included
    #[serde(with = "crate::config::duration_ms")]
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff delay; doubles on each retry
    #[serde(with = "crate::config::duration_ms")]
    pub backoff_base: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: GEMINI_ENDPOINT.to_string(),
            timeout: Duration::from_millis(3000),
            max_retries: 2,
            backoff_base: Duration::from_millis(250),
        }
    }
}

/// Remote classifier failures. None of these reach the decision engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote classifier timed out after {0:?}")]
    Timeout(Duration),
    #[error("remote transport error: {0}")]
    Transport(String),
    #[error("remote classifier rate limited")]
    RateLimited,
    #[error("remote server error ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("could not parse remote response: {0}")]
    Parse(String),
    #[error("remote returned an invalid confidence: {0}")]
    InvalidConfidence(String),
    #[error("no API credential configured")]
    MissingCredential,
}

impl RemoteError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Transport(_) | RemoteError::RateLimited | RemoteError::Status { .. }
        )
    }
}

/// What the remote service concluded for one title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteVerdict {
    pub activity_id: ActivityId,
    pub confidence: u8,
}

/// A network-backed classifier.
///
/// `Ok(None)` means the service answered but matched no known activity.
#[async_trait]
pub trait RemoteClassifier: Send + Sync {
    async fn classify(
        &self,
        title: &str,
        activities: &[Activity],
        timeout: Duration,
    ) -> Result<Option<RemoteVerdict>, RemoteError>;
}

/// Mask an API key for logs, keeping the first and last three characters.
pub fn redact(value: Option<&str>) -> String {
    match value {
        None | Some("") => "<none>".to_string(),
        Some(v) if v.chars().count() <= 6 => "***".to_string(),
        Some(v) => {
            let chars: Vec<char> = v.chars().collect();
            let head: String = chars[..3].iter().collect();
            let tail: String = chars[chars.len() - 3..].iter().collect();
            format!("{head}***{tail}")
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseCandidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// Build the classification prompt.
pub fn build_prompt(title: &str, activities: &[Activity]) -> String {
    let mut categories: Vec<&str> = activities.iter().map(|a| a.name.as_str()).collect();
    categories.push(OTHER_CATEGORY);
    format!(
        "Classify the following window title into one of the categories: [{}]. \
         If none fit, respond with {OTHER_CATEGORY}. \
         Return JSON with keys 'category' and 'confidence' (0-1). Title: '{}'.",
        categories.join(", "),
        title
    )
}

/// Interpret the model's text output.
///
/// The first `{...}` span is parsed as `{"category", "confidence"}`.
/// Output without such an object counts as "no match". Confidences in
/// `0..=1` are treated as fractions and scaled to percent.
pub fn parse_verdict(
    text: &str,
    activities: &[Activity],
) -> Result<Option<RemoteVerdict>, RemoteError> {
    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Ok(None);
    };
    if end < start {
        return Ok(None);
    }

    let object: serde_json::Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| RemoteError::Parse(e.to_string()))?;

    let category = object
        .get("category")
        .and_then(|v| v.as_str())
        .unwrap_or(OTHER_CATEGORY)
        .trim();
    if category.eq_ignore_ascii_case(OTHER_CATEGORY) {
        return Ok(None);
    }

    let raw_confidence = match object.get("confidence") {
        None | Some(serde_json::Value::Null) => 0.0,
        Some(value) => value
            .as_f64()
            .ok_or_else(|| RemoteError::InvalidConfidence(value.to_string()))?,
    };
    let scaled = if (0.0..=1.0).contains(&raw_confidence) {
        raw_confidence * 100.0
    } else {
        raw_confidence
    };
    let confidence = clamp_confidence(scaled)
        .ok_or_else(|| RemoteError::InvalidConfidence(raw_confidence.to_string()))?;

    let matched = activities
        .iter()
        .find(|a| a.name.trim().eq_ignore_ascii_case(category));
    Ok(matched.map(|activity| RemoteVerdict {
        activity_id: activity.id,
        confidence,
    }))
}

// ---------------------------------------------------------------------------
// Client

/// Gemini-backed [`RemoteClassifier`].
pub struct GeminiClassifier {
    config: RemoteConfig,
    api_key: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClassifier")
            .field("endpoint", &self.config.endpoint)
            .field("api_key", &redact(Some(&self.api_key)))
            .finish()
    }
}

impl GeminiClassifier {
    /// Create a client. Fails when the key is empty.
    pub fn new(config: RemoteConfig, api_key: impl Into<String>) -> Result<Self, RemoteError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RemoteError::MissingCredential);
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    async fn attempt(
        &self,
        body: &GenerateRequest,
        activities: &[Activity],
    ) -> Result<Option<RemoteVerdict>, RemoteError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteError::Timeout(self.config.timeout)
                } else {
                    RemoteError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(RemoteError::RateLimited);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.without_url().to_string()))?;

        let joined = parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("\n");

        parse_verdict(&joined, activities)
    }

    async fn classify_with_retries(
        &self,
        title: &str,
        activities: &[Activity],
    ) -> Result<Option<RemoteVerdict>, RemoteError> {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart {
                    text: build_prompt(title, activities),
                }],
            }],
        };

        let mut attempt: u32 = 0;
        loop {
            match self.attempt(&body, activities).await {
                Ok(verdict) => return Ok(verdict),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self
                        .config
                        .backoff_base
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    debug!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying remote classifier");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl RemoteClassifier for GeminiClassifier {
    async fn classify(
        &self,
        title: &str,
        activities: &[Activity],
        timeout: Duration,
    ) -> Result<Option<RemoteVerdict>, RemoteError> {
        match tokio::time::timeout(timeout, self.classify_with_retries(title, activities)).await {
            Ok(result) => {
                if let Err(err) = &result {
                    warn!(error = %err, "remote classifier failed");
                }
                result
            }
            Err(_) => Err(RemoteError::Timeout(timeout)),
        }
    }
}

//! Tutor client for OpenAI-compatible chat completion APIs.

use super::prompt::{SYSTEM_PROMPT, user_message};
use super::{TutorClient, TutorError, TutorResponse};
use crate::config::TutorConfig;
use crate::error::{LessonError, Result};
use crate::lesson::LessonContext;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Calls `{api_url}/v1/chat/completions` in JSON mode.
pub struct HttpTutorClient {
    config: TutorConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpTutorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTutorClient")
            .field("api_url", &self.config.api_url)
            .field("api_model", &self.config.api_model)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl HttpTutorClient {
    /// Creates a client. The API key is resolved once, here.
    ///
    /// # Errors
    ///
    /// Returns [`LessonError::Tutor`] if the HTTP client cannot be built.
    pub fn new(config: TutorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| LessonError::Tutor(format!("cannot build HTTP client: {e}")))?;
        let api_key = config.resolved_api_key();
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "no tutor API key configured");
        }
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.api_url.trim_end_matches('/')
        )
    }

    /// One round trip, with errors left for the caller to convert.
    ///
    /// # Errors
    ///
    /// Any [`TutorError`]; [`TutorError::MissingApiKey`] without touching the
    /// network.
    pub async fn request(
        &self,
        context: &LessonContext,
        input: &str,
    ) -> std::result::Result<TutorResponse, TutorError> {
        let api_key = self.api_key.as_deref().ok_or(TutorError::MissingApiKey)?;

        let body = json!({
            "model": self.config.api_model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_message(context, input)?},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "response_format": {"type": "json_object"},
        });

        debug!(model = %self.config.api_model, "requesting tutor response");
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| TutorError::from_request(format!("tutor request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(TutorError::from_http(
                status.as_u16(),
                extract_error_message(&body_text),
            ));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TutorError::Parse(format!("invalid completion body: {e}")))?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| TutorError::Parse("completion has no message content".into()))?;

        parse_tutor_json(content)
    }
}

#[async_trait]
impl TutorClient for HttpTutorClient {
    async fn get_response(&self, context: &LessonContext, input: &str) -> TutorResponse {
        match self.request(context, input).await {
            Ok(response) => {
                info!(
                    stage = ?response.rubric.as_ref().map(|r| r.stage),
                    actions = response.actions.len(),
                    "tutor responded"
                );
                response
            }
            Err(e) => {
                if e.is_rate_limited() {
                    warn!(error = %e, "tutor rate limited");
                } else {
                    error!(error = %e, code = e.code(), "tutor call failed");
                }
                TutorResponse::fallback_for(&e, context.stage)
            }
        }
    }
}

/// Removes a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parses model output into a [`TutorResponse`].
///
/// # Errors
///
/// Returns [`TutorError::Parse`] when the text is not a tutor response object.
pub fn parse_tutor_json(text: &str) -> std::result::Result<TutorResponse, TutorError> {
    serde_json::from_str(strip_json_fences(text))
        .map_err(|e| TutorError::Parse(format!("invalid tutor JSON: {e}")))
}

/// Pulls `error.message` out of an API error body, or returns the body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

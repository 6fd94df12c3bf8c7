//! Tutor call failures.
//!
//! These never reach the session: the client converts every error into a
//! fallback [`TutorResponse`](super::TutorResponse). They exist so the
//! conversion (and logging) can tell a rate limit apart from other failures.

/// Stable error codes, included in the Display output.
pub mod error_codes {
    pub const MISSING_API_KEY: &str = "MISSING_API_KEY";
    pub const RATE_LIMITED: &str = "RATE_LIMITED";
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";
    pub const HTTP_ERROR: &str = "HTTP_ERROR";
    pub const PARSE_FAILED: &str = "PARSE_FAILED";
}

/// Markers in error text that indicate quota or rate exhaustion.
const RATE_LIMIT_MARKERS: &[&str] = &["429", "quota", "resource_exhausted", "rate limit"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TutorError {
    /// No API key configured; no request was made.
    #[error("[{}] no API key configured", error_codes::MISSING_API_KEY)]
    MissingApiKey,

    #[error("[{}] {}", error_codes::RATE_LIMITED, .0)]
    RateLimited(String),

    /// Transport-level failure (connect, timeout, body read).
    #[error("[{}] {}", error_codes::REQUEST_FAILED, .0)]
    Request(String),

    #[error("[{}] HTTP {status}: {message}", error_codes::HTTP_ERROR)]
    Http { status: u16, message: String },

    /// The model's reply was not a valid tutor response.
    #[error("[{}] {}", error_codes::PARSE_FAILED, .0)]
    Parse(String),
}

impl TutorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingApiKey => error_codes::MISSING_API_KEY,
            Self::RateLimited(_) => error_codes::RATE_LIMITED,
            Self::Request(_) => error_codes::REQUEST_FAILED,
            Self::Http { .. } => error_codes::HTTP_ERROR,
            Self::Parse(_) => error_codes::PARSE_FAILED,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    /// Maps a non-success HTTP status and its body.
    pub fn from_http(status: u16, message: String) -> Self {
        if status == 429 || mentions_rate_limit(&message) {
            Self::RateLimited(message)
        } else {
            Self::Http { status, message }
        }
    }

    /// Maps a transport failure.
    pub fn from_request(message: String) -> Self {
        if mentions_rate_limit(&message) {
            Self::RateLimited(message)
        } else {
            Self::Request(message)
        }
    }
}

/// Whether error text carries a quota or rate-limit marker.
pub fn mentions_rate_limit(text: &str) -> bool {
    let lower = text.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

//! The tutor persona: an LLM that answers with a structured [`TutorResponse`].

pub mod client;
pub mod error;
pub mod prompt;
pub mod response;

pub use client::HttpTutorClient;
pub use error::TutorError;
pub use response::{ActionKind, Rubric, TutorAction, TutorResponse};

use crate::lesson::LessonContext;
use async_trait::async_trait;

/// Produces tutor replies.
///
/// Implementations never fail: any error becomes a fallback response that
/// explains the problem to the learner.
#[async_trait]
pub trait TutorClient: Send + Sync {
    async fn get_response(&self, context: &LessonContext, input: &str) -> TutorResponse;
}

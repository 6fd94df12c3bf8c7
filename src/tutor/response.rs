//! Structured tutor replies and the fallbacks used when a call fails.

use super::TutorError;
use crate::lesson::Stage;
use serde::{Deserialize, Serialize};

/// Speech text of the static greeting shown before any tutor reply exists.
/// Never spoken.
pub const PLACEHOLDER_SPEECH: &str = "Hey there! I'm Pyvidhya, your personal Python guide! I'm so excited to start this journey with you. Let's get started!";

/// One tutor reply (camelCase on the wire).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TutorResponse {
    /// Text for the screen.
    pub reading_content: String,
    /// Plain text for speech synthesis.
    pub speaking_content: String,
    pub actions: Vec<TutorAction>,
    pub checklist: Vec<String>,
    /// Absent when the model left it out; the lesson stage then stays put.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rubric: Option<Rubric>,
    pub next_step: NextStep,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rubric {
    pub stage: Stage,
    pub success_criteria: Vec<String>,
    pub common_mistakes: Vec<CommonMistake>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonMistake {
    pub pattern: String,
    pub fix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NextStep {
    pub label: String,
    pub reason: String,
}

/// A suggested UI action, e.g. `{"type": "awardCoins", "payload": {"coins": 10}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorAction {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Known action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    AdvanceStage,
    AwardCoins,
    OfferHint,
    NudgeRunCode,
    Celebrate,
    DiagnoseError,
    AskCheckin,
    Unknown,
}

impl TutorAction {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self.kind.as_str() {
            "advanceStage" => ActionKind::AdvanceStage,
            "awardCoins" => ActionKind::AwardCoins,
            "offerHint" => ActionKind::OfferHint,
            "nudgeRunCode" => ActionKind::NudgeRunCode,
            "celebrate" => ActionKind::Celebrate,
            "diagnoseError" => ActionKind::DiagnoseError,
            "askCheckin" => ActionKind::AskCheckin,
            _ => ActionKind::Unknown,
        }
    }

    /// `payload.coins` as a non-negative count; 0 when absent or malformed.
    pub fn coins(&self) -> u64 {
        self.payload
            .get("coins")
            .and_then(|c| c.as_u64().or_else(|| c.as_f64().map(|f| f.max(0.0) as u64)))
            .unwrap_or(0)
    }

    /// `payload.message` or `payload.reason`, when present.
    pub fn message(&self) -> Option<&str> {
        self.payload
            .get("message")
            .or_else(|| self.payload.get("reason"))
            .and_then(|m| m.as_str())
    }
}

impl TutorResponse {
    /// The static greeting displayed at startup.
    pub fn placeholder() -> Self {
        Self {
            reading_content: "🚀 Hey there! I'm Pyvidhya, your personal Python guide!\n\n\
                              Our first lesson is all about variables. Think of them as little \
                              labeled boxes where you can store information.\n\n\
                              Let's get started! Edit the code and run it."
                .to_owned(),
            speaking_content: PLACEHOLDER_SPEECH.to_owned(),
            actions: Vec::new(),
            checklist: Vec::new(),
            rubric: Some(Rubric {
                stage: Stage::Discover,
                success_criteria: vec![
                    "Type `name = 'Your Name'` in the editor".to_owned(),
                    "Type `print(name)` on the next line".to_owned(),
                    "Run the code and see your name in the output!".to_owned(),
                ],
                common_mistakes: Vec::new(),
            }),
            next_step: NextStep {
                label: "Write your first line of code.".to_owned(),
                reason: "This is the first step to storing and displaying information in Python."
                    .to_owned(),
            },
        }
    }

    /// Reply used when no API key is configured.
    pub fn missing_api_key(stage: Stage) -> Self {
        Self {
            reading_content: "⚠️ API key missing! I can't connect to my brain without an API key. \
                              Set `tutor.api_key` in the config file or the PYVIDHYA_API_KEY \
                              environment variable."
                .to_owned(),
            speaking_content: "Oh no! I'm missing my API key. Please ask the developer to set it \
                               up so I can help you learn."
                .to_owned(),
            rubric: Some(Rubric {
                stage,
                success_criteria: vec!["Resolve API key issue.".to_owned()],
                common_mistakes: Vec::new(),
            }),
            next_step: NextStep {
                label: "Configure API key".to_owned(),
                reason: "The tutor service cannot be reached without an API key.".to_owned(),
            },
            ..Self::default()
        }
    }

    /// Reply used when the tutor service is rate limiting us.
    pub fn rate_limited(stage: Stage) -> Self {
        Self {
            reading_content: "⏳ I'm getting a lot of questions right now and need a short \
                              breather. Please wait a moment and try again."
                .to_owned(),
            speaking_content: "I need a short breather. Let's wait a moment and try again."
                .to_owned(),
            rubric: Some(Rubric {
                stage,
                ..Rubric::default()
            }),
            next_step: NextStep {
                label: "Wait a moment, then try again".to_owned(),
                reason: "The tutor service is temporarily rate limited.".to_owned(),
            },
            ..Self::default()
        }
    }

    /// Reply used for any other failure.
    pub fn failure(stage: Stage) -> Self {
        Self {
            reading_content: "⚠️ I'm having trouble thinking right now. It might be my connection \
                              or the reply format. Check the logs for details."
                .to_owned(),
            speaking_content: "Oh no, I'm having trouble thinking right now. Please check the \
                               logs for error details."
                .to_owned(),
            rubric: Some(Rubric {
                stage,
                ..Rubric::default()
            }),
            next_step: NextStep {
                label: "Check the logs for errors".to_owned(),
                reason: "The tutor call or its reply could not be processed.".to_owned(),
            },
            ..Self::default()
        }
    }

    /// The user-visible fallback for `error`, keeping the learner at `stage`.
    pub fn fallback_for(error: &TutorError, stage: Stage) -> Self {
        match error {
            TutorError::MissingApiKey => Self::missing_api_key(stage),
            TutorError::RateLimited(_) => Self::rate_limited(stage),
            _ => Self::failure(stage),
        }
    }
}

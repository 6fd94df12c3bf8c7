//! Spoken tutor output.
//!
//! Tutor replies are spoken one at a time through a [`SpeechQueue`], which
//! drives a [`Speaker`] over a pluggable [`SynthesisEngine`]:
//!
//! ```text
//! enqueue → SpeechQueue (FIFO + gates + playback lock) → Speaker (voice selection) → engine
//!                 ↑                                                                    │
//!                 └──────────────── EngineEvent (started / ended / failed) ────────────┘
//! ```
//!
//! Engines start playback synchronously and report progress asynchronously
//! as [`EngineEvent`]s, which the owner of the queue feeds back through
//! [`SpeechQueue::handle_engine_event`].

pub mod catalog;
pub mod engine;
pub mod queue;
pub mod speaker;
pub mod voice;

pub use catalog::VoiceCatalog;
pub use engine::CommandEngine;
pub use queue::{SpeechEvent, SpeechQueue};
pub use speaker::{SpeakOptions, Speaker, SpeakerEvent};

use std::fmt;

/// Gender attribute reported by a platform, when it reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceGender {
    Female,
    Male,
}

/// A synthesis voice offered by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// Engine-specific identifier passed back when speaking.
    pub id: String,
    /// Display name (used by the gender heuristic).
    pub name: String,
    /// Language tag as reported by the platform (e.g. `en_US`, `ta-IN`).
    pub language: String,
    /// Platform gender attribute, if any.
    pub gender: Option<VoiceGender>,
}

impl Voice {
    /// Creates a voice whose id is its display name.
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            language: language.into(),
            gender: None,
        }
    }

    /// Sets the platform gender attribute.
    pub fn with_gender(mut self, gender: VoiceGender) -> Self {
        self.gender = Some(gender);
        self
    }
}

/// One request to speak text in a language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub language_tag: String,
}

impl Utterance {
    pub fn new(text: impl Into<String>, language_tag: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language_tag: language_tag.into(),
        }
    }
}

/// Identifier of one started synthesis call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UtteranceId(pub u64);

impl fmt::Display for UtteranceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "utt-{}", self.0)
    }
}

/// Synchronous reasons a speak call did not start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeakError {
    /// Nothing to say.
    #[error("empty text")]
    EmptyText,
    /// The voice catalog has not been populated yet.
    #[error("voices not loaded yet")]
    NotReady,
    /// No voice matches the requested language.
    #[error("no voice found for language {language}")]
    VoiceNotFound { language: String },
    /// The engine refused to start.
    #[error("engine failed to start: {0}")]
    Engine(String),
}

impl SpeakError {
    /// Stable machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::EmptyText => "empty-text",
            Self::NotReady => "not-ready",
            Self::VoiceNotFound { .. } => "voice-not-found",
            Self::Engine(_) => "engine",
        }
    }
}

/// Asynchronous engine-level failure of a started utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechFailure {
    /// Playback was cancelled on purpose. Not an error for reporting.
    Interrupted,
    /// Synthesis or playback failed.
    Synthesis(String),
}

impl fmt::Display for SpeechFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => f.write_str("interrupted"),
            Self::Synthesis(msg) => write!(f, "synthesis failed: {msg}"),
        }
    }
}

/// Everything an engine needs to speak one utterance.
#[derive(Debug, Clone)]
pub struct EngineUtterance {
    pub id: UtteranceId,
    pub text: String,
    pub voice: Voice,
    /// Language of the selected voice.
    pub language_tag: String,
    /// Rate multiplier (1.0 = engine default).
    pub rate: f32,
    /// Pitch multiplier (1.0 = engine default).
    pub pitch: f32,
}

/// Progress notification from an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Audio has actually begun.
    Started { id: UtteranceId },
    /// Playback completed naturally.
    Ended { id: UtteranceId },
    /// Playback failed or was interrupted.
    Failed {
        id: UtteranceId,
        failure: SpeechFailure,
    },
}

impl EngineEvent {
    pub fn id(&self) -> UtteranceId {
        match self {
            Self::Started { id } | Self::Ended { id } | Self::Failed { id, .. } => *id,
        }
    }
}

/// A platform speech synthesizer.
///
/// `speak` must return promptly; progress is reported later as
/// [`EngineEvent`]s carrying the utterance id. `cancel` stops whatever is
/// playing and must be safe to call when nothing is.
pub trait SynthesisEngine: Send {
    /// Starts speaking.
    ///
    /// # Errors
    ///
    /// Returns a message when playback could not be started at all.
    fn speak(&mut self, utterance: EngineUtterance) -> std::result::Result<(), String>;

    /// Stops the in-flight utterance, if any.
    fn cancel(&mut self);
}

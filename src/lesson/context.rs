//! The lesson context and its reducer.
//!
//! The context is a plain value. Every change goes through [`reduce`], which
//! takes the latest context and one [`ContextEvent`] and returns the next
//! context; the previous value is never mutated in place. The serialized form
//! (camelCase) is the snapshot sent to the tutor model.

use super::curriculum::{Curriculum, CurriculumSlice, EpisodeEntry, NavHints, Position};
use super::stage::Stage;
use crate::config::LessonConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of recent run errors kept.
pub const MAX_RECENT_ERRORS: usize = 5;

/// Editor contents used when an episode has no discover code sample.
pub const DEFAULT_EDITOR_CODE: &str = "# Let's start coding!";

const FIRST_LESSON_HISTORY: &str = "The user has just started the first lesson.";
const NEW_LESSON_HISTORY: &str = "The user has just started a new lesson.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonContext {
    pub chapter_index: usize,
    pub episode_index: usize,
    pub stage: Stage,
    pub chapter_title: String,
    pub episode_title: String,
    pub objectives: Vec<String>,
    pub editor_code: String,
    /// Milliseconds the editor has held an unrun edit; 0 when clean.
    pub editor_dirty_since_ms: u64,
    pub last_run: LastRun,
    pub recent_errors: Vec<RecentError>,
    pub attempts: u32,
    pub time_on_episode_sec: u64,
    pub hints_used: u32,
    pub chat_turns: u32,
    /// Rolling tail of the conversation, bounded in characters.
    pub history_short: String,
    pub progress: Progress,
    pub user_signals: UserSignals,
    pub ui: UiState,
    pub curriculum_slice: CurriculumSlice,
    pub nav_hints: NavHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRun {
    pub timestamp: Option<DateTime<Utc>>,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub duration_ms: u64,
}

impl Default for LastRun {
    fn default() -> Self {
        Self {
            timestamp: None,
            stdout: String::new(),
            stderr: String::new(),
            success: true,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentError {
    pub message: String,
    pub line: u32,
    pub col: u32,
    /// The attempt number that produced the error (1-based).
    pub attempt_index: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub coins: u64,
    pub streak_days: u32,
    pub achievements: Vec<String>,
    /// chapter → episode → completed stages.
    pub completed: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engagement {
    Low,
    Medium,
    #[default]
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSignals {
    pub inactive_for_sec: u64,
    pub frustration: bool,
    pub engagement: Engagement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub chat_collapsed: bool,
    pub tts_enabled: bool,
    pub stt_enabled: bool,
    pub female_voice_preferred: bool,
    pub language: String,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            chat_collapsed: false,
            tts_enabled: true,
            stt_enabled: false,
            female_voice_preferred: true,
            language: "en-US".to_owned(),
        }
    }
}

/// Something that happened to the lesson.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    /// The learner moved to another episode.
    EnteredEpisode(EpisodeEntry),
    /// A tutor turn is starting for `input`.
    TutorTurnStarted {
        input: String,
        history_max_chars: usize,
    },
    /// The tutor's rubric names `stage` with these success criteria, in
    /// reply to a turn sent while the lesson was at `sent_at`. Only a stage
    /// that differs from `sent_at` is adopted, so a reply that echoes the
    /// old stage cannot undo an advance made while it was in flight.
    TutorRubric {
        stage: Stage,
        sent_at: Stage,
        success_criteria: Vec<String>,
    },
    /// The stage moved without a new rubric (an `advanceStage` action).
    StageAdvanced(Stage),
    CodeEdited(String),
    /// An edit has gone unrun for `dirty_ms`.
    EditorIdle { dirty_ms: u64 },
    RunCompleted(LastRun),
    /// One second passed.
    Tick,
    /// Any learner activity.
    Activity,
    CoinsAwarded(u64),
    HintUsed,
    LanguageChanged(String),
    ChatPanelToggled,
    TtsToggled(bool),
    /// The microphone was switched on or off.
    SttToggled(bool),
    FemaleVoicePreferred(bool),
}

impl LessonContext {
    /// Context for the first episode of `curriculum`, with UI preferences
    /// taken from `config`.
    pub fn initial(curriculum: &Curriculum, config: &LessonConfig) -> Self {
        let position = Position::default();
        let mut context = Self {
            chapter_index: 0,
            episode_index: 0,
            stage: Stage::Discover,
            chapter_title: "Unknown Chapter".to_owned(),
            episode_title: "Unknown Episode".to_owned(),
            objectives: Vec::new(),
            editor_code: DEFAULT_EDITOR_CODE.to_owned(),
            editor_dirty_since_ms: 0,
            last_run: LastRun::default(),
            recent_errors: Vec::new(),
            attempts: 0,
            time_on_episode_sec: 0,
            hints_used: 0,
            chat_turns: 0,
            history_short: FIRST_LESSON_HISTORY.to_owned(),
            progress: Progress::default(),
            user_signals: UserSignals::default(),
            ui: UiState {
                tts_enabled: config.tts.enabled,
                female_voice_preferred: config.tts.female_voice_preferred,
                language: config.tts.language.clone(),
                ..UiState::default()
            },
            curriculum_slice: CurriculumSlice::default(),
            nav_hints: curriculum.nav_hints(position, Stage::Discover),
        };
        if let Some(entry) = curriculum.entry(position) {
            context.enter(entry);
            context.history_short = FIRST_LESSON_HISTORY.to_owned();
        }
        context
    }

    pub fn position(&self) -> Position {
        Position::new(self.chapter_index, self.episode_index)
    }

    fn enter(&mut self, entry: EpisodeEntry) {
        self.chapter_index = entry.position.chapter;
        self.episode_index = entry.position.episode;
        self.chapter_title = entry.chapter_title;
        self.episode_title = entry.episode_title;
        self.stage = Stage::Discover;
        self.editor_code = entry
            .slice
            .stage_content
            .discover
            .as_ref()
            .map(|d| d.code_sample.clone())
            .filter(|code| !code.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_EDITOR_CODE.to_owned());
        self.curriculum_slice = entry.slice;
        self.nav_hints = entry.nav_hints;
        self.objectives.clear();
        self.editor_dirty_since_ms = 0;
        self.last_run = LastRun::default();
        self.recent_errors.clear();
        self.attempts = 0;
        self.time_on_episode_sec = 0;
        self.hints_used = 0;
        self.chat_turns = 0;
        self.history_short = NEW_LESSON_HISTORY.to_owned();
    }

    fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
        self.nav_hints = self.nav_hints.with_stage(stage);
    }
}

/// Keeps the last `max_chars` characters of `text`.
fn keep_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_owned();
    }
    text.chars().skip(count - max_chars).collect()
}

/// Applies `event` to `prev`, returning the next context.
pub fn reduce(prev: &LessonContext, event: ContextEvent) -> LessonContext {
    let mut next = prev.clone();
    match event {
        ContextEvent::EnteredEpisode(entry) => next.enter(entry),
        ContextEvent::TutorTurnStarted {
            input,
            history_max_chars,
        } => {
            next.chat_turns += 1;
            let history = format!("{}\nUser: {input}", prev.history_short);
            next.history_short = keep_tail(&history, history_max_chars);
        }
        ContextEvent::TutorRubric {
            stage,
            sent_at,
            success_criteria,
        } => {
            if stage != sent_at {
                next.set_stage(stage);
                next.objectives = success_criteria;
            }
        }
        ContextEvent::StageAdvanced(stage) => next.set_stage(stage),
        ContextEvent::CodeEdited(code) => {
            next.editor_code = code;
            next.editor_dirty_since_ms = 0;
            next.user_signals.inactive_for_sec = 0;
        }
        ContextEvent::EditorIdle { dirty_ms } => next.editor_dirty_since_ms = dirty_ms,
        ContextEvent::RunCompleted(run) => {
            next.attempts += 1;
            if !run.success {
                next.recent_errors.push(RecentError {
                    message: run.stderr.clone(),
                    line: 0,
                    col: 0,
                    attempt_index: next.attempts,
                });
                let overflow = next.recent_errors.len().saturating_sub(MAX_RECENT_ERRORS);
                next.recent_errors.drain(..overflow);
            }
            next.last_run = run;
            next.editor_dirty_since_ms = 0;
        }
        ContextEvent::Tick => {
            next.user_signals.inactive_for_sec += 1;
            next.time_on_episode_sec += 1;
        }
        ContextEvent::Activity => next.user_signals.inactive_for_sec = 0,
        ContextEvent::CoinsAwarded(coins) => {
            next.progress.coins = next.progress.coins.saturating_add(coins);
        }
        ContextEvent::HintUsed => next.hints_used += 1,
        ContextEvent::LanguageChanged(language) => next.ui.language = language,
        ContextEvent::ChatPanelToggled => next.ui.chat_collapsed = !prev.ui.chat_collapsed,
        ContextEvent::TtsToggled(enabled) => next.ui.tts_enabled = enabled,
        ContextEvent::SttToggled(enabled) => next.ui.stt_enabled = enabled,
        ContextEvent::FemaleVoicePreferred(preferred) => {
            next.ui.female_voice_preferred = preferred;
        }
    }
    next
}

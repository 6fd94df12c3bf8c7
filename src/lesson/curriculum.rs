//! Chapters, episodes and the content of each learning stage.
//!
//! Curricula are JSON documents (camelCase keys). A Python Foundations course
//! is compiled into the binary; a different file can be configured.

use super::stage::Stage;
use crate::config::CurriculumConfig;
use crate::error::{LessonError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const BUILTIN_CURRICULUM: &str = include_str!("../../curriculum/python.json");

/// An ordered list of chapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Curriculum {
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Chapter {
    pub title: String,
    pub episodes: Vec<Episode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Episode {
    pub title: String,
    pub stage_content: StageContent,
    pub practice_blanks: Vec<String>,
    pub tests: Vec<TestCase>,
}

/// Per-stage teaching material. Any stage may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discover: Option<DiscoverContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explore: Option<ExploreContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub practice: Option<PracticeContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<MasterContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoverContent {
    pub title: String,
    pub analogy: String,
    pub code_sample: String,
    pub micro_quiz: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExploreContent {
    pub demo_code: String,
    pub experiment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PracticeContent {
    pub template: String,
    pub expected_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplyContent {
    pub challenge: String,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MasterContent {
    pub assessment: String,
    pub criteria: Vec<String>,
}

/// One output check: every non-empty string in `expect` must appear in stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestCase {
    pub name: String,
    pub expect: Vec<String>,
}

/// The episode material carried in the lesson context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CurriculumSlice {
    pub stage_content: StageContent,
    pub practice_blanks: Vec<String>,
    pub tests: Vec<TestCase>,
}

/// Chapter and episode indices, both zero-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub chapter: usize,
    pub episode: usize,
}

impl Position {
    pub fn new(chapter: usize, episode: usize) -> Self {
        Self { chapter, episode }
    }
}

/// Which navigation moves are available from the current place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavHints {
    pub has_prev_stage: bool,
    pub has_next_stage: bool,
    pub has_prev_episode: bool,
    pub has_next_episode: bool,
}

impl NavHints {
    /// Recomputes the stage hints, leaving the episode hints alone.
    pub fn with_stage(self, stage: Stage) -> Self {
        Self {
            has_prev_stage: stage.prev().is_some(),
            has_next_stage: stage.next().is_some(),
            ..self
        }
    }
}

/// Everything the lesson context needs about a freshly entered episode.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeEntry {
    pub position: Position,
    pub chapter_title: String,
    pub episode_title: String,
    pub slice: CurriculumSlice,
    pub nav_hints: NavHints,
}

impl Curriculum {
    /// The built-in Python Foundations course.
    ///
    /// # Errors
    ///
    /// Returns [`LessonError::Curriculum`] if the embedded data is malformed.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CURRICULUM)
    }

    /// Parses and validates a curriculum document.
    ///
    /// # Errors
    ///
    /// Returns [`LessonError::Curriculum`] for invalid JSON, no chapters, or a
    /// chapter without episodes.
    pub fn from_json(json: &str) -> Result<Self> {
        let curriculum: Self =
            serde_json::from_str(json).map_err(|e| LessonError::Curriculum(e.to_string()))?;
        if curriculum.chapters.is_empty() {
            return Err(LessonError::Curriculum("curriculum has no chapters".into()));
        }
        if let Some(empty) = curriculum.chapters.iter().find(|c| c.episodes.is_empty()) {
            return Err(LessonError::Curriculum(format!(
                "chapter \"{}\" has no episodes",
                empty.title
            )));
        }
        Ok(curriculum)
    }

    /// Loads a curriculum file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid curriculum.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Loads the configured curriculum, or the built-in one.
    ///
    /// # Errors
    ///
    /// Propagates [`Curriculum::from_file`] / [`Curriculum::builtin`] errors.
    pub fn load(config: &CurriculumConfig) -> Result<Self> {
        let curriculum = match &config.path {
            Some(path) => Self::from_file(path)?,
            None => Self::builtin()?,
        };
        info!(
            chapters = curriculum.chapters.len(),
            episodes = curriculum.episode_count(),
            "curriculum loaded"
        );
        Ok(curriculum)
    }

    pub fn episode_count(&self) -> usize {
        self.chapters.iter().map(|c| c.episodes.len()).sum()
    }

    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }

    pub fn episode(&self, position: Position) -> Option<&Episode> {
        self.chapter(position.chapter)?.episodes.get(position.episode)
    }

    /// Episode material at `position`; empty when the episode does not exist.
    pub fn slice(&self, position: Position) -> CurriculumSlice {
        self.episode(position)
            .map(|episode| CurriculumSlice {
                stage_content: episode.stage_content.clone(),
                practice_blanks: episode.practice_blanks.clone(),
                tests: episode.tests.clone(),
            })
            .unwrap_or_default()
    }

    /// The episode after `position`, crossing into the next chapter.
    pub fn next_position(&self, position: Position) -> Option<Position> {
        let chapter = self.chapter(position.chapter)?;
        if position.episode + 1 < chapter.episodes.len() {
            return Some(Position::new(position.chapter, position.episode + 1));
        }
        self.chapter(position.chapter + 1)
            .filter(|next| !next.episodes.is_empty())
            .map(|_| Position::new(position.chapter + 1, 0))
    }

    /// The episode before `position`, crossing into the previous chapter's
    /// last episode.
    pub fn prev_position(&self, position: Position) -> Option<Position> {
        self.chapter(position.chapter)?;
        if position.episode > 0 {
            return Some(Position::new(position.chapter, position.episode - 1));
        }
        let prev_chapter = position.chapter.checked_sub(1)?;
        let last = self.chapter(prev_chapter)?.episodes.len().checked_sub(1)?;
        Some(Position::new(prev_chapter, last))
    }

    pub fn nav_hints(&self, position: Position, stage: Stage) -> NavHints {
        NavHints {
            has_prev_episode: self.prev_position(position).is_some(),
            has_next_episode: self.next_position(position).is_some(),
            ..NavHints::default()
        }
        .with_stage(stage)
    }

    /// Context data for entering the episode at `position` (at its first stage).
    pub fn entry(&self, position: Position) -> Option<EpisodeEntry> {
        let chapter = self.chapter(position.chapter)?;
        let episode = chapter.episodes.get(position.episode)?;
        Some(EpisodeEntry {
            position,
            chapter_title: chapter.title.clone(),
            episode_title: episode.title.clone(),
            slice: self.slice(position),
            nav_hints: self.nav_hints(position, Stage::Discover),
        })
    }
}

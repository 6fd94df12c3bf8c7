//! Configuration types for the lesson engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LessonConfig {
    /// Spoken output settings.
    pub tts: TtsConfig,
    /// Spoken input settings.
    pub stt: SttConfig,
    /// Tutor model settings.
    pub tutor: TutorConfig,
    /// Code runner settings.
    pub runner: RunnerConfig,
    /// Inactivity and edit-nudge timing.
    pub inactivity: InactivityConfig,
    /// Curriculum source.
    pub curriculum: CurriculumConfig,
}

/// Spoken output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Whether tutor replies are spoken aloud.
    pub enabled: bool,
    /// BCP-47 style language tag used for new utterances (e.g. `en-US`, `ta-IN`).
    pub language: String,
    /// Prefer voices classified as female when several match the language.
    pub female_voice_preferred: bool,
    /// Speaking rate multiplier (1.0 = engine default).
    ///
    /// The tutor persona speaks slightly slower than natural.
    pub rate: f32,
    /// Pitch multiplier (1.0 = engine default).
    pub pitch: f32,
    /// Synthesis program used by the command engine.
    pub engine_command: String,
    /// Text that is never spoken (the static greeting shown before any
    /// tutor reply exists).
    pub placeholder_text: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: "en-US".to_owned(),
            female_voice_preferred: true,
            rate: 0.9,
            pitch: 1.2,
            engine_command: "espeak-ng".to_owned(),
            placeholder_text: crate::tutor::response::PLACEHOLDER_SPEECH.to_owned(),
        }
    }
}

/// Spoken input configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Transcriber program that prints one transcript per line on stdout.
    /// Empty disables speech input.
    pub command: String,
    /// Arguments for `command`; `{language}` is replaced by the lesson
    /// language when listening starts.
    pub args: Vec<String>,
}

/// Tutor model configuration (OpenAI-compatible chat completions API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TutorConfig {
    /// Base URL of the API server.
    pub api_url: String,
    /// Model name to request.
    pub api_model: String,
    /// API key. Leave empty to read it from `api_key_env`.
    pub api_key: String,
    /// Environment variable consulted when `api_key` is empty.
    pub api_key_env: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens to generate per reply.
    pub max_tokens: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum characters of short conversation history kept in the context.
    pub history_max_chars: usize,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com".to_owned(),
            api_model: "gpt-4o-mini".to_owned(),
            api_key: String::new(),
            api_key_env: "PYVIDHYA_API_KEY".to_owned(),
            temperature: 0.7,
            max_tokens: 1024,
            timeout_secs: 60,
            history_max_chars: 1_000,
        }
    }
}

impl TutorConfig {
    /// Returns the configured API key, falling back to the environment.
    pub fn resolved_api_key(&self) -> Option<String> {
        let direct = self.api_key.trim();
        if !direct.is_empty() {
            return Some(direct.to_owned());
        }
        if self.api_key_env.trim().is_empty() {
            return None;
        }
        std::env::var(self.api_key_env.trim())
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }
}

/// Python code runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Python interpreter executable.
    pub python: String,
    /// Maximum wall-clock seconds for a single run.
    pub timeout_secs: u64,
    /// Maximum bytes kept from each of stdout and stderr.
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_owned(),
            timeout_secs: 10,
            max_output_bytes: 64 * 1024,
        }
    }
}

/// Inactivity thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InactivityConfig {
    /// Seconds of inactivity before the tutor gently checks in.
    pub check_in_secs: u64,
    /// Seconds of inactivity before the tutor offers a hint.
    pub hint_secs: u64,
    /// Milliseconds after an unrun edit before the tutor nudges a run.
    pub edit_nudge_ms: u64,
}

impl Default for InactivityConfig {
    fn default() -> Self {
        Self {
            check_in_secs: 30,
            hint_secs: 120,
            edit_nudge_ms: 2_500,
        }
    }
}

/// Curriculum source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CurriculumConfig {
    /// JSON curriculum file. `None` uses the built-in Python Foundations course.
    pub path: Option<PathBuf>,
}

impl LessonConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::LessonError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::LessonError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/pyvidhya/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("pyvidhya").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("pyvidhya")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/pyvidhya-config/config.toml")
        }
    }
}

//! Error types for the lesson engine.

/// Top-level error type for the lesson engine.
#[derive(Debug, thiserror::Error)]
pub enum LessonError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Curriculum data could not be loaded or is malformed.
    #[error("curriculum error: {0}")]
    Curriculum(String),

    /// Tutor model call error.
    #[error("tutor error: {0}")]
    Tutor(String),

    /// Code runner error.
    #[error("runner error: {0}")]
    Runner(String),

    /// Speech engine error.
    #[error("speech error: {0}")]
    Speech(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, LessonError>;

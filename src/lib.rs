//! Pyvidhya: an AI-tutored Python lesson player.
//!
//! A learner works through a curriculum of short episodes, each taught in
//! five stages. A tutor model sees a snapshot of the lesson after every
//! meaningful event and answers with structured replies that are shown and
//! spoken aloud:
//!
//! ```text
//! learner ─► LessonSession ─► reduce(LessonContext) ─► TutorClient ─► SpeechQueue ─► engine
//!                │                                                        ▲
//!                └──────────► CodeRunner (python) ── run result ──────────┘
//! ```
//!
//! # Architecture
//!
//! - **lesson**: curriculum, stages, the context reducer and inactivity timing
//! - **tutor**: chat completion client, prompt and structured responses
//! - **tts**: voice catalog and selection, speaker and the speech queue
//! - **runner**: sandboxed Python execution
//! - **stt**: spoken learner input, dictated into tutor messages
//! - **session**: the coordinator and its tokio driver

pub mod config;
pub mod error;
pub mod lesson;
pub mod runner;
pub mod session;
pub mod stt;
pub mod tts;
pub mod tutor;

pub use config::LessonConfig;
pub use error::{LessonError, Result};
pub use lesson::{Curriculum, LessonContext, Stage};
pub use runner::{CodeRunner, PythonRunner, RunResult};
pub use session::driver::{SessionDriver, SessionInputs};
pub use session::{Command, Direction, Effect, LessonSession, SessionEvent};
pub use stt::SpeechRecognizer;
pub use tts::{SpeechQueue, SynthesisEngine};
pub use tutor::{HttpTutorClient, TutorClient, TutorResponse};

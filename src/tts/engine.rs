//! Speech engine backed by an external synthesizer process (espeak-ng).
//!
//! Each utterance spawns one synthesizer process that plays straight to the
//! default audio device. Start is reported once the process is spawned and
//! end when it exits; cancelling kills the process and reports
//! [`SpeechFailure::Interrupted`].

use super::{EngineEvent, EngineUtterance, SpeechFailure, SynthesisEngine, Voice, VoiceGender};
use crate::config::TtsConfig;
use crate::error::{LessonError, Result};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// espeak-ng speaks at this many words per minute at rate 1.0.
const BASE_WORDS_PER_MINUTE: f32 = 175.0;
/// espeak-ng pitch at multiplier 1.0 (range 0-99).
const BASE_PITCH: f32 = 50.0;

/// Synthesis engine that shells out to a command-line synthesizer.
///
/// Must be used from within a tokio runtime.
pub struct CommandEngine {
    program: String,
    events: mpsc::UnboundedSender<EngineEvent>,
    current: Option<CancellationToken>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            program: program.into(),
            events,
            current: None,
        }
    }

    pub fn from_config(config: &TtsConfig, events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self::new(config.engine_command.clone(), events)
    }

    /// Asks this engine's synthesizer which voices it has.
    ///
    /// # Errors
    ///
    /// See [`list_voices`].
    pub async fn list_voices(&self) -> Result<Vec<Voice>> {
        list_voices(&self.program).await
    }
}

/// Asks `program` (an espeak-ng compatible synthesizer) which voices it has.
///
/// # Errors
///
/// Returns [`LessonError::Speech`] if the program cannot be run or exits
/// unsuccessfully.
pub async fn list_voices(program: &str) -> Result<Vec<Voice>> {
    let output = Command::new(program)
        .arg("--voices")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| LessonError::Speech(format!("cannot run {program}: {e}")))?;

    if !output.status.success() {
        return Err(LessonError::Speech(format!(
            "{program} --voices exited with {}",
            output.status
        )));
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    let voices = parse_voice_listing(&listing);
    debug!(%program, count = voices.len(), "listed synthesizer voices");
    Ok(voices)
}

/// Command-line arguments for speaking one utterance.
fn speech_args(utterance: &EngineUtterance) -> Vec<String> {
    let words_per_minute = (BASE_WORDS_PER_MINUTE * utterance.rate).round().max(80.0);
    let pitch = (BASE_PITCH * utterance.pitch).round().clamp(0.0, 99.0);
    vec![
        "-v".to_owned(),
        utterance.voice.id.clone(),
        "-s".to_owned(),
        format!("{words_per_minute}"),
        "-p".to_owned(),
        format!("{pitch}"),
        "--".to_owned(),
        utterance.text.clone(),
    ]
}

impl SynthesisEngine for CommandEngine {
    fn speak(&mut self, utterance: EngineUtterance) -> std::result::Result<(), String> {
        self.cancel();

        let mut child = Command::new(&self.program)
            .args(speech_args(&utterance))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", self.program))?;

        let id = utterance.id;
        let token = CancellationToken::new();
        self.current = Some(token.clone());
        let events = self.events.clone();
        let _ = events.send(EngineEvent::Started { id });

        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                () = token.cancelled() => None,
            };

            let event = match exited {
                None => {
                    let _ = child.kill().await;
                    EngineEvent::Failed {
                        id,
                        failure: SpeechFailure::Interrupted,
                    }
                }
                Some(Ok(status)) if status.success() => EngineEvent::Ended { id },
                Some(Ok(status)) => {
                    warn!(%id, %status, "synthesizer exited unsuccessfully");
                    EngineEvent::Failed {
                        id,
                        failure: SpeechFailure::Synthesis(format!("synthesizer exited with {status}")),
                    }
                }
                Some(Err(e)) => EngineEvent::Failed {
                    id,
                    failure: SpeechFailure::Synthesis(e.to_string()),
                },
            };
            // The receiver is gone only when the session is shutting down.
            let _ = events.send(event);
        });

        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }
}

impl Drop for CommandEngine {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for CommandEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEngine")
            .field("program", &self.program)
            .field("speaking", &self.current.is_some())
            .finish()
    }
}

/// Parses `espeak-ng --voices` output.
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US            (en 2)
/// ```
///
/// The language column doubles as the voice id passed to `-v`.
pub fn parse_voice_listing(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("Pty"))
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [_, language, age_gender, name, ..] = fields.as_slice() else {
                return None;
            };
            let gender = match age_gender.rsplit('/').next() {
                Some("F") => Some(VoiceGender::Female),
                Some("M") => Some(VoiceGender::Male),
                _ => None,
            };
            Some(Voice {
                id: (*language).to_owned(),
                name: name.replace('_', " "),
                language: (*language).to_owned(),
                gender,
            })
        })
        .collect()
}

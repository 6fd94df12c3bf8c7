//! Recognizer backed by an external speech-to-text process.
//!
//! The program is started once per listening session and prints one
//! transcript per line on stdout. A line starting with `partial:` is interim
//! text; every other non-empty line is final. The process exiting ends
//! listening.

use super::{RecognizerEvent, SpeechRecognizer};
use crate::config::SttConfig;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const INTERIM_PREFIX: &str = "partial:";
/// Placeholder in configured arguments replaced by the listening language.
const LANGUAGE_PLACEHOLDER: &str = "{language}";

/// Speech recognizer that shells out to a command-line transcriber.
///
/// Must be used from within a tokio runtime.
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
    events: mpsc::UnboundedSender<RecognizerEvent>,
    current: Option<CancellationToken>,
}

impl CommandRecognizer {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            events,
            current: None,
        }
    }

    /// `None` when no transcriber is configured.
    pub fn from_config(
        config: &SttConfig,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Option<Self> {
        let program = config.command.trim();
        if program.is_empty() {
            return None;
        }
        Some(Self::new(program, config.args.clone(), events))
    }

    fn args_for(&self, language: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(LANGUAGE_PLACEHOLDER, language))
            .collect()
    }
}

/// Maps one line of transcriber output to an event.
fn parse_line(line: &str) -> Option<RecognizerEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (text, is_final) = match line.strip_prefix(INTERIM_PREFIX) {
        Some(interim) => (interim.trim(), false),
        None => (line, true),
    };
    Some(RecognizerEvent::Transcript {
        text: text.to_owned(),
        is_final,
    })
}

impl SpeechRecognizer for CommandRecognizer {
    fn start(&mut self, language: &str) -> Result<(), String> {
        self.stop();

        let mut child = Command::new(&self.program)
            .args(self.args_for(language))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", self.program))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| format!("{} has no stdout", self.program))?;

        let token = CancellationToken::new();
        self.current = Some(token.clone());
        let events = self.events.clone();
        debug!(program = %self.program, %language, "listening");

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    () = token.cancelled() => {
                        let _ = child.kill().await;
                        return;
                    }
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_line(&line) {
                            let _ = events.send(event);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = child.kill().await;
                        let _ = events.send(RecognizerEvent::Failed(e.to_string()));
                        return;
                    }
                }
            }

            let event = match child.wait().await {
                Ok(status) if status.success() => RecognizerEvent::Ended,
                Ok(status) => {
                    warn!(%status, "transcriber exited unsuccessfully");
                    RecognizerEvent::Failed(format!("transcriber exited with {status}"))
                }
                Err(e) => RecognizerEvent::Failed(e.to_string()),
            };
            if !token.is_cancelled() {
                let _ = events.send(event);
            }
        });

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(token) = self.current.take() {
            token.cancel();
        }
    }
}

impl Drop for CommandRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CommandRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRecognizer")
            .field("program", &self.program)
            .field("listening", &self.current.is_some())
            .finish()
    }
}

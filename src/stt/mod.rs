//! Spoken learner input.
//!
//! A [`SpeechRecognizer`] listens while the microphone is on and reports
//! what it hears as [`RecognizerEvent`]s, which the owner feeds back through
//! [`crate::LessonSession::on_recognizer_event`]. The session collects them
//! in a [`Dictation`] and sends the text to the tutor when listening stops:
//!
//! ```text
//! mic on → recognizer ─ Transcript ─► Dictation ─ mic off / Ended ─► tutor turn
//! ```

pub mod engine;

pub use engine::CommandRecognizer;

/// Progress reported by a recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// Recognized speech. Interim text may still be revised; final text
    /// is settled.
    Transcript { text: String, is_final: bool },
    /// Recognition failed and listening stopped.
    Failed(String),
    /// Listening stopped on its own (end of input, silence timeout).
    Ended,
}

/// Platform speech recognition.
///
/// `start` begins listening synchronously; results arrive later as
/// [`RecognizerEvent`]s. `stop` ends listening without reporting
/// [`RecognizerEvent::Ended`]: the caller already knows.
pub trait SpeechRecognizer: Send {
    /// Starts listening for speech in `language` (e.g. `en-US`).
    ///
    /// # Errors
    ///
    /// Returns a message when the recognizer cannot start.
    fn start(&mut self, language: &str) -> Result<(), String>;

    /// Stops listening. Idempotent.
    fn stop(&mut self);
}

/// Text heard since the microphone was switched on.
///
/// Settled transcripts accumulate; the latest interim transcript is shown
/// after them until a final one replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictation {
    settled: String,
    interim: String,
}

impl Dictation {
    pub fn push(&mut self, text: &str, is_final: bool) {
        let text = text.trim();
        if is_final {
            if !text.is_empty() {
                if !self.settled.is_empty() {
                    self.settled.push(' ');
                }
                self.settled.push_str(text);
            }
            self.interim.clear();
        } else {
            self.interim = text.to_owned();
        }
    }

    /// Everything heard so far, interim text included.
    pub fn text(&self) -> String {
        match (self.settled.is_empty(), self.interim.is_empty()) {
            (_, true) => self.settled.clone(),
            (true, false) => self.interim.clone(),
            (false, false) => format!("{} {}", self.settled, self.interim),
        }
    }

    /// Returns the text heard so far and starts over.
    pub fn take(&mut self) -> String {
        let text = self.text();
        self.clear();
        text
    }

    pub fn clear(&mut self) {
        self.settled.clear();
        self.interim.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.settled.is_empty() && self.interim.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn final_transcripts_accumulate_and_interim_is_replaced() {
        let mut dictation = Dictation::default();
        dictation.push("what is", false);
        dictation.push("what is a var", false);
        assert_eq!(dictation.text(), "what is a var");

        dictation.push("what is a variable", true);
        dictation.push("and a", false);
        assert_eq!(dictation.text(), "what is a variable and a");

        dictation.push(" and a loop? ", true);
        assert_eq!(dictation.take(), "what is a variable and a loop?");
        assert!(dictation.is_empty());
    }

    #[test]
    fn blank_final_clears_interim_only() {
        let mut dictation = Dictation::default();
        dictation.push("hello", true);
        dictation.push("uh", false);
        dictation.push("   ", true);
        assert_eq!(dictation.text(), "hello");
    }
}

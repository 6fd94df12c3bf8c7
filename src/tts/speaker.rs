//! Single speech-synthesis call with voice selection.

use super::voice::select_voice;
use super::{
    EngineEvent, EngineUtterance, SpeakError, SpeechFailure, SynthesisEngine, UtteranceId,
    VoiceCatalog,
};
use tracing::{debug, error, info, warn};

/// Per-call speaking options.
#[derive(Debug, Clone)]
pub struct SpeakOptions {
    pub language_tag: String,
    pub female_voice_preferred: bool,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            language_tag: "en-US".to_owned(),
            female_voice_preferred: true,
        }
    }
}

/// Engine progress after stale events have been filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakerEvent {
    Started(UtteranceId),
    Ended(UtteranceId),
    Failed(UtteranceId, SpeechFailure),
}

/// Wraps a [`SynthesisEngine`] and tracks the one utterance it is playing.
pub struct Speaker {
    engine: Box<dyn SynthesisEngine>,
    rate: f32,
    pitch: f32,
    next_id: u64,
    current: Option<UtteranceId>,
    speaking: bool,
}

impl Speaker {
    /// Creates a speaker with the tutor persona's delivery (rate, pitch).
    pub fn new(engine: Box<dyn SynthesisEngine>, rate: f32, pitch: f32) -> Self {
        Self {
            engine,
            rate,
            pitch,
            next_id: 1,
            current: None,
            speaking: false,
        }
    }

    /// Starts speaking `text`.
    ///
    /// `Err` means nothing started and no [`SpeakerEvent`] will ever follow
    /// for this call. `Ok` means playback was handed to the engine; progress
    /// arrives later through [`Speaker::handle_engine_event`].
    ///
    /// # Errors
    ///
    /// [`SpeakError::NotReady`] when the catalog is empty,
    /// [`SpeakError::VoiceNotFound`] when no voice matches the language,
    /// [`SpeakError::Engine`] when the engine refuses to start.
    pub fn speak(
        &mut self,
        catalog: &VoiceCatalog,
        text: &str,
        options: &SpeakOptions,
    ) -> Result<UtteranceId, SpeakError> {
        if text.trim().is_empty() {
            return Err(SpeakError::EmptyText);
        }
        if catalog.is_empty() {
            warn!("voices not loaded yet, cannot speak");
            return Err(SpeakError::NotReady);
        }

        let Some((voice, tier)) = select_voice(
            catalog.voices(),
            &options.language_tag,
            options.female_voice_preferred,
        ) else {
            warn!(
                language = %options.language_tag,
                available = ?catalog.voices().iter().map(|v| (&v.name, &v.language)).collect::<Vec<_>>(),
                "no voice found for language"
            );
            return Err(SpeakError::VoiceNotFound {
                language: options.language_tag.clone(),
            });
        };

        let id = UtteranceId(self.next_id);
        self.next_id += 1;

        debug!(%id, voice = %voice.name, ?tier, "selected voice");
        let utterance = EngineUtterance {
            id,
            text: text.to_owned(),
            voice: voice.clone(),
            language_tag: voice.language.clone(),
            rate: self.rate,
            pitch: self.pitch,
        };

        self.engine.speak(utterance).map_err(SpeakError::Engine)?;
        self.current = Some(id);
        Ok(id)
    }

    /// Applies an engine event. Returns `None` for events about an utterance
    /// that is no longer current (cancelled or superseded).
    pub fn handle_engine_event(&mut self, event: EngineEvent) -> Option<SpeakerEvent> {
        if self.current != Some(event.id()) {
            debug!(id = %event.id(), "ignoring stale engine event");
            return None;
        }
        match event {
            EngineEvent::Started { id } => {
                self.speaking = true;
                Some(SpeakerEvent::Started(id))
            }
            EngineEvent::Ended { id } => {
                self.speaking = false;
                self.current = None;
                Some(SpeakerEvent::Ended(id))
            }
            EngineEvent::Failed { id, failure } => {
                match &failure {
                    SpeechFailure::Interrupted => {
                        info!(%id, "speech interrupted");
                    }
                    SpeechFailure::Synthesis(msg) => {
                        error!(%id, error = %msg, "speech synthesis error");
                    }
                }
                self.speaking = false;
                self.current = None;
                Some(SpeakerEvent::Failed(id, failure))
            }
        }
    }

    /// Stops any in-flight utterance. Safe to call when idle.
    pub fn cancel(&mut self) {
        if let Some(id) = self.current.take() {
            debug!(%id, "cancelling speech");
        }
        self.engine.cancel();
        self.speaking = false;
    }

    /// Whether the engine has confirmed audio is playing.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// The utterance handed to the engine and not yet finished.
    pub fn current(&self) -> Option<UtteranceId> {
        self.current
    }
}

impl std::fmt::Debug for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Speaker")
            .field("rate", &self.rate)
            .field("pitch", &self.pitch)
            .field("current", &self.current)
            .field("speaking", &self.speaking)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::tts::Voice;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorded {
        spoken: Vec<EngineUtterance>,
        cancels: usize,
    }

    struct RecordingEngine(Arc<Mutex<Recorded>>);

    impl SynthesisEngine for RecordingEngine {
        fn speak(&mut self, utterance: EngineUtterance) -> Result<(), String> {
            self.0.lock().unwrap().spoken.push(utterance);
            Ok(())
        }

        fn cancel(&mut self) {
            self.0.lock().unwrap().cancels += 1;
        }
    }

    fn speaker() -> (Speaker, Arc<Mutex<Recorded>>) {
        let rec = Arc::new(Mutex::new(Recorded::default()));
        (
            Speaker::new(Box::new(RecordingEngine(Arc::clone(&rec))), 0.9, 1.2),
            rec,
        )
    }

    fn catalog(voices: Vec<Voice>) -> VoiceCatalog {
        let mut catalog = VoiceCatalog::new();
        catalog.on_catalog_changed(voices);
        catalog
    }

    #[test]
    fn empty_catalog_fails_with_not_ready() {
        let (mut speaker, rec) = speaker();
        let err = speaker
            .speak(&VoiceCatalog::new(), "Hello", &SpeakOptions::default())
            .unwrap_err();
        assert_eq!(err, SpeakError::NotReady);
        assert_eq!(err.reason(), "not-ready");
        assert!(rec.lock().unwrap().spoken.is_empty());
        assert!(speaker.current().is_none());
    }

    #[test]
    fn unmatched_language_fails_with_voice_not_found() {
        let (mut speaker, _) = speaker();
        let catalog = catalog(vec![Voice::new("Samantha", "en-US")]);
        let options = SpeakOptions {
            language_tag: "ta-IN".to_owned(),
            female_voice_preferred: true,
        };
        let err = speaker.speak(&catalog, "Vanakkam", &options).unwrap_err();
        assert_eq!(err.reason(), "voice-not-found");
    }

    #[test]
    fn blank_text_is_rejected() {
        let (mut speaker, _) = speaker();
        let catalog = catalog(vec![Voice::new("Samantha", "en-US")]);
        let err = speaker
            .speak(&catalog, "   ", &SpeakOptions::default())
            .unwrap_err();
        assert_eq!(err, SpeakError::EmptyText);
    }

    #[test]
    fn successful_speak_uses_delivery_and_voice_language() {
        let (mut speaker, rec) = speaker();
        let catalog = catalog(vec![
            Voice::new("Generic", "ta_IN"),
            Voice::new("Female Voice", "ta_IN"),
        ]);
        let options = SpeakOptions {
            language_tag: "ta-IN".to_owned(),
            female_voice_preferred: true,
        };
        let id = speaker.speak(&catalog, "Vanakkam", &options).unwrap();
        let rec = rec.lock().unwrap();
        let utterance = &rec.spoken[0];
        assert_eq!(utterance.id, id);
        assert_eq!(utterance.voice.name, "Female Voice");
        assert_eq!(utterance.language_tag, "ta_IN");
        assert!((utterance.rate - 0.9).abs() < f32::EPSILON);
        assert!((utterance.pitch - 1.2).abs() < f32::EPSILON);
        assert!(!speaker.is_speaking());
    }

    #[test]
    fn events_drive_speaking_flag() {
        let (mut speaker, _) = speaker();
        let catalog = catalog(vec![Voice::new("Samantha", "en-US")]);
        let id = speaker
            .speak(&catalog, "Hi", &SpeakOptions::default())
            .unwrap();

        assert_eq!(
            speaker.handle_engine_event(EngineEvent::Started { id }),
            Some(SpeakerEvent::Started(id))
        );
        assert!(speaker.is_speaking());
        assert_eq!(
            speaker.handle_engine_event(EngineEvent::Ended { id }),
            Some(SpeakerEvent::Ended(id))
        );
        assert!(!speaker.is_speaking());
        assert!(speaker.current().is_none());
    }

    #[test]
    fn cancel_is_synchronous_and_idempotent() {
        let (mut speaker, rec) = speaker();
        let catalog = catalog(vec![Voice::new("Samantha", "en-US")]);
        let id = speaker
            .speak(&catalog, "Hi", &SpeakOptions::default())
            .unwrap();
        speaker.handle_engine_event(EngineEvent::Started { id });

        speaker.cancel();
        assert!(!speaker.is_speaking());
        speaker.cancel();
        assert_eq!(rec.lock().unwrap().cancels, 2);

        let late = EngineEvent::Failed {
            id,
            failure: SpeechFailure::Interrupted,
        };
        assert!(speaker.handle_engine_event(late).is_none());
    }

    #[test]
    fn engine_refusal_is_a_synchronous_failure() {
        struct Refusing;
        impl SynthesisEngine for Refusing {
            fn speak(&mut self, _: EngineUtterance) -> Result<(), String> {
                Err("no audio device".to_owned())
            }
            fn cancel(&mut self) {}
        }

        let mut speaker = Speaker::new(Box::new(Refusing), 1.0, 1.0);
        let catalog = catalog(vec![Voice::new("Samantha", "en-US")]);
        let err = speaker
            .speak(&catalog, "Hi", &SpeakOptions::default())
            .unwrap_err();
        assert_eq!(err.reason(), "engine");
        assert!(speaker.current().is_none());
    }
}

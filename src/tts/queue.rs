//! Serialized speech output.
//!
//! The queue owns the [`Speaker`], the [`VoiceCatalog`] and every gate that
//! decides whether the next utterance may start. Exactly one utterance is in
//! flight at a time:
//!
//! - the head of `pending` is "starting" while the playback lock is held and
//!   the engine has not yet confirmed audio;
//! - it is popped when the engine reports `Started` (or fails before that);
//! - the speaker's speaking flag then blocks further drains until `Ended` or
//!   `Failed`.
//!
//! Every gate-relevant mutation ends with [`SpeechQueue::drain_if_possible`].

use super::{
    EngineEvent, SpeakError, SpeakOptions, Speaker, SpeakerEvent, SpeechFailure,
    SynthesisEngine, Utterance, UtteranceId, Voice, VoiceCatalog,
};
use crate::config::TtsConfig;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Observable queue transitions, for UIs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechEvent {
    /// An utterance was appended; `queued` is the new queue length.
    Enqueued { text: String, queued: usize },
    /// The engine confirmed audio for an utterance.
    Started { id: UtteranceId, text: String },
    /// An utterance played to completion.
    Finished { id: UtteranceId },
    /// A started utterance failed or was interrupted by the engine.
    Failed {
        id: UtteranceId,
        failure: SpeechFailure,
    },
    /// An utterance was dropped because it could not be started.
    Skipped { text: String, error: SpeakError },
    /// The in-flight utterance was cancelled.
    Cancelled { id: UtteranceId },
    /// Pending utterances were discarded.
    Cleared { dropped: usize },
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: UtteranceId,
    started: bool,
}

/// FIFO of utterances driving a [`Speaker`] one item at a time.
pub struct SpeechQueue {
    speaker: Speaker,
    catalog: VoiceCatalog,
    pending: VecDeque<Utterance>,
    /// Playback lock: held from the speak call until the engine confirms
    /// start, or the attempt fails.
    processing: bool,
    in_flight: Option<InFlight>,
    user_interacted: bool,
    enabled: bool,
    female_voice_preferred: bool,
    placeholder: String,
    events: Option<broadcast::Sender<SpeechEvent>>,
}

impl SpeechQueue {
    /// Creates a queue over `engine` using the delivery and gate settings in
    /// `config`.
    pub fn new(engine: Box<dyn SynthesisEngine>, config: &TtsConfig) -> Self {
        Self {
            speaker: Speaker::new(engine, config.rate, config.pitch),
            catalog: VoiceCatalog::new(),
            pending: VecDeque::new(),
            processing: false,
            in_flight: None,
            user_interacted: false,
            enabled: config.enabled,
            female_voice_preferred: config.female_voice_preferred,
            placeholder: config.placeholder_text.trim().to_owned(),
            events: None,
        }
    }

    /// Publishes transitions on `sender`.
    pub fn with_events(mut self, sender: broadcast::Sender<SpeechEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Appends an utterance and tries to start it.
    ///
    /// Blank text and the placeholder greeting are refused. Returns whether
    /// the utterance was queued.
    pub fn enqueue(&mut self, utterance: Utterance) -> bool {
        let text = utterance.text.trim();
        if text.is_empty() {
            debug!("refusing to queue blank utterance");
            return false;
        }
        if !self.placeholder.is_empty() && text == self.placeholder {
            debug!("refusing to queue placeholder greeting");
            return false;
        }

        let text = utterance.text.clone();
        self.pending.push_back(utterance);
        let queued = self.pending.len();
        debug!(queued, "utterance queued");
        self.emit(SpeechEvent::Enqueued { text, queued });
        self.drain_if_possible();
        true
    }

    fn can_start(&self) -> bool {
        self.user_interacted
            && self.enabled
            && self.catalog.is_ready()
            && !self.processing
            && !self.speaker.is_speaking()
            && !self.pending.is_empty()
    }

    /// Starts the head utterance when every gate holds. Idempotent.
    ///
    /// Utterances that fail synchronously are dropped and the next one is
    /// tried straight away.
    pub fn drain_if_possible(&mut self) {
        while self.can_start() {
            let Some(head) = self.pending.front() else {
                return;
            };
            self.processing = true;
            let options = SpeakOptions {
                language_tag: head.language_tag.clone(),
                female_voice_preferred: self.female_voice_preferred,
            };

            match self.speaker.speak(&self.catalog, &head.text, &options) {
                Ok(id) => {
                    debug!(%id, "utterance handed to engine");
                    self.in_flight = Some(InFlight { id, started: false });
                    return;
                }
                Err(error) => {
                    self.processing = false;
                    if let Some(dropped) = self.pending.pop_front() {
                        warn!(reason = error.reason(), %error, "dropping utterance");
                        self.emit(SpeechEvent::Skipped {
                            text: dropped.text,
                            error,
                        });
                    }
                }
            }
        }
    }

    /// Feeds an engine progress event back into the queue.
    pub fn handle_engine_event(&mut self, event: EngineEvent) {
        let Some(event) = self.speaker.handle_engine_event(event) else {
            return;
        };

        match event {
            SpeakerEvent::Started(id) => {
                let mut text = String::new();
                if let Some(flight) = self.in_flight.as_mut()
                    && flight.id == id
                    && !flight.started
                {
                    flight.started = true;
                    if let Some(head) = self.pending.pop_front() {
                        text = head.text;
                    }
                }
                self.processing = false;
                self.emit(SpeechEvent::Started { id, text });
            }
            SpeakerEvent::Ended(id) => {
                self.settle(id);
                self.emit(SpeechEvent::Finished { id });
            }
            SpeakerEvent::Failed(id, failure) => {
                self.settle(id);
                self.emit(SpeechEvent::Failed { id, failure });
            }
        }
        self.drain_if_possible();
    }

    /// Clears in-flight bookkeeping for a finished utterance. An utterance
    /// that never started still occupies the head and is dropped here.
    fn settle(&mut self, id: UtteranceId) {
        if let Some(flight) = self.in_flight.take_if(|f| f.id == id)
            && !flight.started
        {
            self.pending.pop_front();
        }
        self.processing = false;
    }

    /// Applies a platform voice report.
    pub fn on_voices_changed(&mut self, voices: Vec<Voice>) {
        if self.catalog.on_catalog_changed(voices) {
            info!(voices = self.catalog.len(), "speech voices ready");
        }
        self.drain_if_possible();
    }

    /// Latches the one-shot "user interacted" gate.
    pub fn mark_user_interacted(&mut self) {
        if !self.user_interacted {
            self.user_interacted = true;
            info!("user interaction recorded, speech unlocked");
        }
        self.drain_if_possible();
    }

    /// Toggles spoken output. Disabling only holds the queue back; an
    /// utterance already playing finishes.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.drain_if_possible();
    }

    pub fn set_female_voice_preferred(&mut self, preferred: bool) {
        self.female_voice_preferred = preferred;
    }

    /// Stops the in-flight utterance now, without waiting for the engine.
    ///
    /// Late engine events for it are ignored. Pending utterances stay queued
    /// and the next one may start immediately.
    pub fn cancel(&mut self) {
        let cancelled = self.in_flight.take();
        self.speaker.cancel();
        self.processing = false;
        if let Some(flight) = cancelled {
            if !flight.started {
                self.pending.pop_front();
            }
            debug!(id = %flight.id, "speech cancelled");
            self.emit(SpeechEvent::Cancelled { id: flight.id });
        }
        self.drain_if_possible();
    }

    /// Cancels playback and discards everything pending.
    pub fn interrupt(&mut self) {
        let dropped = self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            debug!(dropped, "speech queue cleared");
            self.emit(SpeechEvent::Cleared { dropped });
        }
        self.cancel();
    }

    fn emit(&self, event: SpeechEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    /// Number of utterances not yet started (including a "starting" head).
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaker.is_speaking()
    }

    /// Whether the playback lock is held.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn user_interacted(&self) -> bool {
        self.user_interacted
    }

    pub fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    /// Texts waiting to be spoken, head first.
    pub fn pending_texts(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(|u| u.text.as_str())
    }
}

impl std::fmt::Debug for SpeechQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechQueue")
            .field("pending", &self.pending.len())
            .field("processing", &self.processing)
            .field("in_flight", &self.in_flight)
            .field("user_interacted", &self.user_interacted)
            .field("enabled", &self.enabled)
            .field("catalog_ready", &self.catalog.is_ready())
            .finish()
    }
}

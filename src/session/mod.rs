//! The lesson session: one owner for the context, the speech queue, the
//! microphone and the tutor busy flag.
//!
//! [`LessonSession`] is synchronous. Every input (a learner command, a tick,
//! a finished tutor call or code run, an engine event) updates state and
//! returns the [`Effect`]s the caller must perform. [`driver::SessionDriver`]
//! performs them on a tokio event loop; tests call the session directly.

pub mod driver;

use crate::config::LessonConfig;
use crate::lesson::{
    ContextEvent, Curriculum, InactivityMonitor, LastRun, LessonContext, Position, Stage,
    check_success_criteria, reduce,
};
use crate::runner::RunResult;
use crate::stt::{Dictation, RecognizerEvent, SpeechRecognizer};
use crate::tts::{EngineEvent, SpeechEvent, SpeechQueue, SynthesisEngine, Utterance, Voice};
use crate::tutor::{ActionKind, Rubric, TutorAction, TutorResponse};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

const INITIAL_GREETING: &str = "System: The user has just loaded the application. Please provide a warm welcome and introduce the first lesson.";
const EDIT_NUDGE: &str =
    "System: User has changed the code but not run it. Nudge them to run it.";
const RUN_SUCCEEDED: &str = "System: User ran the code.";
const RUN_PASSED_ALL_TESTS: &str = "System: User ran the code and all success criteria have been met successfully. Please celebrate and suggest advancing.";
const RUN_FAILED: &str =
    "System: User ran the code and it resulted in an error. Please diagnose it.";

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Direction of episode navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

/// Learner input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Free text for the tutor.
    Chat(String),
    /// Replace the editor contents.
    EditCode(String),
    /// Run the editor contents.
    RunCode,
    Navigate(Direction),
    /// Perform the n-th action (zero-based) of the latest tutor response.
    PerformAction(usize),
    SetLanguage(String),
    ToggleChatPanel,
    SetTtsEnabled(bool),
    /// Switch the microphone on or off. Switching it off sends what was
    /// heard to the tutor.
    SetSttEnabled(bool),
    SetFemaleVoicePreferred(bool),
    /// Silence the tutor and drop queued speech.
    StopSpeaking,
    /// Activity with no other meaning (keypress, pointer movement).
    Interacted,
}

/// A tutor round trip to start.
#[derive(Debug, Clone)]
pub struct TutorRequest {
    pub turn_id: Uuid,
    pub context: LessonContext,
    pub input: String,
}

/// Work the caller must perform for the session.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Call the tutor; report back with [`LessonSession::on_tutor_response`].
    InvokeTutor(TutorRequest),
    /// Run code; report back with [`LessonSession::on_run_completed`].
    RunCode { source: String },
    /// (Re)arm the edit nudge timer; on expiry call
    /// [`LessonSession::on_edit_idle`].
    ScheduleEditNudge { after: Duration },
    CancelEditNudge,
}

/// What happened, for display.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    TutorThinking { input: String },
    TutorResponded(Box<TutorResponse>),
    RunFinished { result: RunResult, tests_passed: bool },
    Navigated {
        position: Position,
        chapter_title: String,
        episode_title: String,
    },
    StageChanged(Stage),
    CoinsAwarded { coins: u64, total: u64 },
    /// The microphone went on or off.
    Listening(bool),
    /// Everything heard since the microphone went on.
    Transcript(String),
    /// Informational text for the learner (busy tutor, end of course, ...).
    Notice(String),
}

/// The tutor turn in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingTurn {
    id: Uuid,
    /// Lesson stage in the context snapshot sent with the turn.
    sent_at: Stage,
}

/// Coordinator of one learner's lesson.
pub struct LessonSession {
    config: LessonConfig,
    curriculum: Curriculum,
    context: LessonContext,
    response: TutorResponse,
    speech: SpeechQueue,
    inactivity: InactivityMonitor,
    /// The tutor turn in flight; at most one.
    pending_turn: Option<PendingTurn>,
    recognizer: Option<Box<dyn SpeechRecognizer>>,
    dictation: Dictation,
    events: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for LessonSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LessonSession")
            .field("position", &self.context.position())
            .field("stage", &self.context.stage)
            .field("pending_turn", &self.pending_turn)
            .field("speech", &self.speech)
            .field("listening", &self.is_listening())
            .finish()
    }
}

impl LessonSession {
    /// Creates a session at the first episode of `curriculum`.
    pub fn new(
        config: LessonConfig,
        curriculum: Curriculum,
        engine: Box<dyn SynthesisEngine>,
    ) -> Self {
        let context = LessonContext::initial(&curriculum, &config);
        let speech = SpeechQueue::new(engine, &config.tts);
        let inactivity = InactivityMonitor::new(&config.inactivity);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            curriculum,
            context,
            response: TutorResponse::placeholder(),
            speech,
            inactivity,
            pending_turn: None,
            recognizer: None,
            dictation: Dictation::default(),
            events,
        }
    }

    /// Enables speech input through `recognizer`.
    pub fn with_recognizer(mut self, recognizer: Box<dyn SpeechRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Publishes speech queue transitions on `sender`.
    pub fn with_speech_events(mut self, sender: broadcast::Sender<SpeechEvent>) -> Self {
        self.speech = self.speech.with_events(sender);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn context(&self) -> &LessonContext {
        &self.context
    }

    pub fn curriculum(&self) -> &Curriculum {
        &self.curriculum
    }

    /// The latest tutor response (the placeholder greeting before any).
    pub fn response(&self) -> &TutorResponse {
        &self.response
    }

    pub fn speech(&self) -> &SpeechQueue {
        &self.speech
    }

    /// Whether the microphone is on.
    pub fn is_listening(&self) -> bool {
        self.context.ui.stt_enabled
    }

    /// Whether a tutor call is in flight.
    pub fn is_tutor_busy(&self) -> bool {
        self.pending_turn.is_some()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn apply(&mut self, event: ContextEvent) {
        self.context = reduce(&self.context, event);
    }

    /// Asks the tutor for the opening greeting.
    pub fn start(&mut self) -> Vec<Effect> {
        info!(
            chapter = %self.context.chapter_title,
            episode = %self.context.episode_title,
            "lesson session started"
        );
        self.begin_turn(INITIAL_GREETING).into_iter().collect()
    }

    /// Starts a tutor turn unless one is already in flight.
    ///
    /// A new turn silences the tutor and discards queued speech.
    fn begin_turn(&mut self, input: &str) -> Option<Effect> {
        if let Some(turn) = self.pending_turn {
            debug!(turn = %turn.id, "tutor busy, dropping turn");
            return None;
        }
        self.speech.interrupt();

        let turn_id = Uuid::new_v4();
        self.pending_turn = Some(PendingTurn {
            id: turn_id,
            sent_at: self.context.stage,
        });
        self.apply(ContextEvent::TutorTurnStarted {
            input: input.to_owned(),
            history_max_chars: self.config.tutor.history_max_chars,
        });
        debug!(%turn_id, "tutor turn started");
        self.emit(SessionEvent::TutorThinking {
            input: input.to_owned(),
        });
        Some(Effect::InvokeTutor(TutorRequest {
            turn_id,
            context: self.context.clone(),
            input: input.to_owned(),
        }))
    }

    /// Applies a learner command.
    pub fn handle_command(&mut self, command: Command) -> Vec<Effect> {
        self.speech.mark_user_interacted();
        self.apply(ContextEvent::Activity);

        match command {
            Command::Chat(text) => self.chat(&text),
            Command::EditCode(code) => {
                self.apply(ContextEvent::CodeEdited(code));
                vec![Effect::ScheduleEditNudge {
                    after: Duration::from_millis(self.config.inactivity.edit_nudge_ms),
                }]
            }
            Command::RunCode => vec![
                Effect::CancelEditNudge,
                Effect::RunCode {
                    source: self.context.editor_code.clone(),
                },
            ],
            Command::Navigate(direction) => self.navigate(direction),
            Command::PerformAction(index) => match self.response.actions.get(index).cloned() {
                Some(action) => self.perform_action(&action),
                None => {
                    self.emit(SessionEvent::Notice(format!("There is no action {}.", index + 1)));
                    Vec::new()
                }
            },
            Command::SetLanguage(language) => {
                self.speech.interrupt();
                info!(%language, "language changed");
                self.apply(ContextEvent::LanguageChanged(language));
                Vec::new()
            }
            Command::ToggleChatPanel => {
                self.apply(ContextEvent::ChatPanelToggled);
                Vec::new()
            }
            Command::SetTtsEnabled(enabled) => {
                self.apply(ContextEvent::TtsToggled(enabled));
                self.speech.set_enabled(enabled);
                Vec::new()
            }
            Command::SetSttEnabled(true) => {
                self.start_listening();
                Vec::new()
            }
            Command::SetSttEnabled(false) => {
                if !self.is_listening() {
                    return Vec::new();
                }
                if let Some(recognizer) = self.recognizer.as_mut() {
                    recognizer.stop();
                }
                self.finish_listening()
            }
            Command::SetFemaleVoicePreferred(preferred) => {
                self.apply(ContextEvent::FemaleVoicePreferred(preferred));
                self.speech.set_female_voice_preferred(preferred);
                Vec::new()
            }
            Command::StopSpeaking => {
                self.speech.interrupt();
                Vec::new()
            }
            Command::Interacted => Vec::new(),
        }
    }

    /// Sends learner text to the tutor, or explains why it cannot.
    fn chat(&mut self, text: &str) -> Vec<Effect> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        let effect = self.begin_turn(text);
        if effect.is_none() {
            self.emit(SessionEvent::Notice(
                "Pyvidhya is still thinking about your last message.".to_owned(),
            ));
        }
        effect.into_iter().collect()
    }

    fn start_listening(&mut self) {
        if self.is_listening() {
            return;
        }
        let Some(recognizer) = self.recognizer.as_mut() else {
            self.emit(SessionEvent::Notice(
                "Speech input is not available.".to_owned(),
            ));
            return;
        };
        if let Err(e) = recognizer.start(&self.context.ui.language) {
            warn!(error = %e, "could not start listening");
            self.emit(SessionEvent::Notice(format!("Could not start listening: {e}")));
            return;
        }
        self.dictation.clear();
        info!(language = %self.context.ui.language, "listening");
        self.apply(ContextEvent::SttToggled(true));
        self.emit(SessionEvent::Listening(true));
    }

    /// Turns the microphone off and sends what was heard to the tutor.
    fn finish_listening(&mut self) -> Vec<Effect> {
        self.apply(ContextEvent::SttToggled(false));
        self.emit(SessionEvent::Listening(false));
        let heard = self.dictation.take();
        debug!(chars = heard.len(), "stopped listening");
        self.chat(&heard)
    }

    /// The recognizer reported progress.
    pub fn on_recognizer_event(&mut self, event: RecognizerEvent) -> Vec<Effect> {
        if !self.is_listening() {
            debug!(?event, "ignoring recognizer event while not listening");
            return Vec::new();
        }
        match event {
            RecognizerEvent::Transcript { text, is_final } => {
                self.speech.mark_user_interacted();
                self.apply(ContextEvent::Activity);
                self.dictation.push(&text, is_final);
                self.emit(SessionEvent::Transcript(self.dictation.text()));
                Vec::new()
            }
            RecognizerEvent::Failed(message) => {
                warn!(%message, "speech recognition failed");
                self.emit(SessionEvent::Notice(format!(
                    "Speech input stopped: {message}"
                )));
                self.finish_listening()
            }
            RecognizerEvent::Ended => self.finish_listening(),
        }
    }

    fn navigate(&mut self, direction: Direction) -> Vec<Effect> {
        let here = self.context.position();
        let target = match direction {
            Direction::Next => self.curriculum.next_position(here),
            Direction::Prev => self.curriculum.prev_position(here),
        };
        let Some(entry) = target.and_then(|p| self.curriculum.entry(p)) else {
            let notice = match direction {
                Direction::Next => "You're at the last episode of the course.",
                Direction::Prev => "You're at the first episode of the course.",
            };
            self.emit(SessionEvent::Notice(notice.to_owned()));
            return Vec::new();
        };

        info!(
            chapter = entry.position.chapter + 1,
            episode = entry.position.episode + 1,
            title = %entry.episode_title,
            "navigating"
        );
        self.speech.interrupt();
        self.apply(ContextEvent::EnteredEpisode(entry));
        self.emit(SessionEvent::Navigated {
            position: self.context.position(),
            chapter_title: self.context.chapter_title.clone(),
            episode_title: self.context.episode_title.clone(),
        });

        let greeting = format!(
            "System: User is navigating to Chapter {}, Episode {}: \"{}\". Please provide a greeting for this new lesson.",
            self.context.chapter_index + 1,
            self.context.episode_index + 1,
            self.context.episode_title
        );
        let mut effects = vec![Effect::CancelEditNudge];
        effects.extend(self.begin_turn(&greeting));
        effects
    }

    fn perform_action(&mut self, action: &TutorAction) -> Vec<Effect> {
        match action.kind() {
            ActionKind::AdvanceStage => {
                let Some(next) = self.context.stage.next() else {
                    self.emit(SessionEvent::Notice(
                        "This is already the final stage.".to_owned(),
                    ));
                    return Vec::new();
                };
                self.apply(ContextEvent::StageAdvanced(next));
                self.emit(SessionEvent::StageChanged(next));
                let input = format!("System: User is advancing to the {next} stage.");
                self.begin_turn(&input).into_iter().collect()
            }
            ActionKind::AwardCoins => {
                let coins = action.coins();
                self.apply(ContextEvent::CoinsAwarded(coins));
                self.emit(SessionEvent::CoinsAwarded {
                    coins,
                    total: self.context.progress.coins,
                });
                Vec::new()
            }
            ActionKind::OfferHint => {
                self.apply(ContextEvent::HintUsed);
                if let Some(message) = action.message() {
                    self.emit(SessionEvent::Notice(message.to_owned()));
                }
                Vec::new()
            }
            ActionKind::NudgeRunCode
            | ActionKind::Celebrate
            | ActionKind::DiagnoseError
            | ActionKind::AskCheckin => {
                if let Some(message) = action.message() {
                    self.emit(SessionEvent::Notice(message.to_owned()));
                }
                Vec::new()
            }
            ActionKind::Unknown => {
                info!(kind = %action.kind, payload = %action.payload, "unhandled action type");
                Vec::new()
            }
        }
    }

    /// Advances the clock by one second.
    pub fn on_tick(&mut self) -> Vec<Effect> {
        self.apply(ContextEvent::Tick);
        let Some(prompt) = self.inactivity.observe(self.context.user_signals.inactive_for_sec)
        else {
            return Vec::new();
        };
        if self.is_tutor_busy() {
            return Vec::new();
        }
        let input = self.inactivity.prompt_text(prompt);
        self.inactivity.mark_fired(prompt);
        info!(?prompt, inactive_for_sec = self.context.user_signals.inactive_for_sec, "learner inactive");
        self.begin_turn(&input).into_iter().collect()
    }

    /// The edit nudge timer expired without a run.
    pub fn on_edit_idle(&mut self) -> Vec<Effect> {
        self.apply(ContextEvent::EditorIdle {
            dirty_ms: self.config.inactivity.edit_nudge_ms,
        });
        self.begin_turn(EDIT_NUDGE).into_iter().collect()
    }

    /// A code run finished.
    pub fn on_run_completed(&mut self, result: RunResult) -> Vec<Effect> {
        let tests_passed = result.success
            && check_success_criteria(&result.stdout, &self.context.curriculum_slice.tests);
        self.apply(ContextEvent::RunCompleted(LastRun {
            timestamp: Some(Utc::now()),
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            success: result.success,
            duration_ms: result.duration_ms,
        }));

        let input = if !result.success {
            RUN_FAILED
        } else if tests_passed {
            RUN_PASSED_ALL_TESTS
        } else {
            RUN_SUCCEEDED
        };
        info!(
            success = result.success,
            tests_passed,
            attempts = self.context.attempts,
            "code run completed"
        );
        self.emit(SessionEvent::RunFinished {
            result,
            tests_passed,
        });
        self.begin_turn(input).into_iter().collect()
    }

    /// A tutor call finished.
    ///
    /// The rubric stage is adopted only when it differs from the stage the
    /// turn was sent at; a reply without a rubric leaves the stage alone.
    pub fn on_tutor_response(&mut self, turn_id: Uuid, response: TutorResponse) {
        let Some(turn) = self.pending_turn.take_if(|turn| turn.id == turn_id) else {
            warn!(%turn_id, "ignoring response for unknown tutor turn");
            return;
        };

        let previous_stage = self.context.stage;
        if let Some(Rubric {
            stage,
            success_criteria,
            ..
        }) = &response.rubric
        {
            self.apply(ContextEvent::TutorRubric {
                stage: *stage,
                sent_at: turn.sent_at,
                success_criteria: success_criteria.clone(),
            });
        }
        if self.context.stage != previous_stage {
            info!(from = %previous_stage, to = %self.context.stage, "tutor moved the stage");
            self.emit(SessionEvent::StageChanged(self.context.stage));
        }

        self.speech.enqueue(Utterance::new(
            response.speaking_content.clone(),
            self.context.ui.language.clone(),
        ));
        self.response = response.clone();
        self.emit(SessionEvent::TutorResponded(Box::new(response)));
    }

    /// The tutor call for `turn_id` died without a reply; answer it with the
    /// generic failure so the tutor does not stay busy.
    pub fn on_tutor_failed(&mut self, turn_id: Uuid) {
        let Some(turn) = self.pending_turn.filter(|turn| turn.id == turn_id) else {
            return;
        };
        self.on_tutor_response(turn_id, TutorResponse::failure(turn.sent_at));
    }

    pub fn on_engine_event(&mut self, event: EngineEvent) {
        self.speech.handle_engine_event(event);
    }

    pub fn on_voices_changed(&mut self, voices: Vec<Voice>) {
        self.speech.on_voices_changed(voices);
    }

    /// Silences speech and the microphone before the session goes away.
    pub fn shutdown(&mut self) {
        self.speech.interrupt();
        if let Some(recognizer) = self.recognizer.as_mut() {
            recognizer.stop();
        }
        info!(
            coins = self.context.progress.coins,
            attempts = self.context.attempts,
            "lesson session ended"
        );
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::tts::EngineUtterance;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Spoken = Arc<Mutex<Vec<EngineUtterance>>>;

    struct RecordingEngine(Spoken);

    impl SynthesisEngine for RecordingEngine {
        fn speak(&mut self, utterance: EngineUtterance) -> Result<(), String> {
            self.0.lock().unwrap().push(utterance);
            Ok(())
        }

        fn cancel(&mut self) {}
    }

    /// Records `start:<language>` and `stop` calls.
    #[derive(Default)]
    struct RecordingRecognizer {
        calls: Arc<Mutex<Vec<String>>>,
        refuse: bool,
    }

    impl SpeechRecognizer for RecordingRecognizer {
        fn start(&mut self, language: &str) -> Result<(), String> {
            if self.refuse {
                return Err("no microphone".to_owned());
            }
            self.calls.lock().unwrap().push(format!("start:{language}"));
            Ok(())
        }

        fn stop(&mut self) {
            self.calls.lock().unwrap().push("stop".to_owned());
        }
    }

    fn heard(text: &str, is_final: bool) -> RecognizerEvent {
        RecognizerEvent::Transcript {
            text: text.to_owned(),
            is_final,
        }
    }

    fn session() -> (LessonSession, Spoken) {
        let spoken = Spoken::default();
        let mut session = LessonSession::new(
            LessonConfig::default(),
            Curriculum::builtin().unwrap(),
            Box::new(RecordingEngine(Arc::clone(&spoken))),
        );
        session.on_voices_changed(vec![
            Voice::new("Samantha", "en-US"),
            Voice::new("Lekha", "hi-IN"),
        ]);
        (session, spoken)
    }

    fn tutor_request(effects: &[Effect]) -> &TutorRequest {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::InvokeTutor(request) => Some(request),
                _ => None,
            })
            .expect("expected a tutor invocation")
    }

    fn reply(speech: &str) -> TutorResponse {
        TutorResponse {
            reading_content: speech.to_owned(),
            speaking_content: speech.to_owned(),
            ..TutorResponse::default()
        }
    }

    /// Starts the session and answers the greeting.
    fn greeted() -> (LessonSession, Spoken) {
        let (mut session, spoken) = session();
        let effects = session.start();
        let turn = tutor_request(&effects).turn_id;
        session.on_tutor_response(turn, reply("Welcome to Python!"));
        (session, spoken)
    }

    #[test]
    fn greeting_waits_for_first_interaction() {
        let (mut session, spoken) = session();
        let effects = session.start();
        let request = tutor_request(&effects);
        assert!(request.input.contains("just loaded the application"));
        assert_eq!(request.context.chat_turns, 1);
        assert!(session.is_tutor_busy());

        let turn = request.turn_id;
        session.on_tutor_response(turn, reply("Welcome to Python!"));
        assert!(!session.is_tutor_busy());
        assert!(spoken.lock().unwrap().is_empty());
        assert_eq!(session.speech().len(), 1);

        session.handle_command(Command::Interacted);
        let spoken = spoken.lock().unwrap();
        assert_eq!(spoken.len(), 1);
        assert_eq!(spoken[0].text, "Welcome to Python!");
    }

    #[test]
    fn second_turn_is_rejected_while_busy() {
        let (mut session, _) = session();
        session.start();
        let effects = session.handle_command(Command::Chat("hello?".into()));
        assert!(effects.is_empty());
        assert_eq!(session.context().chat_turns, 1);
    }

    #[test]
    fn stale_turn_response_is_ignored() {
        let (mut session, _) = session();
        session.start();
        session.on_tutor_response(Uuid::new_v4(), reply("stale"));
        assert!(session.is_tutor_busy());
        assert_eq!(session.speech().len(), 0);
    }

    #[test]
    fn placeholder_response_is_not_spoken() {
        let (mut session, spoken) = session();
        let effects = session.start();
        session.handle_command(Command::Interacted);
        session.on_tutor_response(tutor_request(&effects).turn_id, TutorResponse::placeholder());
        assert!(spoken.lock().unwrap().is_empty());
        assert!(session.speech().is_empty());
    }

    #[test]
    fn chat_appends_history_and_interrupts_speech() {
        let (mut session, spoken) = greeted();
        session.handle_command(Command::Interacted);
        assert_eq!(spoken.lock().unwrap().len(), 1);

        let effects = session.handle_command(Command::Chat("what is print?".into()));
        let request = tutor_request(&effects);
        assert!(request.context.history_short.ends_with("User: what is print?"));
        assert_eq!(request.context.chat_turns, 2);
        assert!(!session.speech().is_processing());
    }

    #[test]
    fn rubric_stage_change_updates_objectives() {
        let (mut session, _) = session();
        let effects = session.start();
        let mut response = reply("Let's explore!");
        response.rubric = Some(Rubric {
            stage: Stage::Explore,
            success_criteria: vec!["Change the age".into()],
            common_mistakes: Vec::new(),
        });
        session.on_tutor_response(tutor_request(&effects).turn_id, response);
        assert_eq!(session.context().stage, Stage::Explore);
        assert_eq!(session.context().objectives, vec!["Change the age"]);
    }

    #[test]
    fn reply_without_rubric_keeps_stage_and_objectives() {
        let (mut session, _) = session();
        let effects = session.start();
        let mut response = reply("Let's explore!");
        response.rubric = Some(Rubric {
            stage: Stage::Explore,
            success_criteria: vec!["Change the age".into()],
            common_mistakes: Vec::new(),
        });
        session.on_tutor_response(tutor_request(&effects).turn_id, response);

        let effects = session.handle_command(Command::Chat("what next?".into()));
        let bare: TutorResponse =
            serde_json::from_str(r#"{"speakingContent": "Try another age!"}"#).unwrap();
        session.on_tutor_response(tutor_request(&effects).turn_id, bare);
        assert_eq!(session.context().stage, Stage::Explore);
        assert_eq!(session.context().objectives, vec!["Change the age"]);
    }

    #[test]
    fn reply_echoing_sent_stage_keeps_advance_made_in_flight() {
        let (mut session, _) = session();
        let effects = session.start();
        let mut response = reply("Ready to move on?");
        response.actions = vec![TutorAction::new("advanceStage", json!({}))];
        session.on_tutor_response(tutor_request(&effects).turn_id, response);

        let effects = session.handle_command(Command::Chat("yes!".into()));
        let turn = tutor_request(&effects).turn_id;
        assert_eq!(tutor_request(&effects).context.stage, Stage::Discover);

        let mut rx = session.subscribe();
        assert!(session.handle_command(Command::PerformAction(0)).is_empty());
        assert_eq!(session.context().stage, Stage::Explore);

        let mut echo = reply("Great!");
        echo.rubric = Some(Rubric {
            stage: Stage::Discover,
            success_criteria: vec!["Type your name".into()],
            common_mistakes: Vec::new(),
        });
        session.on_tutor_response(turn, echo);
        assert_eq!(session.context().stage, Stage::Explore);
        assert!(session.context().objectives.is_empty());

        let stage_events: Vec<Stage> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                SessionEvent::StageChanged(stage) => Some(stage),
                _ => None,
            })
            .collect();
        assert_eq!(stage_events, vec![Stage::Explore]);
    }

    #[test]
    fn failed_tutor_call_frees_the_tutor() {
        let (mut session, _) = session();
        let effects = session.start();
        let turn = tutor_request(&effects).turn_id;

        session.on_tutor_failed(Uuid::new_v4());
        assert!(session.is_tutor_busy());

        session.on_tutor_failed(turn);
        assert!(!session.is_tutor_busy());
        assert_eq!(*session.response(), TutorResponse::failure(Stage::Discover));
        assert_eq!(session.context().stage, Stage::Discover);
    }

    #[test]
    fn passing_run_asks_tutor_to_celebrate() {
        let (mut session, _) = greeted();
        let effects = session.handle_command(Command::RunCode);
        assert!(matches!(effects[0], Effect::CancelEditNudge));
        assert!(matches!(&effects[1], Effect::RunCode { source } if source.contains("print")));

        let effects = session.on_run_completed(RunResult {
            stdout: "Hello Ava, you are 12 years old".into(),
            stderr: String::new(),
            success: true,
            duration_ms: 12,
        });
        let request = tutor_request(&effects);
        assert!(request.input.contains("all success criteria have been met"));
        assert_eq!(request.context.attempts, 1);
        assert!(request.context.last_run.timestamp.is_some());
    }

    #[test]
    fn failing_run_records_error_and_asks_for_diagnosis() {
        let (mut session, _) = greeted();
        let effects = session.on_run_completed(RunResult {
            stdout: String::new(),
            stderr: "NameError: name 'nme' is not defined".into(),
            success: false,
            duration_ms: 5,
        });
        let request = tutor_request(&effects);
        assert!(request.input.contains("resulted in an error"));
        assert_eq!(request.context.recent_errors.len(), 1);
        assert_eq!(request.context.recent_errors[0].attempt_index, 1);
    }

    #[test]
    fn successful_run_without_passing_tests_is_reported_plainly() {
        let (mut session, _) = greeted();
        let effects = session.on_run_completed(RunResult {
            stdout: "something else".into(),
            success: true,
            ..RunResult::default()
        });
        assert_eq!(tutor_request(&effects).input, RUN_SUCCEEDED);
    }

    #[test]
    fn run_result_is_kept_even_when_tutor_is_busy() {
        let (mut session, _) = session();
        session.start();
        let effects = session.on_run_completed(RunResult {
            stdout: "x".into(),
            success: true,
            ..RunResult::default()
        });
        assert!(effects.is_empty());
        assert_eq!(session.context().attempts, 1);
    }

    #[test]
    fn navigation_resets_episode_and_greets() {
        let (mut session, _) = greeted();
        session.on_run_completed(RunResult::not_ready());
        let turn = session.pending_turn.unwrap().id;
        session.on_tutor_response(turn, reply("Let's fix it."));

        let effects = session.handle_command(Command::Navigate(Direction::Next));
        let request = tutor_request(&effects);
        assert!(request.input.contains("Chapter 1, Episode 2: \"Numbers & Basic Math\""));
        assert_eq!(session.context().position(), Position::new(0, 1));
        assert_eq!(session.context().attempts, 0);
        assert!(session.context().recent_errors.is_empty());
        assert_eq!(session.context().stage, Stage::Discover);
    }

    #[test]
    fn navigating_before_the_first_episode_is_a_no_op() {
        let (mut session, _) = greeted();
        let mut rx = session.subscribe();
        let effects = session.handle_command(Command::Navigate(Direction::Prev));
        assert!(effects.is_empty());
        assert_eq!(session.context().position(), Position::default());
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Notice(_)));
    }

    #[test]
    fn editing_schedules_nudge_and_idle_nudges_tutor() {
        let (mut session, _) = greeted();
        let effects = session.handle_command(Command::EditCode("print('hi')".into()));
        assert!(matches!(
            effects[0],
            Effect::ScheduleEditNudge { after } if after == Duration::from_millis(2_500)
        ));

        let effects = session.on_edit_idle();
        let request = tutor_request(&effects);
        assert_eq!(request.input, EDIT_NUDGE);
        assert_eq!(request.context.editor_dirty_since_ms, 2_500);
        assert_eq!(request.context.editor_code, "print('hi')");
    }

    #[test]
    fn inactivity_prompts_once_per_threshold() {
        let (mut session, _) = greeted();
        let mut invocations = Vec::new();
        for second in 1..=150u64 {
            let effects = session.on_tick();
            if let Some(Effect::InvokeTutor(request)) = effects.first() {
                invocations.push((second, request.input.clone()));
                session.on_tutor_response(request.turn_id, reply("Still there?"));
            }
        }
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0].0, 30);
        assert!(invocations[0].1.contains("Gently check in"));
        assert_eq!(invocations[1].0, 120);
        assert!(invocations[1].1.contains("Offer a hint"));
    }

    #[test]
    fn actions_advance_stage_and_award_coins() {
        let (mut session, _) = session();
        let effects = session.start();
        let mut response = reply("Great work!");
        response.actions = vec![
            TutorAction::new("awardCoins", json!({"coins": 20})),
            TutorAction::new("advanceStage", json!({})),
            TutorAction::new("offerHint", json!({"message": "Try quotes"})),
            TutorAction::new("doABarrelRoll", json!({})),
        ];
        session.on_tutor_response(tutor_request(&effects).turn_id, response);

        session.handle_command(Command::PerformAction(0));
        assert_eq!(session.context().progress.coins, 20);

        session.handle_command(Command::PerformAction(2));
        assert_eq!(session.context().hints_used, 1);

        assert!(session.handle_command(Command::PerformAction(3)).is_empty());
        assert!(session.handle_command(Command::PerformAction(9)).is_empty());

        let effects = session.handle_command(Command::PerformAction(1));
        assert_eq!(session.context().stage, Stage::Explore);
        assert!(tutor_request(&effects).input.contains("advancing to the explore stage"));
    }

    #[test]
    fn language_change_clears_speech_and_retargets_voice() {
        let (mut session, spoken) = greeted();
        session.handle_command(Command::SetLanguage("hi-IN".into()));
        assert!(session.speech().is_empty());
        assert!(!session.speech().is_processing());
        assert_eq!(session.context().ui.language, "hi-IN");

        let effects = session.handle_command(Command::Chat("namaste".into()));
        session.on_tutor_response(tutor_request(&effects).turn_id, reply("Namaste!"));
        let spoken = spoken.lock().unwrap();
        let last = spoken.last().unwrap();
        assert_eq!(last.text, "Namaste!");
        assert_eq!(last.voice.name, "Lekha");
    }

    #[test]
    fn disabling_tts_holds_speech() {
        let (mut session, spoken) = session();
        session.handle_command(Command::SetTtsEnabled(false));
        let effects = session.start();
        session.on_tutor_response(tutor_request(&effects).turn_id, reply("Hi!"));
        assert!(spoken.lock().unwrap().is_empty());
        assert!(!session.context().ui.tts_enabled);

        session.handle_command(Command::SetTtsEnabled(true));
        assert_eq!(spoken.lock().unwrap().len(), 1);
    }

    #[test]
    fn microphone_without_recognizer_explains() {
        let (mut session, _) = greeted();
        let mut rx = session.subscribe();
        assert!(session.handle_command(Command::SetSttEnabled(true)).is_empty());
        assert!(!session.is_listening());
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Notice(text) if text.contains("not available")));
    }

    #[test]
    fn dictation_is_sent_when_microphone_turns_off() {
        let (session, _) = greeted();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut session = session.with_recognizer(Box::new(RecordingRecognizer {
            calls: Arc::clone(&calls),
            ..RecordingRecognizer::default()
        }));
        let mut rx = session.subscribe();

        session.handle_command(Command::SetSttEnabled(true));
        assert!(session.is_listening());
        assert!(session.context().ui.stt_enabled);
        assert!(session.on_recognizer_event(heard("what is", false)).is_empty());
        session.on_recognizer_event(heard("what is a loop?", true));

        let effects = session.handle_command(Command::SetSttEnabled(false));
        assert_eq!(tutor_request(&effects).input, "what is a loop?");
        assert!(!session.is_listening());
        assert_eq!(*calls.lock().unwrap(), ["start:en-US", "stop"]);

        let events: Vec<SessionEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(matches!(events[0], SessionEvent::Listening(true)));
        assert!(matches!(&events[1], SessionEvent::Transcript(text) if text == "what is"));
        assert!(matches!(&events[2], SessionEvent::Transcript(text) if text == "what is a loop?"));
        assert!(matches!(events[3], SessionEvent::Listening(false)));
    }

    #[test]
    fn recognizer_end_sends_dictation_and_later_events_are_ignored() {
        let (session, _) = greeted();
        let mut session = session.with_recognizer(Box::new(RecordingRecognizer::default()));
        session.handle_command(Command::SetLanguage("hi-IN".into()));
        session.handle_command(Command::SetSttEnabled(true));
        session.on_recognizer_event(heard("namaste", true));

        let effects = session.on_recognizer_event(RecognizerEvent::Ended);
        let request = tutor_request(&effects);
        assert_eq!(request.input, "namaste");
        assert!(!request.context.ui.stt_enabled);

        let turn = request.turn_id;
        session.on_tutor_response(turn, reply("Namaste!"));
        assert!(session.on_recognizer_event(heard("late words", true)).is_empty());
        assert!(session.on_recognizer_event(RecognizerEvent::Ended).is_empty());
        assert!(!session.is_tutor_busy());
    }

    #[test]
    fn silent_microphone_sends_nothing() {
        let (session, _) = greeted();
        let mut session = session.with_recognizer(Box::new(RecordingRecognizer::default()));
        session.handle_command(Command::SetSttEnabled(true));
        let effects =
            session.on_recognizer_event(RecognizerEvent::Failed("audio device lost".into()));
        assert!(effects.is_empty());
        assert!(!session.is_listening());
        assert_eq!(session.context().chat_turns, 1);
    }

    #[test]
    fn refused_microphone_stays_off() {
        let (session, _) = greeted();
        let mut session = session.with_recognizer(Box::new(RecordingRecognizer {
            refuse: true,
            ..RecordingRecognizer::default()
        }));
        let mut rx = session.subscribe();
        session.handle_command(Command::SetSttEnabled(true));
        assert!(!session.is_listening());
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Notice(text) if text.contains("no microphone")));
    }
}

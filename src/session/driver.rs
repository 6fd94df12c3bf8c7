//! Async event loop around a [`LessonSession`].

use super::{Command, Effect, LessonSession};
use crate::runner::{CodeRunner, RunResult};
use crate::stt::RecognizerEvent;
use crate::tts::{EngineEvent, Voice};
use crate::tutor::{TutorClient, TutorResponse};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Channels feeding the driver.
#[derive(Debug)]
pub struct SessionInputs {
    /// Learner commands. Closing the sender ends the session.
    pub commands: mpsc::Receiver<Command>,
    /// Progress events from the synthesis engine.
    pub engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    /// Voice catalog reports (initial listing, later changes).
    pub voices: mpsc::Receiver<Vec<Voice>>,
    /// Progress from the speech recognizer, if the session has one.
    pub transcripts: mpsc::UnboundedReceiver<RecognizerEvent>,
}

/// Background work reporting back into the loop.
struct Workers {
    tasks: JoinSet<()>,
    /// Tutor turn served by each running tutor task.
    tutor_tasks: HashMap<task::Id, Uuid>,
    tutor_results: mpsc::UnboundedSender<(Uuid, TutorResponse)>,
    run_results: mpsc::UnboundedSender<RunResult>,
    edit_deadline: Option<Instant>,
}

/// Runs a [`LessonSession`]: a one-second clock, learner commands, engine
/// events and the results of tutor calls and code runs, all applied on one
/// task.
pub struct SessionDriver {
    session: LessonSession,
    tutor: Arc<dyn TutorClient>,
    runner: Arc<dyn CodeRunner>,
    cancel: CancellationToken,
}

impl SessionDriver {
    pub fn new(
        session: LessonSession,
        tutor: Arc<dyn TutorClient>,
        runner: Arc<dyn CodeRunner>,
    ) -> Self {
        Self {
            session,
            tutor,
            runner,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`SessionDriver::run`] when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs until cancelled or the command channel closes, then returns the
    /// session. Tutor calls and runs still in flight are aborted.
    pub async fn run(self, mut inputs: SessionInputs) -> LessonSession {
        let Self {
            mut session,
            tutor,
            runner,
            cancel,
        } = self;

        let (tutor_tx, mut tutor_rx) = mpsc::unbounded_channel();
        let (run_tx, mut run_rx) = mpsc::unbounded_channel();
        let mut workers = Workers {
            tasks: JoinSet::new(),
            tutor_tasks: HashMap::new(),
            tutor_results: tutor_tx,
            run_results: run_tx,
            edit_deadline: None,
        };

        let second = Duration::from_secs(1);
        let mut clock = tokio::time::interval_at(Instant::now() + second, second);
        clock.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let effects = session.start();
        workers.perform(effects, &tutor, &runner);

        loop {
            let deadline = workers.edit_deadline;
            let effects = tokio::select! {
                () = cancel.cancelled() => break,
                command = inputs.commands.recv() => match command {
                    Some(command) => {
                        debug!(?command, "learner command");
                        session.handle_command(command)
                    }
                    None => break,
                },
                _ = clock.tick() => session.on_tick(),
                Some((turn_id, response)) = tutor_rx.recv() => {
                    session.on_tutor_response(turn_id, response);
                    Vec::new()
                }
                Some(result) = run_rx.recv() => session.on_run_completed(result),
                Some(event) = inputs.engine_events.recv() => {
                    session.on_engine_event(event);
                    Vec::new()
                }
                Some(voices) = inputs.voices.recv() => {
                    session.on_voices_changed(voices);
                    Vec::new()
                }
                Some(event) = inputs.transcripts.recv() => session.on_recognizer_event(event),
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    workers.edit_deadline = None;
                    session.on_edit_idle()
                }
            };
            workers.perform(effects, &tutor, &runner);
            workers.reap(&mut session);
        }

        workers.tasks.abort_all();
        session.shutdown();
        info!("session driver stopped");
        session
    }
}

impl Workers {
    fn perform(
        &mut self,
        effects: Vec<Effect>,
        tutor: &Arc<dyn TutorClient>,
        runner: &Arc<dyn CodeRunner>,
    ) {
        for effect in effects {
            match effect {
                Effect::InvokeTutor(request) => {
                    let tutor = Arc::clone(tutor);
                    let tx = self.tutor_results.clone();
                    let turn_id = request.turn_id;
                    let handle = self.tasks.spawn(async move {
                        let response = tutor.get_response(&request.context, &request.input).await;
                        let _ = tx.send((request.turn_id, response));
                    });
                    self.tutor_tasks.insert(handle.id(), turn_id);
                }
                Effect::RunCode { source } => {
                    let runner = Arc::clone(runner);
                    let tx = self.run_results.clone();
                    self.tasks.spawn(async move {
                        let result = runner.execute(&source).await;
                        let _ = tx.send(result);
                    });
                }
                Effect::ScheduleEditNudge { after } => {
                    self.edit_deadline = Some(Instant::now() + after);
                }
                Effect::CancelEditNudge => self.edit_deadline = None,
            }
        }
    }

    /// Collects finished tasks so the set does not grow for the whole
    /// lesson. A tutor task that died without replying frees the tutor.
    fn reap(&mut self, session: &mut LessonSession) {
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            let (id, failure) = match joined {
                Ok((id, ())) => (id, None),
                Err(e) => (e.id(), Some(e)),
            };
            let turn_id = self.tutor_tasks.remove(&id);
            let Some(e) = failure else { continue };
            error!(error = %e, tutor_turn = ?turn_id, "session task failed");
            if let Some(turn_id) = turn_id {
                session.on_tutor_failed(turn_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::config::LessonConfig;
    use crate::lesson::{Curriculum, LessonContext, Stage};
    use crate::session::SessionEvent;
    use crate::tts::{EngineUtterance, SynthesisEngine};
    use async_trait::async_trait;

    struct SilentEngine;

    impl SynthesisEngine for SilentEngine {
        fn speak(&mut self, _utterance: EngineUtterance) -> Result<(), String> {
            Ok(())
        }

        fn cancel(&mut self) {}
    }

    /// Never answers.
    struct StuckTutor;

    #[async_trait]
    impl TutorClient for StuckTutor {
        async fn get_response(&self, _context: &LessonContext, _input: &str) -> TutorResponse {
            std::future::pending().await
        }
    }

    /// Crashes on every call.
    struct PanickingTutor;

    #[async_trait]
    impl TutorClient for PanickingTutor {
        async fn get_response(&self, _context: &LessonContext, _input: &str) -> TutorResponse {
            panic!("tutor crashed")
        }
    }

    struct NoRunner;

    #[async_trait]
    impl CodeRunner for NoRunner {
        fn is_ready(&self) -> bool {
            false
        }

        async fn execute(&self, _source: &str) -> RunResult {
            RunResult::not_ready()
        }
    }

    #[tokio::test]
    async fn cancellation_stops_loop_with_tutor_in_flight() {
        let session = LessonSession::new(
            LessonConfig::default(),
            Curriculum::builtin().unwrap(),
            Box::new(SilentEngine),
        );
        let driver = SessionDriver::new(session, Arc::new(StuckTutor), Arc::new(NoRunner));
        let cancel = driver.cancel_token();

        let (_commands_tx, commands) = mpsc::channel(8);
        let (_engine_tx, engine_events) = mpsc::unbounded_channel();
        let (_voices_tx, voices) = mpsc::channel(1);
        let (_stt_tx, transcripts) = mpsc::unbounded_channel();
        let handle = tokio::spawn(driver.run(SessionInputs {
            commands,
            engine_events,
            voices,
            transcripts,
        }));

        cancel.cancel();
        let session = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("driver should stop")
            .unwrap();
        assert!(session.is_tutor_busy());
        assert_eq!(session.context().chat_turns, 1);
    }

    #[tokio::test]
    async fn crashed_tutor_call_does_not_leave_tutor_busy() {
        let session = LessonSession::new(
            LessonConfig::default(),
            Curriculum::builtin().unwrap(),
            Box::new(SilentEngine),
        );
        let mut events = session.subscribe();
        let driver = SessionDriver::new(session, Arc::new(PanickingTutor), Arc::new(NoRunner));

        let (commands_tx, commands) = mpsc::channel(8);
        let (_engine_tx, engine_events) = mpsc::unbounded_channel();
        let (_voices_tx, voices) = mpsc::channel(1);
        let (_stt_tx, transcripts) = mpsc::unbounded_channel();
        let handle = tokio::spawn(driver.run(SessionInputs {
            commands,
            engine_events,
            voices,
            transcripts,
        }));

        let response = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let SessionEvent::TutorResponded(response) = events.recv().await.unwrap() {
                    return response;
                }
            }
        })
        .await
        .expect("the failed turn should be answered");
        assert_eq!(*response, TutorResponse::failure(Stage::Discover));

        drop(commands_tx);
        let session = handle.await.unwrap();
        assert!(!session.is_tutor_busy());
    }
}

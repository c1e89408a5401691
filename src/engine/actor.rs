//! Engine task: owns conversation, listening session and turn pipeline

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::debounce::Debouncer;
use super::{Command, EngineConfig, EngineEvent, EngineState, RelistenPolicy};
use crate::chat::ChatCompletion;
use crate::conversation::{Conversation, ConversationTurn};
use crate::voice::{SpeechSink, TranscriptSource, TranscriptStream, TranscriptUpdate};
use crate::{Error, Result};

/// External collaborators driven by the engine
pub struct Seams {
    pub source: Arc<dyn TranscriptSource>,
    pub chat: Arc<dyn ChatCompletion>,
    pub sink: Arc<dyn SpeechSink>,
}

/// Asynchronous results fed back into the engine task
enum Input {
    Transcript {
        session: u64,
        update: Result<TranscriptUpdate>,
    },
    TranscriptClosed {
        session: u64,
    },
    DebounceElapsed {
        session: u64,
        generation: u64,
    },
    Completion {
        request: u64,
        result: Result<ConversationTurn>,
    },
    PlaybackDone {
        playback: u64,
        result: Result<()>,
    },
}

/// The active microphone capture and the utterance it is producing
struct ListeningSession {
    id: u64,
    partial_text: String,
    is_final: bool,
    forwarder: JoinHandle<()>,
}

struct PendingCompletion {
    id: u64,
    task: JoinHandle<()>,
}

/// Reply being spoken; the task is aborted on barge-in so a speak call
/// that has not started yet can never begin after the interrupt
struct PendingPlayback {
    id: u64,
    task: JoinHandle<()>,
}

pub struct Actor {
    config: EngineConfig,
    seams: Seams,
    conversation: Conversation,
    state: EngineState,
    state_tx: watch::Sender<EngineState>,
    events: broadcast::Sender<EngineEvent>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    inputs_rx: mpsc::UnboundedReceiver<Input>,
    session: Option<ListeningSession>,
    debounce: Debouncer,
    completion: Option<PendingCompletion>,
    playback: Option<PendingPlayback>,
    /// Caller waiting on a single-turn recognition
    once: Option<oneshot::Sender<Result<String>>>,
    next_id: u64,
}

impl Actor {
    pub fn new(
        config: EngineConfig,
        seams: Seams,
        state_tx: watch::Sender<EngineState>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();

        Self {
            conversation: Conversation::new(config.system_prompt.clone()),
            debounce: Debouncer::new(config.debounce),
            config,
            seams,
            state: EngineState::Idle,
            state_tx,
            events,
            inputs_tx,
            inputs_rx,
            session: None,
            completion: None,
            playback: None,
            once: None,
            next_id: 0,
        }
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::debug!(
            debounce_ms = self.config.debounce.as_millis(),
            relisten = ?self.config.relisten,
            "turn engine started"
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(input) = self.inputs_rx.recv() => self.handle_input(input).await,
            }
        }

        self.teardown();
        tracing::debug!("turn engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => {
                if self.state == EngineState::Idle {
                    self.begin_listening().await;
                } else {
                    tracing::debug!(state = %self.state, "start ignored");
                }
            }
            Command::Stop => self.stop(),
            Command::RecognizeOnce(reply) => {
                if self.state != EngineState::Idle {
                    let _ = reply.send(Err(Error::Relay(format!(
                        "engine is busy ({})",
                        self.state
                    ))));
                    return;
                }
                self.once = Some(reply);
                self.begin_listening().await;
            }
            Command::Conversation(reply) => {
                let _ = reply.send(self.conversation.turns().to_vec());
            }
            Command::Shutdown => {}
        }
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Transcript { session, update } => {
                if !self.is_current_session(session) {
                    tracing::trace!(session, "stale transcript update dropped");
                    return;
                }
                if self.state == EngineState::Speaking {
                    self.barge_in();
                }
                match update {
                    Ok(update) => self.on_transcript(update),
                    Err(e) => self.fail(e),
                }
            }
            Input::TranscriptClosed { session } => {
                if self.is_current_session(session) {
                    self.fail(Error::RecognitionUnavailable(
                        "transcript stream ended".to_string(),
                    ));
                }
            }
            Input::DebounceElapsed {
                session,
                generation,
            } => {
                if self.state != EngineState::Listening
                    || !self.is_current_session(session)
                    || !self.debounce.is_current(generation)
                {
                    return;
                }
                self.debounce.clear();

                let has_text = self
                    .session
                    .as_ref()
                    .is_some_and(|s| !s.partial_text.trim().is_empty());
                if has_text {
                    tracing::debug!("silence interval elapsed, finalizing utterance");
                    self.finalize_utterance();
                }
            }
            Input::Completion { request, result } => {
                if self.state != EngineState::AwaitingCompletion
                    || self.completion.as_ref().map(|c| c.id) != Some(request)
                {
                    tracing::debug!(request, "stale completion dropped");
                    return;
                }
                self.completion = None;

                match result {
                    Ok(reply) => self.on_reply(reply).await,
                    Err(e) => self.fail(e),
                }
            }
            Input::PlaybackDone { playback, result } => {
                if self.state != EngineState::Speaking
                    || self.playback.as_ref().map(|p| p.id) != Some(playback)
                {
                    return;
                }
                self.playback = None;

                if let Err(e) = result {
                    tracing::warn!(error = %e, "speech output failed");
                    self.emit_error(&e);
                }
                self.resume_listening().await;
            }
        }
    }

    /// Idle → Listening
    async fn begin_listening(&mut self) {
        match self.acquire_source().await {
            Ok(()) => self.set_state(EngineState::Listening),
            Err(e) => self.fail(e),
        }
    }

    /// Speaking → Listening once playback completes
    async fn resume_listening(&mut self) {
        if self.session.is_none() {
            if let Err(e) = self.acquire_source().await {
                self.fail(e);
                return;
            }
        }
        self.set_state(EngineState::Listening);
    }

    fn on_transcript(&mut self, update: TranscriptUpdate) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.partial_text.clone_from(&update.text);
        session.is_final = update.is_final;
        let session_id = session.id;

        tracing::debug!(text = %update.text, is_final = update.is_final, "transcript");
        self.emit(EngineEvent::Transcript {
            text: update.text.clone(),
        });

        if update.is_final && !update.text.trim().is_empty() {
            self.finalize_utterance();
            return;
        }

        let inputs = self.inputs_tx.clone();
        self.debounce.arm(move |generation| {
            let _ = inputs.send(Input::DebounceElapsed {
                session: session_id,
                generation,
            });
        });
    }

    /// Listening → AwaitingCompletion (or → Idle for a single-turn request)
    fn finalize_utterance(&mut self) {
        let text = self
            .session
            .as_ref()
            .map(|s| s.partial_text.clone())
            .unwrap_or_default();
        self.release_source();

        tracing::info!(text = %text, "utterance finalized");
        self.emit(EngineEvent::UtteranceFinalized { text: text.clone() });

        if let Some(reply) = self.once.take() {
            let _ = reply.send(Ok(text));
            self.set_state(EngineState::Idle);
            return;
        }

        self.set_state(EngineState::AwaitingCompletion);
        let turn = self.conversation.push_user(text).clone();
        self.emit(EngineEvent::TurnAppended { turn });

        let turns = self.conversation.turns().to_vec();
        let chat = Arc::clone(&self.seams.chat);
        let timeout = self.config.completion_timeout;
        let inputs = self.inputs_tx.clone();
        let request = self.next_id();

        let task = tokio::spawn(async move {
            let result = tokio::time::timeout(timeout, chat.complete(&turns))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Connectivity(format!(
                        "no response within {}s",
                        timeout.as_secs_f64()
                    )))
                });
            let _ = inputs.send(Input::Completion { request, result });
        });

        self.completion = Some(PendingCompletion { id: request, task });
    }

    /// AwaitingCompletion → Speaking
    async fn on_reply(&mut self, reply: ConversationTurn) {
        let turn = self.conversation.push_assistant(reply.content).clone();
        tracing::info!(response_len = turn.content.len(), "assistant replied");
        self.emit(EngineEvent::TurnAppended { turn: turn.clone() });

        self.set_state(EngineState::Speaking);

        if self.config.relisten == RelistenPolicy::DuringPlayback {
            if let Err(e) = self.acquire_source().await {
                // Retried when playback completes
                tracing::warn!(error = %e, "could not resume listening during playback");
            }
        }

        let sink = Arc::clone(&self.seams.sink);
        let inputs = self.inputs_tx.clone();
        let playback = self.next_id();

        let task = tokio::spawn(async move {
            let result = sink.speak(&turn.content).await;
            let _ = inputs.send(Input::PlaybackDone { playback, result });
        });

        self.playback = Some(PendingPlayback { id: playback, task });
    }

    /// Halt playback because the person started talking
    fn barge_in(&mut self) {
        tracing::info!("barge-in, interrupting playback");
        self.halt_playback();
        self.set_state(EngineState::Listening);
    }

    /// Any state → Idle on request
    fn stop(&mut self) {
        let heard = self
            .session
            .as_ref()
            .map(|s| s.partial_text.clone())
            .unwrap_or_default();

        self.abort_turn();

        if let Some(reply) = self.once.take() {
            let _ = reply.send(Ok(heard));
        }
        self.set_state(EngineState::Idle);
    }

    /// Any state → Idle after an error
    fn fail(&mut self, error: Error) {
        tracing::warn!(error = %error, kind = ?error.kind(), state = %self.state, "turn aborted");

        self.abort_turn();
        self.emit_error(&error);

        if let Some(reply) = self.once.take() {
            let _ = reply.send(Err(error));
        }
        self.set_state(EngineState::Idle);
    }

    /// Release every resource tied to the in-flight turn
    fn abort_turn(&mut self) {
        self.release_source();

        if let Some(pending) = self.completion.take() {
            pending.task.abort();
        }
        self.halt_playback();
    }

    fn halt_playback(&mut self) {
        if let Some(pending) = self.playback.take() {
            pending.task.abort();
            self.seams.sink.interrupt();
        }
    }

    fn teardown(&mut self) {
        self.abort_turn();
        if let Some(reply) = self.once.take() {
            let _ = reply.send(Err(Error::EngineStopped));
        }
        self.set_state(EngineState::Idle);
    }

    /// Start a new listening session, replacing any prior one
    async fn acquire_source(&mut self) -> Result<()> {
        self.release_source();

        let stream = self.seams.source.begin().await?;
        let id = self.next_id();
        let forwarder = tokio::spawn(forward_transcripts(id, stream, self.inputs_tx.clone()));

        self.session = Some(ListeningSession {
            id,
            partial_text: String::new(),
            is_final: false,
            forwarder,
        });
        tracing::debug!(session = id, "transcript source acquired");
        Ok(())
    }

    /// End the listening session and disarm the debounce timer
    fn release_source(&mut self) {
        self.debounce.cancel();

        if let Some(session) = self.session.take() {
            session.forwarder.abort();
            self.seams.source.end();
            tracing::debug!(
                session = session.id,
                was_final = session.is_final,
                "transcript source released"
            );
        }
    }

    fn is_current_session(&self, id: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id)
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state == state {
            return;
        }
        tracing::info!(from = %self.state, to = %state, "engine state");
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(EngineEvent::StateChanged { state });
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_error(&self, error: &Error) {
        self.emit(EngineEvent::Error {
            kind: error.kind(),
            message: error.user_message(),
        });
    }

    const fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Relay one session's transcript stream into the engine inputs
async fn forward_transcripts(
    session: u64,
    mut stream: TranscriptStream,
    inputs: mpsc::UnboundedSender<Input>,
) {
    while let Some(update) = stream.recv().await {
        if inputs.send(Input::Transcript { session, update }).is_err() {
            return;
        }
    }
    let _ = inputs.send(Input::TranscriptClosed { session });
}

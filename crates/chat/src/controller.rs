//! The single task that drives every turn of one conversation.
//!
//! Commands from the session handle and chunks from the active transport
//! stream meet in one `select!` loop, so the store has exactly one mutator and
//! listeners observe versions in order.

use std::sync::Arc;

use ray_llm::{
    ChatRequest, ChatTransport, ChunkEvent, ChunkStream, DisconnectedSnafu, FrameDecoder,
    StreamErrorKind, StreamEvent,
};
use snafu::{IntoError, ResultExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{
    BusySnafu, CancelledSnafu, EmptyBodySnafu, InvalidStateSnafu, MalformedFrameSnafu,
    RemoteSnafu, TransitionSnafu, TransportSnafu, TurnError, ValidationSnafu,
};
use crate::ids::{MessageId, TurnId};
use crate::session::TurnConfig;
use crate::store::ConversationStore;
use crate::transcript::validate_input;
use crate::turn::{TurnFailure, TurnTransition, TurnTransitionRejection};

pub(crate) enum Command {
    Submit {
        text: String,
        config: TurnConfig,
        reply: oneshot::Sender<Result<TurnId, TurnError>>,
    },
    Cancel {
        reply: oneshot::Sender<bool>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
}

/// Per-turn bookkeeping, dropped as soon as the turn resolves.
struct ActiveTurn {
    id: TurnId,
    stream: ChunkStream,
    decoder: FrameDecoder,
    worker: JoinHandle<()>,
    assistant_message_id: Option<MessageId>,
    delta_count: usize,
}

impl ActiveTurn {
    fn close(mut self) {
        self.stream.cancel();
        self.worker.abort();
    }
}

pub(crate) struct TurnController {
    transport: Arc<dyn ChatTransport>,
    store: ConversationStore,
    commands: mpsc::UnboundedReceiver<Command>,
    active: Option<ActiveTurn>,
    next_turn_id: u64,
}

impl TurnController {
    pub(crate) fn new(
        transport: Arc<dyn ChatTransport>,
        store: ConversationStore,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            transport,
            store,
            commands,
            active: None,
            next_turn_id: 1,
        }
    }

    pub(crate) async fn run(mut self) {
        tracing::debug!(
            conversation_id = %self.store.conversation_id(),
            transport = self.transport.name(),
            "turn controller started"
        );

        loop {
            tokio::select! {
                // Commands first so a cancel is never starved by a chunk flood.
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                chunk = next_chunk(&mut self.active) => self.handle_chunk(chunk),
            }
        }

        if let Some(turn) = self.active.take() {
            tracing::debug!(turn_id = %turn.id, "session closed with a turn in flight");
            turn.close();
        }
        tracing::debug!(
            conversation_id = %self.store.conversation_id(),
            "turn controller stopped"
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit {
                text,
                config,
                reply,
            } => {
                let _ = reply.send(self.submit(&text, config));
            }
            Command::Cancel { reply } => {
                let _ = reply.send(self.cancel());
            }
            Command::Reset { reply } => {
                self.reset();
                let _ = reply.send(());
            }
        }
    }

    fn submit(&mut self, text: &str, config: TurnConfig) -> Result<TurnId, TurnError> {
        let text = validate_input(text).context(ValidationSnafu { stage: "submit" })?;

        let turn_id = TurnId::new(self.next_turn_id);
        let status = match self.store.status().apply(TurnTransition::Submit(turn_id)) {
            Ok(status) => status,
            Err(TurnTransitionRejection::Busy { active }) => {
                return BusySnafu {
                    stage: "submit",
                    status: active,
                }
                .fail();
            }
            Err(rejection) => {
                return TransitionSnafu {
                    stage: "submit",
                    rejection,
                }
                .fail();
            }
        };

        self.store
            .transcript_mut()
            .append_user_message(text)
            .context(InvalidStateSnafu { stage: "submit" })?;
        self.next_turn_id += 1;
        self.store.set_status(status);
        self.store.commit();

        let request = ChatRequest::new(
            config.endpoint,
            config.model,
            self.store.transcript().to_wire_messages(),
        )
        .with_turn_id(turn_id.get())
        .with_conversation_id(self.store.conversation_id().to_string())
        .with_web_search(config.web_search);

        tracing::debug!(
            turn_id = %turn_id,
            model_id = request.model_id(),
            web_search = request.body.web_search,
            context_messages = request.body.messages.len(),
            "opening chat stream"
        );

        match self.transport.open(request) {
            Ok(handle) => {
                self.active = Some(ActiveTurn {
                    id: turn_id,
                    stream: handle.stream,
                    decoder: FrameDecoder::new(self.transport.wire_format()),
                    worker: tokio::spawn(handle.worker),
                    assistant_message_id: None,
                    delta_count: 0,
                });
            }
            // The turn has started; its failure is reported like any other.
            Err(source) => self.fail_turn(
                turn_id,
                TransportSnafu {
                    stage: "open-stream",
                }
                .into_error(source),
            ),
        }

        Ok(turn_id)
    }

    fn cancel(&mut self) -> bool {
        let Some(turn_id) = self.active_turn_id() else {
            return false;
        };

        self.fail_turn(turn_id, CancelledSnafu { stage: "cancel" }.build());
        true
    }

    fn reset(&mut self) {
        if let Some(turn) = self.active.take() {
            turn.close();
        }

        self.store.transcript_mut().clear();
        let idle = self
            .store
            .status()
            .apply(TurnTransition::Reset)
            .unwrap_or_default();
        self.store.set_status(idle);
        self.store.commit();
        tracing::debug!(conversation_id = %self.store.conversation_id(), "conversation reset");
    }

    fn handle_chunk(&mut self, chunk: Option<ChunkEvent>) {
        let Some(turn) = self.active.as_mut() else {
            tracing::warn!("dropping chunk with no active turn");
            return;
        };
        let turn_id = turn.id;

        match chunk {
            Some(ChunkEvent::Data(bytes)) => {
                let events = turn.decoder.feed(&bytes);
                self.apply_events(turn_id, events);
            }
            Some(ChunkEvent::End) => {
                let events = turn.decoder.finish();
                self.apply_events(turn_id, events);
                if self.active_turn_id() == Some(turn_id) {
                    self.finish_without_done(turn_id);
                }
            }
            Some(ChunkEvent::Failed(source)) => self.fail_turn(
                turn_id,
                TransportSnafu {
                    stage: "receive-chunk",
                }
                .into_error(source),
            ),
            None => self.fail_turn(
                turn_id,
                TransportSnafu {
                    stage: "receive-chunk",
                }
                .into_error(
                    DisconnectedSnafu {
                        stage: "receive-chunk",
                        details: "stream worker stopped without an end signal",
                    }
                    .build(),
                ),
            ),
        }
    }

    /// Applies decoded events in order and publishes them as one version.
    fn apply_events(&mut self, turn_id: TurnId, events: Vec<StreamEvent>) {
        let mut changed = false;

        for event in events {
            if self.active_turn_id() != Some(turn_id) {
                break;
            }

            match event {
                StreamEvent::RoleAnnounce(role) => {
                    tracing::trace!(turn_id = %turn_id, ?role, "role announced");
                    match self.ensure_streaming(turn_id) {
                        Ok(opened) => changed |= opened,
                        Err(error) => self.fail_turn(turn_id, error),
                    }
                }
                StreamEvent::ContentDelta(text) => {
                    if let Err(error) = self.ensure_streaming(turn_id) {
                        self.fail_turn(turn_id, error);
                        continue;
                    }
                    if self.store.transcript_mut().append_delta(&text)
                        && let Some(turn) = self.active.as_mut()
                    {
                        turn.delta_count += 1;
                        changed = true;
                    }
                }
                StreamEvent::Done => self.complete_turn(turn_id),
                StreamEvent::Error { kind, detail } => {
                    let error = match kind {
                        StreamErrorKind::MalformedFrame => MalformedFrameSnafu {
                            stage: "decode-frame",
                            detail,
                        }
                        .build(),
                        StreamErrorKind::Remote => RemoteSnafu {
                            stage: "decode-frame",
                            detail,
                        }
                        .build(),
                    };
                    self.fail_turn(turn_id, error);
                }
            }
        }

        // A turn that ended above already published everything.
        if changed && self.active_turn_id() == Some(turn_id) {
            self.store.commit();
        }
    }

    /// Opens the assistant message on the first decoded event. Returns true
    /// when it did.
    fn ensure_streaming(&mut self, turn_id: TurnId) -> Result<bool, TurnError> {
        let Some(turn) = self.active.as_mut() else {
            return Ok(false);
        };
        if turn.assistant_message_id.is_some() {
            return Ok(false);
        }

        let status = self
            .store
            .status()
            .apply(TurnTransition::FirstEvent(turn_id))
            .map_err(|rejection| {
                TransitionSnafu {
                    stage: "first-event",
                    rejection,
                }
                .build()
            })?;
        let message_id = self
            .store
            .transcript_mut()
            .begin_assistant_message()
            .context(InvalidStateSnafu {
                stage: "first-event",
            })?;

        self.store.set_status(status);
        turn.assistant_message_id = Some(message_id);
        tracing::debug!(turn_id = %turn_id, message_id = %message_id, "assistant message opened");
        Ok(true)
    }

    fn finish_without_done(&mut self, turn_id: TurnId) {
        let received_content = self
            .active
            .as_ref()
            .is_some_and(|turn| turn.delta_count > 0);

        if received_content {
            tracing::debug!(turn_id = %turn_id, "stream ended without a finish frame");
            self.complete_turn(turn_id);
        } else {
            self.fail_turn(
                turn_id,
                EmptyBodySnafu {
                    stage: "end-of-stream",
                }
                .build(),
            );
        }
    }

    fn complete_turn(&mut self, turn_id: TurnId) {
        let delta_count = self.active.as_ref().map_or(0, |turn| turn.delta_count);
        if delta_count == 0 {
            self.fail_turn(
                turn_id,
                EmptyBodySnafu {
                    stage: "complete-turn",
                }
                .build(),
            );
            return;
        }

        let status = match self.store.status().apply(TurnTransition::Complete(turn_id)) {
            Ok(status) => status,
            Err(rejection) => {
                let error = TransitionSnafu {
                    stage: "complete-turn",
                    rejection,
                }
                .build();
                self.fail_turn(turn_id, error);
                return;
            }
        };
        if let Err(source) = self.store.transcript_mut().finalize() {
            let error = InvalidStateSnafu {
                stage: "complete-turn",
            }
            .into_error(source);
            self.fail_turn(turn_id, error);
            return;
        }

        if let Some(turn) = self.active.take() {
            turn.close();
        }
        self.store.set_status(status);
        self.store.commit();
        tracing::debug!(turn_id = %turn_id, delta_count, "turn completed");
    }

    /// Ends the turn: `Failed` is published once, then the controller returns
    /// to `Idle`.
    fn fail_turn(&mut self, turn_id: TurnId, error: TurnError) {
        if let Some(turn) = self.active.take() {
            turn.close();
        }

        let kind = error.kind();
        let outcome = self.store.transcript_mut().abort(kind);

        if kind.is_surfaced() {
            tracing::error!(turn_id = %turn_id, ?kind, ?outcome, error = %error, "chat turn failed");
        } else {
            tracing::debug!(turn_id = %turn_id, ?outcome, "chat turn cancelled");
        }

        let failure = TurnFailure {
            turn_id,
            kind,
            message: error.to_string(),
        };
        match self.store.status().apply(TurnTransition::Fail(failure)) {
            Ok(status) => {
                self.store.set_status(status);
                self.store.commit();
            }
            Err(rejection) => {
                tracing::warn!(turn_id = %turn_id, ?rejection, "failure arrived for an inactive turn");
            }
        }

        let idle = self
            .store
            .status()
            .apply(TurnTransition::Acknowledge)
            .unwrap_or_default();
        self.store.set_status(idle);
        self.store.commit();
    }

    fn active_turn_id(&self) -> Option<TurnId> {
        self.active.as_ref().map(|turn| turn.id)
    }
}

async fn next_chunk(active: &mut Option<ActiveTurn>) -> Option<ChunkEvent> {
    match active {
        Some(turn) => turn.stream.recv().await,
        None => std::future::pending().await,
    }
}

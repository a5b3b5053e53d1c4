use std::sync::Arc;

use ray_llm::ChatTransport;
use tokio::sync::{mpsc, oneshot};

use crate::controller::{Command, TurnController};
use crate::error::{SessionClosedSnafu, TurnError};
use crate::ids::{ConversationId, TurnId};
use crate::store::{ConversationSnapshot, ConversationStore, StoreReader, Subscription};

/// Per-turn request parameters, forwarded in the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnConfig {
    pub endpoint: String,
    pub model: String,
    pub web_search: bool,
}

impl TurnConfig {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            web_search: false,
        }
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }
}

/// Handle to one conversation.
///
/// The conversation itself lives on a spawned controller task; dropping the
/// last handle stops that task and cancels any in-flight request. Must be
/// created inside a tokio runtime.
pub struct ChatSession {
    conversation_id: ConversationId,
    commands: mpsc::UnboundedSender<Command>,
    reader: StoreReader,
}

impl ChatSession {
    pub fn spawn(transport: Arc<dyn ChatTransport>) -> Self {
        Self::spawn_with_id(transport, ConversationId::new_v7())
    }

    pub fn spawn_with_id(transport: Arc<dyn ChatTransport>, conversation_id: ConversationId) -> Self {
        let store = ConversationStore::new(conversation_id);
        let reader = store.reader();
        let (commands, command_rx) = mpsc::unbounded_channel();

        tokio::spawn(TurnController::new(transport, store, command_rx).run());

        Self {
            conversation_id,
            commands,
            reader,
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Appends the user message and starts the turn.
    ///
    /// Resolves once the turn has started, not when the response ends.
    /// Validation and busy errors leave the conversation unchanged; every
    /// later failure is reported through the `Failed` snapshot instead.
    pub async fn submit(
        &self,
        text: impl Into<String>,
        config: TurnConfig,
    ) -> Result<TurnId, TurnError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Submit {
            text: text.into(),
            config,
            reply,
        })?;

        match response.await {
            Ok(result) => result,
            Err(_) => SessionClosedSnafu { stage: "submit" }.fail(),
        }
    }

    /// Cancels the in-flight turn, keeping any partial content. Returns false
    /// when nothing was in flight.
    pub async fn cancel(&self) -> bool {
        let (reply, response) = oneshot::channel();
        if self.send(Command::Cancel { reply }).is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Cancels any in-flight turn and clears the transcript.
    pub async fn reset(&self) -> Result<(), TurnError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Reset { reply })?;

        response
            .await
            .map_err(|_| SessionClosedSnafu { stage: "reset" }.build())
    }

    pub fn snapshot(&self) -> Arc<ConversationSnapshot> {
        self.reader.snapshot()
    }

    /// See [`StoreReader::subscribe`].
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConversationSnapshot) + Send + Sync + 'static,
    {
        self.reader.subscribe(listener)
    }

    pub fn reader(&self) -> StoreReader {
        self.reader.clone()
    }

    fn send(&self, command: Command) -> Result<(), TurnError> {
        self.commands.send(command).map_err(|_| {
            tracing::warn!(conversation_id = %self.conversation_id, "chat session is closed");
            SessionClosedSnafu {
                stage: "send-command",
            }
            .build()
        })
    }
}

use serde::{Deserialize, Serialize};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior transcript entry forwarded to the endpoint for context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl WireMessage {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
        }
    }
}

/// JSON body posted to the chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    pub id: String,
    pub messages: Vec<WireMessage>,
    pub model: String,
    pub web_search: bool,
}

/// Everything a transport needs to open one turn's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    /// Turn sequence number, used only for log correlation.
    pub turn_id: u64,
    pub endpoint: String,
    pub body: ChatRequestBody,
}

impl ChatRequest {
    pub fn new(
        endpoint: impl Into<String>,
        model_id: impl Into<String>,
        messages: Vec<WireMessage>,
    ) -> Self {
        Self {
            turn_id: 0,
            endpoint: endpoint.into(),
            body: ChatRequestBody {
                id: String::new(),
                messages,
                model: model_id.into(),
                web_search: false,
            },
        }
    }

    pub fn with_turn_id(mut self, turn_id: u64) -> Self {
        self.turn_id = turn_id;
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.body.id = conversation_id.into();
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.body.web_search = enabled;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.body.model
    }
}

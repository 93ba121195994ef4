use serde::{Deserialize, Serialize};

/// One message in the conversation transcript.
///
/// A turn's content is mutated in place only while its phase is `Streaming`;
/// once `Settled` or `Failed` it is immutable. Turns are exclusively owned by
/// a [`crate::session::ChatSession`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub phase: TurnPhase,
}

impl Turn {
    /// A freshly submitted user turn. It stays `Pending` until the assistant
    /// turn that tracks its outcome reaches a terminal phase.
    pub fn user(content: impl Into<String>) -> Self {
        Turn {
            role: Role::User,
            content: content.into(),
            phase: TurnPhase::Pending,
        }
    }

    /// The empty assistant placeholder appended alongside a user turn.
    pub fn assistant_placeholder() -> Self {
        Turn {
            role: Role::Assistant,
            content: String::new(),
            phase: TurnPhase::Streaming,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, TurnPhase::Settled | TurnPhase::Failed)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    Pending,
    Streaming,
    Settled,
    Failed,
}

/// Wire shape of one message in the chat request body: `{role, content}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        ChatMessage {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// One entry of the model listing endpoint. The backend returns either a bare
/// string ID or a descriptor object carrying an `id` field.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ModelEntry {
    Id(String),
    Descriptor { id: String },
}

impl ModelEntry {
    pub fn id(&self) -> &str {
        match self {
            ModelEntry::Id(id) => id,
            ModelEntry::Descriptor { id } => id,
        }
    }
}

/// Health check response. `online` reflects the HTTP status, not the body.
#[derive(Debug, Deserialize, Clone)]
pub struct HealthStatus {
    pub message: String,
    #[serde(default)]
    pub models: Option<Vec<ModelEntry>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(skip)]
    pub online: bool,
}

/// Error taxonomy for the chat path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Socket/network failure or a non-2xx HTTP status.
    #[error("network error: {0}")]
    Transport(String),

    /// Malformed JSON or text payload from the backend.
    #[error("malformed payload: {0}")]
    Parse(String),

    /// A submission was attempted while one is still in flight.
    #[error("a submission is already in flight")]
    Busy,

    /// The stream closed before a terminal signal.
    #[error("response ended before completion: {0}")]
    PrematureEnd(String),
}

//! Transcript message model.
//!
//! Constructors take `SystemTime` explicitly; callers own the clock.
//! A message that has reached a terminal status (`Final`/`Error`) is never
//! mutated again — only a full transcript reload replaces it.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;
use crate::NonEmptyString;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Parse a wire role tag. Unknown tags yield `None` so callers decide
    /// whether to skip or substitute.
    #[must_use]
    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// Which backend sub-agent produced an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentTag(String);

impl AgentTag {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Streaming lifecycle of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Dispatched, response not yet opened.
    Pending,
    /// Response opened, content accumulating.
    Streaming,
    Final,
    Error,
}

impl MessageStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Final | MessageStatus::Error)
    }
}

/// One entry in a conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    role: Role,
    content: String,
    timestamp: SystemTime,
    agent: Option<AgentTag>,
    status: MessageStatus,
}

impl Message {
    /// A complete user message. User text is whole at submit time, so the
    /// entry is born `Final`; the streaming statuses belong to assistant
    /// placeholders.
    #[must_use]
    pub fn user(content: NonEmptyString, timestamp: SystemTime) -> Self {
        Self {
            id: MessageId::fresh(),
            role: Role::User,
            content: content.into_inner(),
            timestamp,
            agent: None,
            status: MessageStatus::Final,
        }
    }

    #[must_use]
    pub fn system(content: NonEmptyString, timestamp: SystemTime) -> Self {
        Self {
            id: MessageId::fresh(),
            role: Role::System,
            content: content.into_inner(),
            timestamp,
            agent: None,
            status: MessageStatus::Final,
        }
    }

    /// An optimistic assistant placeholder for an outstanding request.
    #[must_use]
    pub fn assistant_pending(timestamp: SystemTime) -> Self {
        Self {
            id: MessageId::fresh(),
            role: Role::Assistant,
            content: String::new(),
            timestamp,
            agent: None,
            status: MessageStatus::Pending,
        }
    }

    /// A message restored from the durable store (always terminal).
    #[must_use]
    pub fn restored(
        id: MessageId,
        role: Role,
        content: String,
        timestamp: SystemTime,
        agent: Option<AgentTag>,
    ) -> Self {
        Self {
            id,
            role,
            content,
            timestamp,
            agent,
            status: MessageStatus::Final,
        }
    }

    #[must_use]
    pub fn id(&self) -> &MessageId {
        &self.id
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub const fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    #[must_use]
    pub fn agent(&self) -> Option<&AgentTag> {
        self.agent.as_ref()
    }

    #[must_use]
    pub const fn status(&self) -> MessageStatus {
        self.status
    }

    /// Transition `Pending -> Streaming` when the response opens.
    pub fn begin_streaming(&mut self) {
        if self.status == MessageStatus::Pending {
            self.status = MessageStatus::Streaming;
        }
    }

    /// Accumulate incremental content. No-op once terminal.
    pub fn append_chunk(&mut self, fragment: &str) {
        if !self.status.is_terminal() {
            self.content.push_str(fragment);
        }
    }

    /// Commit the authoritative final content. No-op once terminal.
    pub fn finalize(&mut self, content: String, agent: Option<AgentTag>) {
        if !self.status.is_terminal() {
            self.content = content;
            self.agent = agent;
            self.status = MessageStatus::Final;
        }
    }

    /// Settle with a synthetic error text. No-op once terminal.
    pub fn fail(&mut self, content: String) {
        if !self.status.is_terminal() {
            self.content = content;
            self.status = MessageStatus::Error;
        }
    }
}

/// Conversation metadata as listed by the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: crate::ConversationId,
    pub title: String,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub message_count: u64,
    pub last_message: Option<String>,
}

impl ConversationSummary {
    /// A thread that was created but never used: nothing to surface.
    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.message_count == 0 && self.last_message.is_none()
    }

    /// Update local metadata after a message lands in the transcript.
    pub fn record_message(&mut self, preview: &str, now: SystemTime) {
        self.message_count = self.message_count.saturating_add(1);
        self.last_message = Some(preview.to_owned());
        self.updated_at = now;
    }
}

//! Core state machine and session orchestration for Parley.
//!
//! [`ChatSession`] owns the conversation list, the active transcript, and at
//! most one outstanding send-message request. Everything runs on a
//! cooperative model: the caller drives [`ChatSession::pump`] from its event
//! loop, and the pump interleaves deadline checks with stream-event
//! consumption so that neither can starve the other.
//!
//! The crate splits by concern the way the pieces interlock:
//!
//! - [`turn`](crate::turn) (private) - per-request state machine types
//! - `streaming` - submit/pump/settle, the request lifecycle controller
//! - `session` - conversation CRUD and transcript management
//! - [`title`] - title derivation from the first user message

mod session;
mod streaming;
pub mod title;
mod turn;


pub use parley_protocol::{BackendClient, StreamEvent};
pub use parley_store::{PersistenceSync, StoreClient};
pub use parley_types::{
    AgentTag, ConversationId, ConversationSummary, Message, MessageStatus, NonEmptyString,
    RequestId, Role, StoreError, SubmitError, TransportError,
};

use std::time::Duration;

use crate::title::TitleRules;
use crate::turn::TurnState;

pub(crate) const STREAM_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Conversation-list previews keep this many characters of the last message.
pub(crate) const PREVIEW_MAX_CHARS: usize = 80;

/// Tunables the session takes from configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Reply deadline, measured from the moment the response stream opens.
    pub request_deadline: Duration,
    pub titles: TitleRules,
    /// Placeholder greeting shown when a transcript cannot be fetched.
    pub fallback_greeting: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_deadline: Duration::from_secs(30),
            titles: TitleRules::default(),
            fallback_greeting: "Hello! How can I help you today?".to_owned(),
        }
    }
}

/// What a single pump pass produced, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpEvent {
    /// The reply stream opened; the deadline timer is running.
    Opened,
    /// Incremental assistant text, already appended to the transcript tail.
    Delta(String),
    /// The outstanding request settled; the session is no longer busy.
    Settled(Settlement),
}

/// Terminal outcome of one request. Exactly one is produced per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The final frame was committed to the transcript.
    Committed,
    /// No final frame arrived within the deadline.
    TimedOut,
    /// The transport failed before the reply completed.
    Failed(TransportError),
}

/// A conversation session: thread list, active transcript, and the
/// lifecycle of at most one outstanding request.
#[derive(Debug)]
pub struct ChatSession {
    pub(crate) backend: BackendClient,
    pub(crate) store: StoreClient,
    pub(crate) sync: PersistenceSync,
    pub(crate) settings: SessionSettings,
    pub(crate) conversations: Vec<ConversationSummary>,
    pub(crate) active: Option<ConversationId>,
    pub(crate) transcript: Vec<Message>,
    pub(crate) turn: TurnState,
}

impl ChatSession {
    #[must_use]
    pub fn new(backend: BackendClient, store: StoreClient, settings: SessionSettings) -> Self {
        let sync = PersistenceSync::new(store.clone());
        Self {
            backend,
            store,
            sync,
            settings,
            conversations: Vec::new(),
            active: None,
            transcript: Vec::new(),
            turn: TurnState::Idle,
        }
    }

    /// Whether a request is outstanding. While busy, `submit` is rejected.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self.turn, TurnState::Active(_))
    }

    #[must_use]
    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// The in-memory transcript of the active conversation.
    #[must_use]
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    /// Conversations worth surfacing: threads that were created but never
    /// used (no messages, no preview) are filtered out.
    pub fn conversations(&self) -> impl Iterator<Item = &ConversationSummary> {
        self.conversations.iter().filter(|c| !c.is_unused())
    }

    #[must_use]
    pub fn title_of(&self, id: &ConversationId) -> Option<&str> {
        self.conversations
            .iter()
            .find(|c| &c.id == id)
            .map(|c| c.title.as_str())
    }

    pub(crate) fn summary_mut(&mut self, id: &ConversationId) -> Option<&mut ConversationSummary> {
        self.conversations.iter_mut().find(|c| &c.id == id)
    }
}

pub(crate) fn preview_of(content: &str) -> String {
    content.chars().take(PREVIEW_MAX_CHARS).collect()
}

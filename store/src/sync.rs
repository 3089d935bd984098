//! Best-effort write-through of transcript messages.

use parley_types::{AgentTag, ConversationId, Role};

use crate::StoreClient;

/// Fire-and-forget persistence of user/assistant messages.
///
/// Failures are logged and otherwise ignored: the store is authoritative and
/// the next transcript reload reconciles whatever was lost. There is no
/// retry (the wire format has no idempotency key to make one safe), so an
/// unsynced message that the store never saw is permanently dropped at the
/// next reload.
#[derive(Debug, Clone)]
pub struct PersistenceSync {
    store: StoreClient,
}

impl PersistenceSync {
    #[must_use]
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    /// Queue one message for write-through. Returns immediately; the write
    /// happens on a detached task.
    pub fn save(
        &self,
        conversation: &ConversationId,
        role: Role,
        content: &str,
        agent: Option<&AgentTag>,
    ) {
        let store = self.store.clone();
        let conversation = conversation.clone();
        let content = content.to_owned();
        let agent = agent.cloned();

        tokio::spawn(async move {
            if let Err(e) = store
                .append(&conversation, role, &content, agent.as_ref())
                .await
            {
                tracing::warn!(%conversation, role = role.as_str(), %e, "Message write-through failed");
            }
        });
    }
}

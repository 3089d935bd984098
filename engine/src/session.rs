//! Conversation list and transcript management.
//!
//! The durable store is ground truth. Local state is an optimistic copy:
//! renames apply locally first, transcripts are replaced wholesale on
//! select, and anything the store never saw disappears at the next reload.

use std::time::SystemTime;

use parley_types::{ConversationId, ConversationSummary, Message, NonEmptyString, StoreError};

use crate::ChatSession;

impl ChatSession {
    /// Create a new conversation, insert it at the head of the list, and
    /// make it active with an empty transcript.
    pub async fn create(&mut self) -> Result<ConversationId, StoreError> {
        self.cancel_active_turn();

        let id = self.store.create().await?;
        let now = SystemTime::now();
        self.conversations.insert(
            0,
            ConversationSummary {
                id: id.clone(),
                title: self.settings.titles.default_label.clone(),
                created_at: now,
                updated_at: now,
                message_count: 0,
                last_message: None,
            },
        );
        self.active = Some(id.clone());
        self.transcript.clear();
        tracing::debug!(%id, "Created conversation");
        Ok(id)
    }

    /// Replace the local conversation list with the store's.
    pub async fn refresh(&mut self) -> Result<(), StoreError> {
        self.conversations = self.store.list().await?;
        Ok(())
    }

    /// Make `id` active and load its canonical transcript, replacing the
    /// in-memory one wholesale - no merging with whatever was shown before.
    ///
    /// A fetch failure does not fail the operation: the user lands in an
    /// empty transcript with a greeting placeholder, and the next select
    /// retries the store.
    pub async fn select(&mut self, id: &ConversationId) {
        self.cancel_active_turn();
        self.active = Some(id.clone());

        match self.store.history(id).await {
            Ok(history) => {
                self.transcript = history;
            }
            Err(e) => {
                tracing::warn!(%id, %e, "Transcript fetch failed; showing greeting placeholder");
                self.transcript.clear();
                if let Ok(greeting) = NonEmptyString::new(self.settings.fallback_greeting.clone())
                {
                    self.transcript
                        .push(Message::system(greeting, SystemTime::now()));
                }
            }
        }
    }

    /// Rename a conversation. The local title changes immediately; the
    /// store write is fire-and-forget and a failure does not roll the local
    /// title back - the store's value wins again at the next reload.
    pub fn rename(&mut self, id: &ConversationId, title: String) {
        if let Some(summary) = self.summary_mut(id) {
            summary.title.clone_from(&title);
        }

        let store = self.store.clone();
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.rename(&id, &title).await {
                tracing::warn!(%id, %e, "Title write-through failed");
            }
        });
    }

    /// Delete a conversation. A store "not found" is already the outcome we
    /// wanted, so it is treated as success. Deleting the active conversation
    /// creates a replacement.
    pub async fn delete(&mut self, id: &ConversationId) -> Result<(), StoreError> {
        let was_active = self.active.as_ref() == Some(id);
        if was_active {
            self.cancel_active_turn();
        }

        self.store.delete(id).await?;
        self.conversations.retain(|c| &c.id != id);

        if was_active {
            self.active = None;
            self.transcript.clear();
            self.create().await?;
        }
        Ok(())
    }

    /// Ask the store to purge conversations with zero messages, then refresh
    /// the local list from the result. If the active conversation was among
    /// the purged, the session ends up with no active thread; the next
    /// submit creates one.
    pub async fn cleanup(&mut self) -> Result<u64, StoreError> {
        let deleted = self.store.cleanup().await?;
        self.refresh().await?;

        let active_purged = match &self.active {
            Some(active) => !self.conversations.iter().any(|c| &c.id == active),
            None => false,
        };
        if active_purged {
            self.active = None;
            self.transcript.clear();
        }
        tracing::debug!(deleted, "Purged empty conversations");
        Ok(deleted)
    }
}

//! Durable conversation store client.
//!
//! The store is ground truth: every transcript shown to the user is
//! re-derived from it on `history`, and local state is only ever an
//! optimistic copy. All operations speak JSON over HTTP; timestamps travel
//! as epoch milliseconds.
//!
//! Failure classification mirrors the transport taxonomy: 404 is
//! [`StoreError::NotFound`] (which `delete` treats as success), any other
//! non-success status is [`StoreError::Http`], and connection-level failures
//! are [`StoreError::Unreachable`].

mod sync;

pub use sync::PersistenceSync;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use parley_protocol::http_client;
use parley_types::{
    AgentTag, ConversationId, ConversationSummary, Message, MessageId, Role, StoreError,
    UNREADABLE_RESPONSE,
};

fn millis_to_system_time(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

/// Normalize wire content to text the same way the reply stream does:
/// strings pass, anything else degrades to the placeholder.
fn normalize_wire_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        _ => UNREADABLE_RESPONSE.to_owned(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    conversation_id: ConversationId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireConversation {
    id: ConversationId,
    #[serde(default)]
    title: String,
    #[serde(default)]
    created_at: u64,
    #[serde(default)]
    updated_at: u64,
    #[serde(default)]
    message_count: u64,
    #[serde(default)]
    last_message: Option<String>,
}

impl From<WireConversation> for ConversationSummary {
    fn from(wire: WireConversation) -> Self {
        Self {
            id: wire.id,
            title: wire.title,
            created_at: millis_to_system_time(wire.created_at),
            updated_at: millis_to_system_time(wire.updated_at),
            message_count: wire.message_count,
            last_message: wire.last_message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    conversations: Vec<WireConversation>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    id: MessageId,
    role: String,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    agent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<WireMessage>,
}

#[derive(Debug, Serialize)]
struct RenameBody<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct AppendBody<'a> {
    role: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CleanupResponse {
    #[serde(default)]
    deleted_count: u64,
}

/// HTTP client for the conversation store.
#[derive(Debug, Clone)]
pub struct StoreClient {
    base: String,
    client: reqwest::Client,
}

impl StoreClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base: base_url.into(),
            client: http_client().clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base.trim_end_matches('/'))
    }

    async fn check(
        result: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<reqwest::Response, StoreError> {
        let response = result.map_err(|e| StoreError::Unreachable(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status.as_u16() == 404 {
            Err(StoreError::NotFound)
        } else {
            Err(StoreError::Http {
                status: status.as_u16(),
            })
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// Create a new conversation and return its store-assigned id.
    pub async fn create(&self) -> Result<ConversationId, StoreError> {
        let response =
            Self::check(self.client.post(self.url("/conversations")).send().await).await?;
        let created: CreateResponse = Self::decode(response).await?;
        Ok(created.conversation_id)
    }

    /// Fetch every conversation the store knows about.
    pub async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        let response =
            Self::check(self.client.get(self.url("/conversations")).send().await).await?;
        let listed: ListResponse = Self::decode(response).await?;
        Ok(listed.conversations.into_iter().map(Into::into).collect())
    }

    /// Fetch the canonical transcript for one conversation.
    ///
    /// Rows with an unknown role tag are skipped with a warning rather than
    /// failing the whole reload; non-text content degrades to the shared
    /// placeholder.
    pub async fn history(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let url = self.url(&format!("/conversations/{id}/messages"));
        let response = Self::check(self.client.get(url).send().await).await?;
        let history: HistoryResponse = Self::decode(response).await?;

        let mut messages = Vec::with_capacity(history.messages.len());
        for wire in history.messages {
            let Some(role) = Role::from_wire(&wire.role) else {
                tracing::warn!(id = %wire.id, role = %wire.role, "Skipping history row with unknown role");
                continue;
            };
            messages.push(Message::restored(
                wire.id,
                role,
                normalize_wire_content(&wire.content),
                millis_to_system_time(wire.timestamp),
                wire.agent.map(AgentTag::new),
            ));
        }
        Ok(messages)
    }

    pub async fn rename(&self, id: &ConversationId, title: &str) -> Result<(), StoreError> {
        let url = self.url(&format!("/conversations/{id}/title"));
        Self::check(
            self.client
                .put(url)
                .json(&RenameBody { title })
                .send()
                .await,
        )
        .await?;
        Ok(())
    }

    /// Delete a conversation. A store 404 means the conversation is already
    /// gone, which is the outcome the caller wanted - idempotent success.
    pub async fn delete(&self, id: &ConversationId) -> Result<(), StoreError> {
        let url = self.url(&format!("/conversations/{id}"));
        match Self::check(self.client.delete(url).send().await).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound) => {
                tracing::debug!(%id, "Delete of missing conversation treated as success");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Purge every conversation with zero messages. Returns how many the
    /// store removed.
    pub async fn cleanup(&self) -> Result<u64, StoreError> {
        let response = Self::check(
            self.client
                .post(self.url("/conversations/cleanup"))
                .send()
                .await,
        )
        .await?;
        let cleaned: CleanupResponse = Self::decode(response).await?;
        Ok(cleaned.deleted_count)
    }

    /// Append one message to a conversation's durable transcript.
    pub async fn append(
        &self,
        id: &ConversationId,
        role: Role,
        content: &str,
        agent: Option<&AgentTag>,
    ) -> Result<(), StoreError> {
        let url = self.url(&format!("/conversations/{id}/messages"));
        Self::check(
            self.client
                .post(url)
                .json(&AppendBody {
                    role: role.as_str(),
                    content,
                    agent: agent.map(AgentTag::as_str),
                })
                .send()
                .await,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::StoreClient;
    use parley_types::{ConversationId, MessageStatus, Role, StoreError, UNREADABLE_RESPONSE};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn create_returns_store_assigned_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"conversationId": "c-42"})),
            )
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        let id = store.create().await.unwrap();
        assert_eq!(id.as_str(), "c-42");
    }

    #[tokio::test]
    async fn list_maps_wire_summaries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "conversations": [
                    {
                        "id": "c-1",
                        "title": "Math help",
                        "createdAt": 1_700_000_000_000_u64,
                        "updatedAt": 1_700_000_100_000_u64,
                        "messageCount": 4,
                        "lastMessage": "See you!"
                    },
                    {"id": "c-2"}
                ]
            })))
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].title, "Math help");
        assert_eq!(listed[0].message_count, 4);
        assert!(listed[1].is_unused());
    }

    #[tokio::test]
    async fn history_skips_unknown_roles_and_normalizes_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations/c-1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [
                    {"id": "m-1", "role": "user", "content": "hi", "timestamp": 1_700_000_000_000_u64},
                    {"id": "m-2", "role": "moderator", "content": "hidden", "timestamp": 0},
                    {"id": "m-3", "role": "assistant", "content": {"blocks": []}, "timestamp": 0, "agent": "tutor"}
                ]
            })))
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        let history = store.history(&ConversationId::new("c-1")).await.unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role(), Role::User);
        assert_eq!(history[0].content(), "hi");
        assert_eq!(history[0].status(), MessageStatus::Final);
        assert_eq!(history[1].content(), UNREADABLE_RESPONSE);
        assert_eq!(history[1].agent().map(|a| a.as_str()), Some("tutor"));
    }

    #[tokio::test]
    async fn delete_treats_not_found_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/conversations/c-gone"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        let id = ConversationId::new("c-gone");
        store.delete(&id).await.unwrap();
        store.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn delete_propagates_server_faults() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/conversations/c-1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        let err = store.delete(&ConversationId::new("c-1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Http { status: 500 }));
    }

    #[tokio::test]
    async fn rename_sends_title_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/conversations/c-1/title"))
            .and(body_json(json!({"title": "Algebra"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        store
            .rename(&ConversationId::new("c-1"), "Algebra")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cleanup_reports_deleted_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations/cleanup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"deletedCount": 3})))
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        assert_eq!(store.cleanup().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn append_omits_null_agent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversations/c-1/messages"))
            .and(body_json(json!({"role": "user", "content": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let store = StoreClient::new(server.uri());
        store
            .append(&ConversationId::new("c-1"), Role::User, "hello", None)
            .await
            .unwrap();
    }
}

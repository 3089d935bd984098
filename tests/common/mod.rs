//! Shared helpers for integration tests: a mock store/backend origin.

use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mount the store endpoints every conversation round trip touches:
/// creation, the fire-and-forget title write, and message write-through.
pub async fn mount_store_basics(server: &MockServer, conversation_id: &str) {
    Mock::given(method("POST"))
        .and(path("/conversations"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "conversationId": conversation_id })),
        )
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path_regex(r"^/conversations/[^/]+/title$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex(r"^/conversations/[^/]+/messages$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(server)
        .await;
}

/// Serialize frame payloads into the wire form: `data: <json>` + blank line.
pub fn sse_body(payloads: &[&str]) -> String {
    payloads
        .iter()
        .map(|payload| format!("data: {payload}\n\n"))
        .collect()
}

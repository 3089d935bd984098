//! Full round trips through the public session API against a mock origin.

use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use parley_engine::{
    BackendClient, ChatSession, MessageStatus, NonEmptyString, PumpEvent, Role, SessionSettings,
    Settlement, StoreClient, SubmitError,
};

use crate::common;

fn session_for(server: &MockServer) -> ChatSession {
    ChatSession::new(
        BackendClient::new(server.uri()),
        StoreClient::new(server.uri()),
        SessionSettings::default(),
    )
}

/// Pump on a short cadence until the outstanding request settles.
async fn drive_until_settled(session: &mut ChatSession) -> Settlement {
    let give_up = Instant::now() + Duration::from_secs(5);
    loop {
        for event in session.pump(Instant::now()) {
            if let PumpEvent::Settled(settlement) = event {
                return settlement;
            }
        }
        assert!(Instant::now() < give_up, "request never settled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn create_submit_and_stream_round_trip() {
    let server = MockServer::start().await;
    common::mount_store_basics(&server, "c-1").await;

    let reply = common::sse_body(&[
        r#"{"type":"chunk","content":"He"}"#,
        r#"{"type":"chunk","content":"llo!"}"#,
        r#"{"type":"final","content":"Hello there!"}"#,
    ]);
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(reply, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session_for(&server);
    let conversation = session.create().await.unwrap();

    session
        .submit(NonEmptyString::new("Hello").unwrap())
        .await
        .unwrap();
    assert!(session.is_busy());

    let settlement = drive_until_settled(&mut session).await;
    assert_eq!(settlement, Settlement::Committed);

    let transcript = session.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role(), Role::User);
    assert_eq!(transcript[0].content(), "Hello");
    assert_eq!(transcript[1].role(), Role::Assistant);
    assert_eq!(transcript[1].content(), "Hello there!");
    assert_eq!(transcript[1].status(), MessageStatus::Final);

    assert_eq!(session.title_of(&conversation), Some("Hello"));
    assert!(!session.is_busy());
}

#[tokio::test]
async fn backend_fault_settles_with_error_message() {
    let server = MockServer::start().await;
    common::mount_store_basics(&server, "c-1").await;

    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let mut session = session_for(&server);
    session
        .submit(NonEmptyString::new("Hello?").unwrap())
        .await
        .unwrap();

    let settlement = drive_until_settled(&mut session).await;
    assert!(matches!(settlement, Settlement::Failed(_)));

    // One user message plus one synthetic assistant-role error message.
    let transcript = session.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].role(), Role::Assistant);
    assert_eq!(transcript[1].status(), MessageStatus::Error);
    assert!(transcript[1].content().contains("503"));
    assert!(!session.is_busy());
}

#[tokio::test]
async fn second_submit_while_streaming_is_rejected() {
    let server = MockServer::start().await;
    common::mount_store_basics(&server, "c-1").await;

    let reply = common::sse_body(&[r#"{"type":"final","content":"done"}"#]);
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(200))
                .set_body_raw(reply, "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut session = session_for(&server);
    session
        .submit(NonEmptyString::new("first").unwrap())
        .await
        .unwrap();

    // Rejected, not queued: the in-flight request is untouched.
    let second = session.submit(NonEmptyString::new("second").unwrap()).await;
    assert!(matches!(second, Err(SubmitError::Busy)));

    let settlement = drive_until_settled(&mut session).await;
    assert_eq!(settlement, Settlement::Committed);
    assert_eq!(session.transcript().len(), 2);
}

#[tokio::test]
async fn unused_threads_are_filtered_from_the_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversations": [
                {"id": "c-used", "title": "Algebra", "messageCount": 6, "lastMessage": "ok"},
                {"id": "c-empty", "title": "", "messageCount": 0}
            ]
        })))
        .mount(&server)
        .await;

    let mut session = session_for(&server);
    session.refresh().await.unwrap();

    let visible: Vec<&str> = session.conversations().map(|c| c.id.as_str()).collect();
    assert_eq!(visible, vec!["c-used"]);
}

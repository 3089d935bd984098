//! Streaming reply protocol for Parley.
//!
//! # Architecture
//!
//! The crate turns the backend's incrementally-delivered reply into discrete
//! semantic events:
//!
//! - [`FrameDecoder`] - splits raw transport fragments into [`StreamFrame`]s,
//!   tolerant of fragment boundaries landing anywhere
//! - [`Finalizer`] - guards the at-most-one-final invariant and classifies
//!   each frame into a [`Disposition`]
//! - [`BackendClient`] - drives the send-message endpoint and forwards
//!   decoded frames through a [`tokio::sync::mpsc::Sender<StreamEvent>`]
//!   channel to the request lifecycle controller
//!
//! # Events
//!
//! | Event | Description |
//! |-------|-------------|
//! | `Opened` | Response accepted; the reply stream is live |
//! | `Frame` | A decoded `chunk` or `final` frame |
//! | `Failed` | The reply cannot complete, classified by cause |
//!
//! # Error handling
//!
//! Protocol-level anomalies are recovered locally: a frame whose payload
//! fails to parse is skipped with a warning, and an unrecognized frame type
//! is ignored. Only transport-level failures (connection refused, non-success
//! status, premature close, truncation, buffer overflow) are delivered as
//! `StreamEvent::Failed`.

mod finalize;
mod ingest;

pub use finalize::{Disposition, DropReason, Finalizer};
pub use ingest::{FrameDecoder, FrameOverflow, TruncatedStream};
pub use parley_types::UNREADABLE_RESPONSE;

use std::sync::OnceLock;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;

use parley_types::{ConversationId, StreamFrame, TransportError};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Shared HTTP client for backend and store traffic.
///
/// Redirects are refused: both endpoints are same-origin APIs and a redirect
/// would silently re-route conversation content.
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build HTTP client: {e}. Falling back to defaults.");
                reqwest::Client::new()
            })
    })
}

/// One event on the reply channel, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The backend accepted the request and the reply stream is open.
    Opened,
    /// A decoded protocol frame.
    Frame(StreamFrame),
    /// The reply cannot complete.
    Failed(TransportError),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody<'a> {
    conversation_id: &'a ConversationId,
    text: &'a str,
}

/// Client for the send-message endpoint.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base: String,
    client: reqwest::Client,
}

impl BackendClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base: base_url.into(),
            client: http_client().clone(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat", self.base.trim_end_matches('/'))
    }

    /// Send one message and forward the decoded reply stream over `tx`.
    ///
    /// Every outcome is delivered as a `StreamEvent`; the returned future
    /// only ends early when the receiving side hangs up (the request was
    /// settled or cancelled), so callers spawn it and never poll a `Result`.
    ///
    /// Frames keep flowing after a `final` frame: duplicate-final protection
    /// belongs to the [`Finalizer`] on the consuming side, which sees every
    /// frame and drops the extras.
    pub async fn stream_reply(
        &self,
        conversation: &ConversationId,
        text: &str,
        tx: &mpsc::Sender<StreamEvent>,
    ) {
        let body = SendMessageBody {
            conversation_id: conversation,
            text,
        };

        let response = match self.client.post(self.chat_url()).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                let _ = tx.send(StreamEvent::Failed(classify_request_error(&e))).await;
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = read_capped_error_body(response).await;
            tracing::warn!(%status, body = %error_text, "Send-message request rejected");
            let _ = tx
                .send(StreamEvent::Failed(classify_status(status.as_u16())))
                .await;
            return;
        }

        if tx.send(StreamEvent::Opened).await.is_err() {
            return;
        }

        let mut decoder = FrameDecoder::new();
        let mut stream = response.bytes_stream();

        while let Some(next) = stream.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(StreamEvent::Failed(TransportError::Closed)).await;
                    tracing::warn!("Reply stream read failed: {e}");
                    return;
                }
            };

            let frames = match decoder.feed(&bytes) {
                Ok(frames) => frames,
                Err(FrameOverflow) => {
                    let _ = tx.send(StreamEvent::Failed(TransportError::Overflow)).await;
                    return;
                }
            };

            for frame in frames {
                if tx.send(StreamEvent::Frame(frame)).await.is_err() {
                    // Receiver settled or cancelled the request; stop reading.
                    return;
                }
            }
        }

        match decoder.close() {
            Ok(()) => {
                // Clean EOF. If no final frame arrived the consumer classifies
                // this as a closed-before-completion failure.
                let _ = tx.send(StreamEvent::Failed(TransportError::Closed)).await;
            }
            Err(TruncatedStream) => {
                let _ = tx.send(StreamEvent::Failed(TransportError::Truncated)).await;
            }
        }
    }
}

fn classify_request_error(error: &reqwest::Error) -> TransportError {
    TransportError::Unreachable(error.to_string())
}

fn classify_status(status: u16) -> TransportError {
    match status {
        404 => TransportError::NotFound,
        _ => TransportError::Server { status },
    }
}

async fn read_capped_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

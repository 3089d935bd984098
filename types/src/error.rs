//! Failure taxonomy shared across the workspace.
//!
//! Protocol-level anomalies (malformed frames, duplicate finals) are handled
//! where they occur and never become errors here; these types cover the
//! lifecycle- and transport-level failures that settle a request or fail a
//! store operation.

use thiserror::Error;

/// Why a streaming reply could not be completed.
///
/// Classified by cause where the cause is determinable; the variants map to
/// the synthetic error message appended to the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("conversation not found")]
    NotFound,
    #[error("server fault (status {status})")]
    Server { status: u16 },
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    /// The connection closed before a final frame arrived.
    #[error("connection closed before the reply completed")]
    Closed,
    /// The stream ended mid-frame: bytes were left in the carry-over buffer.
    #[error("reply stream was truncated mid-frame")]
    Truncated,
    /// Carry-over buffer exceeded its hard cap.
    #[error("reply stream exceeded the frame buffer limit")]
    Overflow,
}

/// A failed durable-store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("store returned status {status}")]
    Http { status: u16 },
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("malformed store response: {0}")]
    Decode(String),
}

/// Why a submit attempt was rejected at the call site.
///
/// Empty input is not represented here: submit takes a `NonEmptyString`,
/// so that rejection happens at the type boundary.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// A request is already outstanding for this conversation; new requests
    /// are rejected, not queued.
    #[error("a request is already in flight")]
    Busy,
    /// Could not create the conversation the message would belong to.
    #[error("failed to create conversation: {0}")]
    Create(#[from] StoreError),
}

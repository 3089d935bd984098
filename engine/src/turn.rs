//! Per-request state machine types.
//!
//! # State machine
//!
//! ```text
//! ┌──────┐ submit  ┌─────────────┐ Opened  ┌────────────────────┐
//! │ Idle │ ──────> │ Dispatching │ ──────> │ Streaming{deadline}│
//! └──────┘         └─────────────┘         └────────────────────┘
//!     ^                   │                        │
//!     │                   │ transport error        │ final frame /
//!     │                   v                        │ deadline elapse /
//!     │            [settle: exactly once] <────────┘ transport error /
//!     └─────────────────────┘                        cancellation
//! ```
//!
//! `Settled` is not a resting state: settlement runs inside a single pump
//! pass and leaves the session `Idle`. The [`Finalizer`] latch inside the
//! context is what makes settlement exactly-once - every path claims it
//! before touching the transcript, and late events referencing a claimed
//! context are discarded.

use std::time::Instant;

use futures_util::future::AbortHandle;
use tokio::sync::mpsc;

use parley_protocol::{Finalizer, StreamEvent};
use parley_types::{ConversationId, RequestId};

/// Bounded-lifetime state for one outstanding request.
#[derive(Debug)]
pub(crate) struct RequestContext {
    id: RequestId,
    conversation: ConversationId,
    dispatched_at: Instant,
    pub(crate) finalizer: Finalizer,
}

impl RequestContext {
    pub(crate) fn new(conversation: ConversationId, now: Instant) -> Self {
        Self {
            id: RequestId::fresh(),
            conversation,
            dispatched_at: now,
            finalizer: Finalizer::new(),
        }
    }

    pub(crate) fn id(&self) -> &RequestId {
        &self.id
    }

    pub(crate) fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    pub(crate) fn dispatched_at(&self) -> Instant {
        self.dispatched_at
    }
}

/// Where the request is in its lifecycle. The deadline only exists while
/// streaming - it starts when the response opens, not at dispatch.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TurnPhase {
    Dispatching,
    Streaming { deadline: Instant },
}

#[derive(Debug)]
pub(crate) struct ActiveTurn {
    pub(crate) context: RequestContext,
    pub(crate) phase: TurnPhase,
    pub(crate) rx: mpsc::Receiver<StreamEvent>,
    pub(crate) abort_handle: AbortHandle,
}

impl ActiveTurn {
    pub(crate) fn new(
        context: RequestContext,
        rx: mpsc::Receiver<StreamEvent>,
        abort_handle: AbortHandle,
    ) -> Self {
        Self {
            context,
            phase: TurnPhase::Dispatching,
            rx,
            abort_handle,
        }
    }

    /// Transition `Dispatching -> Streaming` and start the deadline timer.
    pub(crate) fn open(&mut self, deadline: Instant) {
        if matches!(self.phase, TurnPhase::Dispatching) {
            self.phase = TurnPhase::Streaming { deadline };
        }
    }

    pub(crate) fn deadline_elapsed(&self, now: Instant) -> bool {
        match self.phase {
            TurnPhase::Dispatching => false,
            TurnPhase::Streaming { deadline } => now >= deadline,
        }
    }

    /// Drain and discard everything still queued. Frames go through the
    /// settled finalizer so duplicate finals are logged, not silently lost.
    pub(crate) fn discard_queued(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            if let StreamEvent::Frame(frame) = event {
                let _ = self.context.finalizer.accept(frame);
            }
        }
    }
}

/// The session's request slot. One request per session; a second submit
/// while `Active` is rejected at the call site, never queued.
#[derive(Debug)]
pub(crate) enum TurnState {
    Idle,
    Active(ActiveTurn),
}

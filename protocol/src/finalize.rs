//! Exactly-once finalization of a streamed reply.

use parley_types::{AgentTag, StreamFrame};

/// What the lifecycle controller should do with a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Display/accumulate an incremental fragment.
    AppendChunk(String),
    /// Commit the single authoritative reply.
    Commit {
        content: String,
        agent: Option<AgentTag>,
    },
    /// Discard the frame.
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// A final frame arrived for an already-settled request.
    DuplicateFinal,
}

/// Per-request settlement latch.
///
/// The first terminal outcome - final frame, deadline elapse, transport
/// error, or cancellation - claims the latch; every later frame referencing
/// the same request is dropped. Chunk frames never touch the latch.
#[derive(Debug, Default)]
pub struct Finalizer {
    settled: bool,
}

impl Finalizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.settled
    }

    /// Claim the latch for a non-final outcome (timeout, error, cancel).
    ///
    /// Must run *before* any late frame can be inspected, so a final frame
    /// queued behind the deadline is dropped rather than committed.
    pub fn mark_settled(&mut self) {
        self.settled = true;
    }

    pub fn accept(&mut self, frame: StreamFrame) -> Disposition {
        match frame {
            StreamFrame::Chunk { content } => Disposition::AppendChunk(content),
            StreamFrame::Final { content, agent } => {
                if self.settled {
                    tracing::warn!("Dropping duplicate final frame for settled request");
                    Disposition::Drop(DropReason::DuplicateFinal)
                } else {
                    self.settled = true;
                    Disposition::Commit { content, agent }
                }
            }
        }
    }
}

//! Request lifecycle: dispatch, pumping, settlement.

use std::time::{Duration, Instant, SystemTime};

use futures_util::future::{AbortHandle, Abortable};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use parley_protocol::{Disposition, StreamEvent};
use parley_types::{
    AgentTag, ConversationId, Message, NonEmptyString, Role, SubmitError, TransportError,
};

use crate::turn::{ActiveTurn, RequestContext, TurnState};
use crate::{ChatSession, PumpEvent, STREAM_EVENT_CHANNEL_CAPACITY, Settlement, preview_of};

fn timeout_text(window: Duration) -> String {
    format!(
        "[No reply within {} seconds - the request timed out]",
        window.as_secs()
    )
}

fn transport_text(error: &TransportError) -> String {
    format!("[Reply failed: {error}]")
}

const CANCELLED_TEXT: &str = "[Cancelled]";

impl ChatSession {
    /// Submit one user message to the active conversation.
    ///
    /// Creates a conversation first if none is active. Rejected with
    /// [`SubmitError::Busy`] while a request is outstanding - new requests
    /// are never queued behind an in-flight one.
    pub async fn submit(&mut self, text: NonEmptyString) -> Result<(), SubmitError> {
        if self.is_busy() {
            return Err(SubmitError::Busy);
        }

        let conversation = match self.active.clone() {
            Some(id) => id,
            None => self.create().await?,
        };

        let now = SystemTime::now();
        let first_user_message = !self.transcript.iter().any(|m| m.role() == Role::User);

        let user_message = Message::user(text.clone(), now);
        self.sync
            .save(&conversation, Role::User, user_message.content(), None);
        if let Some(summary) = self.summary_mut(&conversation) {
            summary.record_message(&preview_of(user_message.content()), now);
        }
        self.transcript.push(user_message);

        if first_user_message {
            let title = crate::title::derive_title(text.as_str(), &self.settings.titles);
            self.rename(&conversation, title);
        }

        // Optimistic placeholder the stream fills in.
        self.transcript.push(Message::assistant_pending(now));

        let (tx, rx) = mpsc::channel(STREAM_EVENT_CHANNEL_CAPACITY);
        let (abort_handle, abort_registration) = AbortHandle::new_pair();

        let backend = self.backend.clone();
        let stream_conversation = conversation.clone();
        let stream_text = text.into_inner();
        let task = async move {
            backend
                .stream_reply(&stream_conversation, &stream_text, &tx)
                .await;
        };
        tokio::spawn(async move {
            let _ = Abortable::new(task, abort_registration).await;
        });

        let context = RequestContext::new(conversation, Instant::now());
        tracing::debug!(request = %context.id(), "Dispatched send-message request");
        self.turn = TurnState::Active(ActiveTurn::new(context, rx, abort_handle));
        Ok(())
    }

    /// Advance the outstanding request: check the deadline, then drain
    /// whatever the stream task has produced. Non-blocking; the caller's
    /// event loop decides the cadence.
    ///
    /// The deadline is checked *before* frames are drained, so a final frame
    /// queued behind an elapsed deadline is discarded, never committed.
    pub fn pump(&mut self, now: Instant) -> Vec<PumpEvent> {
        let TurnState::Active(mut turn) = std::mem::replace(&mut self.turn, TurnState::Idle)
        else {
            return Vec::new();
        };

        let mut events = Vec::new();

        if turn.deadline_elapsed(now) {
            turn.context.finalizer.mark_settled();
            turn.discard_queued();
            turn.abort_handle.abort();
            tracing::warn!(
                request = %turn.context.id(),
                elapsed_ms = now.duration_since(turn.context.dispatched_at()).as_millis(),
                "Request deadline elapsed"
            );
            self.fail_reply(timeout_text(self.settings.request_deadline));
            events.push(PumpEvent::Settled(Settlement::TimedOut));
            return events;
        }

        loop {
            match turn.rx.try_recv() {
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Stream task died without a terminal event.
                    turn.context.finalizer.mark_settled();
                    turn.abort_handle.abort();
                    tracing::warn!(request = %turn.context.id(), "Stream channel disconnected");
                    self.fail_reply(transport_text(&TransportError::Closed));
                    events.push(PumpEvent::Settled(Settlement::Failed(
                        TransportError::Closed,
                    )));
                    return events;
                }
                Ok(StreamEvent::Opened) => {
                    turn.open(now + self.settings.request_deadline);
                    if let Some(reply) = self.reply_in_progress() {
                        reply.begin_streaming();
                    }
                    events.push(PumpEvent::Opened);
                }
                Ok(StreamEvent::Frame(frame)) => match turn.context.finalizer.accept(frame) {
                    Disposition::AppendChunk(text) => {
                        if let Some(reply) = self.reply_in_progress() {
                            reply.append_chunk(&text);
                        }
                        events.push(PumpEvent::Delta(text));
                    }
                    Disposition::Commit { content, agent } => {
                        turn.abort_handle.abort();
                        let conversation = turn.context.conversation().clone();
                        self.commit_reply(&conversation, content, agent);
                        events.push(PumpEvent::Settled(Settlement::Committed));
                        return events;
                    }
                    Disposition::Drop(_) => {}
                },
                Ok(StreamEvent::Failed(error)) => {
                    turn.context.finalizer.mark_settled();
                    turn.abort_handle.abort();
                    tracing::warn!(request = %turn.context.id(), %error, "Reply stream failed");
                    self.fail_reply(transport_text(&error));
                    events.push(PumpEvent::Settled(Settlement::Failed(error)));
                    return events;
                }
            }
        }

        self.turn = TurnState::Active(turn);
        events
    }

    /// Tear down the outstanding request without touching the settled latch
    /// of any other context. Used when the user switches away mid-stream:
    /// the aborted task's late frames can then never reach a transcript.
    pub(crate) fn cancel_active_turn(&mut self) {
        let TurnState::Active(mut turn) = std::mem::replace(&mut self.turn, TurnState::Idle)
        else {
            return;
        };

        turn.context.finalizer.mark_settled();
        turn.abort_handle.abort();
        turn.discard_queued();
        tracing::debug!(request = %turn.context.id(), "Cancelled in-flight request");
        self.fail_reply(CANCELLED_TEXT.to_owned());
    }

    /// The assistant placeholder at the transcript tail, if still mutable.
    fn reply_in_progress(&mut self) -> Option<&mut Message> {
        self.transcript
            .last_mut()
            .filter(|m| m.role() == Role::Assistant && !m.status().is_terminal())
    }

    fn commit_reply(
        &mut self,
        conversation: &ConversationId,
        content: String,
        agent: Option<AgentTag>,
    ) {
        let now = SystemTime::now();
        if let Some(reply) = self.reply_in_progress() {
            reply.finalize(content.clone(), agent.clone());
        } else {
            tracing::warn!("Commit arrived with no reply placeholder in the transcript");
        }
        self.sync
            .save(conversation, Role::Assistant, &content, agent.as_ref());
        if let Some(summary) = self.summary_mut(conversation) {
            summary.record_message(&preview_of(&content), now);
        }
    }

    fn fail_reply(&mut self, text: String) {
        if let Some(reply) = self.reply_in_progress() {
            reply.fail(text);
        }
    }
}

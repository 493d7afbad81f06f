//! Per-session channel state, the token generator task, and the
//! subscriber-facing stream handles.

use crate::engine::{TokenEngine, TokenPayload};
use crate::live::SessionEvent;
use crate::models::SessionId;
use crate::store::SessionStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Fan-out state for one session.
pub(crate) struct SessionChannel {
    pub(crate) session_id: SessionId,
    /// Stats and close events. Bounded; slow receivers lose the oldest.
    pub(crate) events: broadcast::Sender<SessionEvent>,
    /// Latest token only. `None` when no generator is running.
    pub(crate) tokens: watch::Sender<Option<TokenPayload>>,
    /// Cancelled when the session closes.
    pub(crate) closed: CancellationToken,
    /// Serializes snapshot recompute and send so events go out in order.
    pub(crate) publish: tokio::sync::Mutex<()>,
    generator_running: Mutex<bool>,
}

impl SessionChannel {
    pub(crate) fn new(session_id: SessionId, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (tokens, _) = watch::channel(None);
        Self {
            session_id,
            events,
            tokens,
            closed: CancellationToken::new(),
            publish: tokio::sync::Mutex::new(()),
            generator_running: Mutex::new(false),
        }
    }

    /// Register a presenter. The returned flag is true when the caller must
    /// start the generator.
    pub(crate) fn attach_presenter(&self) -> (watch::Receiver<Option<TokenPayload>>, bool) {
        let mut running = self
            .generator_running
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let receiver = self.tokens.subscribe();
        let start = !*running;
        *running = true;
        (receiver, start)
    }

    /// Stop the generator if no presenter is left. Decided under the same
    /// lock as [`attach_presenter`](Self::attach_presenter), so a presenter
    /// arriving concurrently either keeps this generator or starts a new one.
    fn retire_if_idle(&self) -> bool {
        let mut running = self
            .generator_running
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if self.tokens.receiver_count() > 0 {
            return false;
        }
        *running = false;
        self.tokens.send_replace(None);
        true
    }

    fn retire(&self) {
        let mut running = self
            .generator_running
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *running = false;
        self.tokens.send_replace(None);
    }

    pub(crate) fn is_generating(&self) -> bool {
        *self
            .generator_running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// Generate a token every `period` while the session is active and at least
/// one presenter is attached.
#[instrument(skip_all, name = "rollcall.live.generator", fields(session_id = %channel.session_id))]
pub(crate) async fn run_generator(
    channel: Arc<SessionChannel>,
    engine: Arc<TokenEngine>,
    sessions: Arc<dyn SessionStore>,
    period: Duration,
) {
    let session_id = channel.session_id;
    debug!(target: "rollcall.live", session_id = %session_id, "Token generator started");

    loop {
        if channel.closed.is_cancelled() {
            channel.retire();
            return;
        }
        if channel.retire_if_idle() {
            debug!(
                target: "rollcall.live",
                session_id = %session_id,
                "No presenters left, token generator stopped"
            );
            return;
        }

        match sessions.get_session(session_id).await {
            Ok(Some(session)) if session.active => match engine.generate(session_id) {
                // Close cancels before discarding, so a close that raced
                // this tick is visible here
                Ok(_) if channel.closed.is_cancelled() => {
                    engine.discard(session_id);
                    channel.retire();
                    return;
                }
                Ok(payload) => {
                    channel.tokens.send_replace(Some(payload));
                }
                Err(e) => {
                    error!(
                        target: "rollcall.live",
                        session_id = %session_id,
                        error = %e,
                        "Token generation failed"
                    );
                }
            },
            Ok(_) => {
                info!(
                    target: "rollcall.live",
                    session_id = %session_id,
                    "Session no longer active, token generator stopped"
                );
                channel.retire();
                return;
            }
            Err(e) => {
                warn!(
                    target: "rollcall.live",
                    session_id = %session_id,
                    error = %e,
                    "Session lookup failed, skipping tick"
                );
            }
        }

        tokio::select! {
            () = channel.closed.cancelled() => {
                debug!(
                    target: "rollcall.live",
                    session_id = %session_id,
                    "Session closed, token generator stopped"
                );
                channel.retire();
                return;
            }
            () = tokio::time::sleep(period) => {}
        }
    }
}

/// Presenter-only stream of token payloads in generation order.
///
/// Undelivered tokens are superseded by newer ones rather than queued.
/// Dropping the stream detaches the presenter.
pub struct TokenStream {
    session_id: SessionId,
    tokens: watch::Receiver<Option<TokenPayload>>,
    closed: CancellationToken,
    primed: bool,
}

impl TokenStream {
    pub(crate) fn new(
        session_id: SessionId,
        tokens: watch::Receiver<Option<TokenPayload>>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            tokens,
            closed,
            primed: false,
        }
    }

    /// Session this stream belongs to.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Next token, or `None` once the session closes or generation stops.
    pub async fn next(&mut self) -> Option<TokenPayload> {
        if !self.primed {
            self.primed = true;
            if let Some(current) = self.tokens.borrow_and_update().clone() {
                return Some(current);
            }
        }

        loop {
            tokio::select! {
                biased;
                () = self.closed.cancelled() => return None,
                changed = self.tokens.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    match self.tokens.borrow_and_update().clone() {
                        Some(payload) => return Some(payload),
                        // Generator retired
                        None => return None,
                    }
                }
            }
        }
    }
}

/// Stats and lifecycle events for one subscriber.
///
/// Yields an initial snapshot first and ends after the session-closed event.
pub struct Subscription {
    session_id: SessionId,
    initial: Option<SessionEvent>,
    events: broadcast::Receiver<SessionEvent>,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(
        session_id: SessionId,
        initial: SessionEvent,
        events: broadcast::Receiver<SessionEvent>,
    ) -> Self {
        Self {
            session_id,
            initial: Some(initial),
            events,
            finished: false,
        }
    }

    /// Session this subscription belongs to.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Next event, or `None` after the session closed.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        if self.finished {
            return None;
        }
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }

        loop {
            match self.events.recv().await {
                Ok(event) => {
                    if matches!(event, SessionEvent::SessionClosed(_)) {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        target: "rollcall.live",
                        session_id = %self.session_id,
                        skipped = skipped,
                        "Slow subscriber dropped oldest events"
                    );
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

//! Registry of live session channels.
//!
//! Channels are created lazily on first subscription and torn down when the
//! session closes. Each session has its own channel, lock and generator, so
//! a slow subscriber or a busy session never holds up another session.

use crate::config::EngineConfig;
use crate::engine::TokenEngine;
use crate::live::stream::{run_generator, SessionChannel, Subscription, TokenStream};
use crate::live::SessionEvent;
use crate::models::{Session, SessionId};
use crate::stats::{SessionSummary, StatsSnapshot};
use crate::store::Stores;
use crate::AttendanceError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type Channels = RwLock<HashMap<SessionId, Arc<SessionChannel>>>;

/// Per-session fan-out of tokens and stats.
pub struct LiveHub {
    engine: Arc<TokenEngine>,
    stores: Stores,
    generation_period: Duration,
    event_buffer: usize,
    channels: Arc<Channels>,
}

impl LiveHub {
    /// Create an empty hub.
    pub fn new(engine: Arc<TokenEngine>, stores: Stores, config: &EngineConfig) -> Self {
        Self {
            engine,
            stores,
            generation_period: config.generation_period,
            event_buffer: config.event_buffer,
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe to stats and close events for an active session.
    pub async fn subscribe(&self, session_id: SessionId) -> Result<Subscription, AttendanceError> {
        // Subscribe before checking activity so a concurrent close cannot
        // slip between the check and the subscription unnoticed.
        let (channel, events) = self
            .attach(session_id, |channel| channel.events.subscribe())
            .await;

        let session = match self.active_session(session_id).await {
            Ok(session) => session,
            Err(e) => {
                drop(events);
                self.prune(session_id).await;
                return Err(e);
            }
        };

        let snapshot = match StatsSnapshot::load(
            &session,
            self.stores.directory.as_ref(),
            self.stores.attendance.as_ref(),
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                drop(events);
                self.prune(session_id).await;
                return Err(e);
            }
        };

        debug!(
            target: "rollcall.live",
            session_id = %session_id,
            subscribers = channel.events.receiver_count(),
            "Subscriber joined"
        );

        Ok(Subscription::new(
            session_id,
            SessionEvent::InitialStats(snapshot),
            events,
        ))
    }

    /// Attach a presenter to the session's token stream, starting the
    /// generator if none is running.
    pub async fn present(&self, session_id: SessionId) -> Result<TokenStream, AttendanceError> {
        let (channel, (tokens, start)) = self
            .attach(session_id, SessionChannel::attach_presenter)
            .await;

        if start {
            let generator = run_generator(
                Arc::clone(&channel),
                Arc::clone(&self.engine),
                Arc::clone(&self.stores.sessions),
                self.generation_period,
            );
            let channels = Arc::clone(&self.channels);
            tokio::spawn(async move {
                generator.await;
                prune_idle(&channels, session_id).await;
            });
        }

        // A generator started for a closed session retires on its first tick
        // and prunes the channel behind it
        if let Err(e) = self.active_session(session_id).await {
            drop(tokens);
            self.prune(session_id).await;
            return Err(e);
        }

        debug!(
            target: "rollcall.live",
            session_id = %session_id,
            started_generator = start,
            "Presenter joined"
        );

        Ok(TokenStream::new(session_id, tokens, channel.closed.clone()))
    }

    /// Recompute the snapshot and push it to every subscriber.
    ///
    /// Failures are logged; a stats push never fails the change that
    /// triggered it.
    pub async fn notify_attendance_changed(&self, session_id: SessionId) {
        let channel = match self.channels.read().await.get(&session_id) {
            Some(channel) => Arc::clone(channel),
            None => return,
        };
        if channel.events.receiver_count() == 0 {
            return;
        }

        let _publish = channel.publish.lock().await;
        match self.snapshot(session_id).await {
            Ok(snapshot) => {
                let delivered = channel
                    .events
                    .send(SessionEvent::AttendanceUpdated(snapshot))
                    .unwrap_or(0);
                debug!(
                    target: "rollcall.live",
                    session_id = %session_id,
                    delivered = delivered,
                    "Stats pushed"
                );
            }
            Err(e) => {
                warn!(
                    target: "rollcall.live",
                    session_id = %session_id,
                    error = %e,
                    "Failed to recompute stats"
                );
            }
        }
    }

    /// Broadcast the terminal event, stop the token stream and drop the
    /// session's channel.
    pub async fn close_session(&self, summary: SessionSummary) {
        let session_id = summary.id;
        let Some(channel) = self.channels.write().await.remove(&session_id) else {
            debug!(
                target: "rollcall.live",
                session_id = %session_id,
                "Session closed with no live subscribers"
            );
            return;
        };

        let _publish = channel.publish.lock().await;
        let delivered = channel
            .events
            .send(SessionEvent::SessionClosed(summary))
            .unwrap_or(0);
        channel.closed.cancel();

        info!(
            target: "rollcall.live",
            session_id = %session_id,
            delivered = delivered,
            "Session closed broadcast"
        );
    }

    /// Current snapshot for a session.
    pub async fn snapshot(&self, session_id: SessionId) -> Result<StatsSnapshot, AttendanceError> {
        let session = self
            .stores
            .sessions
            .get_session(session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound)?;
        StatsSnapshot::load(
            &session,
            self.stores.directory.as_ref(),
            self.stores.attendance.as_ref(),
        )
        .await
    }

    /// Number of event subscribers for a session.
    pub async fn subscriber_count(&self, session_id: SessionId) -> usize {
        self.channels
            .read()
            .await
            .get(&session_id)
            .map_or(0, |c| c.events.receiver_count())
    }

    /// Number of sessions with live channel state.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Whether a token generator is running for a session.
    pub async fn is_generating(&self, session_id: SessionId) -> bool {
        self.channels
            .read()
            .await
            .get(&session_id)
            .is_some_and(|c| c.is_generating())
    }

    async fn channel(&self, session_id: SessionId) -> Arc<SessionChannel> {
        if let Some(channel) = self.channels.read().await.get(&session_id) {
            return Arc::clone(channel);
        }

        let mut channels = self.channels.write().await;
        Arc::clone(
            channels
                .entry(session_id)
                .or_insert_with(|| Arc::new(SessionChannel::new(session_id, self.event_buffer))),
        )
    }

    /// Run `join` against the session's registered channel. Retries when the
    /// channel was pruned between lookup and join, so the returned channel
    /// is the one close and notify will reach.
    async fn attach<T>(
        &self,
        session_id: SessionId,
        join: impl Fn(&SessionChannel) -> T,
    ) -> (Arc<SessionChannel>, T) {
        loop {
            let channel = self.channel(session_id).await;
            let joined = join(&channel);
            let registered = self
                .channels
                .read()
                .await
                .get(&session_id)
                .is_some_and(|current| Arc::ptr_eq(current, &channel));
            if registered {
                return (channel, joined);
            }
        }
    }

    async fn active_session(&self, session_id: SessionId) -> Result<Session, AttendanceError> {
        let session = self
            .stores
            .sessions
            .get_session(session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound)?;
        if !session.active {
            return Err(AttendanceError::SessionClosed);
        }
        Ok(session)
    }

    async fn prune(&self, session_id: SessionId) {
        prune_idle(&self.channels, session_id).await;
    }
}

/// Drop a channel with no event subscribers and no running generator.
/// Token streams left on it have already ended.
async fn prune_idle(channels: &Channels, session_id: SessionId) {
    let mut channels = channels.write().await;
    let idle = channels
        .get(&session_id)
        .is_some_and(|c| c.events.receiver_count() == 0 && !c.is_generating());
    if idle {
        channels.remove(&session_id);
        debug!(
            target: "rollcall.live",
            session_id = %session_id,
            "Idle channel dropped"
        );
    }
}

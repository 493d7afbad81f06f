//! Attendance Manager - the main public API for Rollcall.
//!
//! The `AttendanceManager` wires the token engine, scan admission, session
//! lifecycle and live hub to one set of collaborators:
//! - Session creation and close with absent finalization
//! - Scan admission and instructor overrides
//! - Live token streams and stats subscriptions

use crate::admission::{ScanAdmission, ScanOutcome, ScanRequest};
use crate::auth::Principal;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::engine::{TokenEngine, TokenPayload};
use crate::lifecycle::{CreateSessionRequest, SessionLifecycle};
use crate::live::{LiveHub, Subscription, TokenStream};
use crate::models::{AttendanceRecord, Session, SessionId};
use crate::stats::{SessionSummary, StatsSnapshot};
use crate::store::Stores;
use crate::AttendanceError;
use std::sync::Arc;

/// Feeds handed to a presenter display.
pub struct Presenter {
    /// Rotating tokens to render.
    pub tokens: TokenStream,
    /// Stats and close events.
    pub events: Subscription,
}

/// Main attendance manager for Rollcall.
///
/// This is the primary public API. Create one instance per process and
/// share it across requests; every operation takes the caller's
/// [`Principal`] explicitly.
pub struct AttendanceManager {
    engine: Arc<TokenEngine>,
    stores: Stores,
    hub: Arc<LiveHub>,
    admission: ScanAdmission,
    lifecycle: SessionLifecycle,
}

impl AttendanceManager {
    /// Create a manager over the given collaborators.
    ///
    /// Uses the system clock for time operations.
    ///
    /// # Errors
    /// Returns an error if configuration validation fails or the signing
    /// key is rejected.
    pub fn new(config: EngineConfig, stores: Stores) -> Result<Self, AttendanceError> {
        Self::with_clock(config, stores, Arc::new(SystemClock))
    }

    /// Create a manager with a custom clock (for testing).
    #[cfg(any(test, feature = "test-seams"))]
    pub fn new_with_clock(
        config: EngineConfig,
        stores: Stores,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AttendanceError> {
        Self::with_clock(config, stores, clock)
    }

    fn with_clock(
        config: EngineConfig,
        stores: Stores,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AttendanceError> {
        config.validate()?;

        let engine = Arc::new(TokenEngine::new(&config, Arc::clone(&clock))?);
        let hub = Arc::new(LiveHub::new(Arc::clone(&engine), stores.clone(), &config));
        let admission = ScanAdmission::new(
            Arc::clone(&engine),
            stores.clone(),
            Arc::clone(&hub),
            Arc::clone(&clock),
        );
        let lifecycle = SessionLifecycle::new(
            Arc::clone(&engine),
            stores.clone(),
            Arc::clone(&hub),
            clock,
            &config,
        );

        Ok(Self {
            engine,
            stores,
            hub,
            admission,
            lifecycle,
        })
    }

    /// Open a session.
    ///
    /// # Errors
    /// - `Forbidden` - Caller does not control the course
    /// - `ActiveSessionExists` - The course already has an active session
    /// - `InvalidArgument` - Threshold or geofence out of range
    pub async fn create_session(
        &self,
        principal: &Principal,
        request: &CreateSessionRequest,
    ) -> Result<SessionSummary, AttendanceError> {
        self.lifecycle.create_session(principal, request).await
    }

    /// Close a session, finalize absences and end every live stream.
    ///
    /// # Errors
    /// - `SessionNotFound` - No such session
    /// - `Forbidden` - Caller does not control the course
    /// - `SessionClosed` - Session was already closed
    /// - `FinalizationIncomplete` - Session closed but the absentee sweep
    ///   failed; retry with [`finalize_session`](Self::finalize_session)
    pub async fn close_session(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<SessionSummary, AttendanceError> {
        self.lifecycle.close_session(principal, session_id).await
    }

    /// Re-run the absentee sweep on a closed session.
    pub async fn finalize_session(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<SessionSummary, AttendanceError> {
        self.lifecycle.finalize_session(principal, session_id).await
    }

    /// Session metadata and counts.
    pub async fn get_session(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<SessionSummary, AttendanceError> {
        self.lifecycle.get_session(principal, session_id).await
    }

    /// Submit a scan. See [`ScanAdmission::submit_scan`].
    pub async fn submit_scan(
        &self,
        principal: &Principal,
        request: &ScanRequest,
    ) -> Result<ScanOutcome, AttendanceError> {
        self.admission.submit_scan(principal, request).await
    }

    /// Mark a student present (or late) without a scan.
    pub async fn mark_present(
        &self,
        principal: &Principal,
        session_id: SessionId,
        student_id: &str,
    ) -> Result<AttendanceRecord, AttendanceError> {
        self.admission
            .mark_present(principal, session_id, student_id)
            .await
    }

    /// Remove a student's attendance record.
    pub async fn unmark(
        &self,
        principal: &Principal,
        session_id: SessionId,
        student_id: &str,
    ) -> Result<(), AttendanceError> {
        self.admission.unmark(principal, session_id, student_id).await
    }

    /// Current stats for a session the caller may view.
    pub async fn session_stats(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<StatsSnapshot, AttendanceError> {
        let session = self.load(session_id).await?;
        principal
            .require_course_view(self.stores.directory.as_ref(), session.course_id)
            .await?;
        self.hub.snapshot(session_id).await
    }

    /// Subscribe to stats and close events as a viewer.
    pub async fn subscribe_viewer(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<Subscription, AttendanceError> {
        let session = self.load(session_id).await?;
        principal
            .require_course_view(self.stores.directory.as_ref(), session.course_id)
            .await?;
        self.hub.subscribe(session_id).await
    }

    /// Subscribe as a presenter: token stream plus stats and close events.
    pub async fn subscribe_presenter(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<Presenter, AttendanceError> {
        let session = self.load(session_id).await?;
        principal
            .require_course_control(self.stores.directory.as_ref(), session.course_id)
            .await?;

        let events = self.hub.subscribe(session_id).await?;
        let tokens = self.hub.present(session_id).await?;
        Ok(Presenter { tokens, events })
    }

    /// Latest unexpired token, for presenters polling instead of streaming.
    pub async fn current_token(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<Option<TokenPayload>, AttendanceError> {
        let session = self.load(session_id).await?;
        principal
            .require_course_control(self.stores.directory.as_ref(), session.course_id)
            .await?;
        Ok(self.engine.current_token(session_id))
    }

    async fn load(&self, session_id: SessionId) -> Result<Session, AttendanceError> {
        self.stores
            .sessions
            .get_session(session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound)
    }
}

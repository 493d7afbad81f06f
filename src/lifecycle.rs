//! Session lifecycle: Active from creation, Closed (terminal) after close.
//!
//! Closing finalizes attendance: every enrolled student without a record
//! gets an Absent record, token state is discarded, and live subscribers
//! receive the terminal event.

use crate::auth::Principal;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::engine::TokenEngine;
use crate::live::LiveHub;
use crate::models::{
    late_cutoff, AttendanceRecord, AttendanceStatus, Coordinates, CourseId, Geofence, Session,
    SessionId,
};
use crate::stats::{SessionSummary, StatsSnapshot};
use crate::store::Stores;
use crate::{AttendanceError, StoreError};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Alphabet for human-readable session codes (no 0/O or 1/I).
pub const SESSION_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a session code.
pub const SESSION_CODE_LEN: usize = 6;

const CODE_ATTEMPTS: usize = 5;

/// Parameters for opening a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Course the session belongs to.
    pub course_id: CourseId,
    /// Seconds after start before scans count as late.
    pub late_threshold_secs: Option<i64>,
    /// Center of the geofence; no geofence when absent.
    pub geofence_center: Option<Coordinates>,
    /// Geofence radius in meters.
    pub radius_m: Option<f64>,
}

impl CreateSessionRequest {
    /// A request using every default.
    pub fn new(course_id: CourseId) -> Self {
        Self {
            course_id,
            late_threshold_secs: None,
            geofence_center: None,
            radius_m: None,
        }
    }

    /// Override the late threshold.
    pub fn with_late_threshold(mut self, secs: i64) -> Self {
        self.late_threshold_secs = Some(secs);
        self
    }

    /// Require scans to come from near `center`.
    pub fn with_geofence(mut self, center: Coordinates, radius_m: Option<f64>) -> Self {
        self.geofence_center = Some(center);
        self.radius_m = radius_m;
        self
    }
}

/// Creates, reads and closes sessions.
pub struct SessionLifecycle {
    engine: Arc<TokenEngine>,
    stores: Stores,
    hub: Arc<LiveHub>,
    clock: Arc<dyn Clock>,
    default_late_threshold_secs: i64,
    default_radius_m: f64,
}

impl SessionLifecycle {
    /// Wire the lifecycle to its collaborators.
    pub fn new(
        engine: Arc<TokenEngine>,
        stores: Stores,
        hub: Arc<LiveHub>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            engine,
            stores,
            hub,
            clock,
            default_late_threshold_secs: i64::try_from(config.default_late_threshold.as_secs())
                .unwrap_or(i64::MAX),
            default_radius_m: config.default_geofence_radius_m,
        }
    }

    /// Open a session for a course the requester controls.
    pub async fn create_session(
        &self,
        principal: &Principal,
        request: &CreateSessionRequest,
    ) -> Result<SessionSummary, AttendanceError> {
        principal
            .require_course_control(self.stores.directory.as_ref(), request.course_id)
            .await?;

        let late_threshold_secs = request
            .late_threshold_secs
            .unwrap_or(self.default_late_threshold_secs);
        if late_threshold_secs < 0 {
            return Err(AttendanceError::InvalidArgument(format!(
                "late threshold must not be negative, got {}",
                late_threshold_secs
            )));
        }
        let start_time = self.clock.now_utc();
        if late_cutoff(start_time, late_threshold_secs).is_none() {
            return Err(AttendanceError::InvalidArgument(format!(
                "late threshold out of range, got {}",
                late_threshold_secs
            )));
        }
        let geofence = self.geofence(request)?;

        if self
            .stores
            .sessions
            .find_active_session(request.course_id)
            .await?
            .is_some()
        {
            return Err(AttendanceError::ActiveSessionExists);
        }

        let mut session = Session {
            id: Uuid::new_v4(),
            course_id: request.course_id,
            code: generate_session_code(),
            start_time,
            end_time: None,
            active: true,
            late_threshold_secs,
            geofence,
        };

        let mut attempt = 1;
        loop {
            match self.stores.sessions.create_session(&session).await {
                Ok(()) => break,
                Err(StoreError::Conflict(detail)) => {
                    // Either another session won the course or the code collided
                    if self
                        .stores
                        .sessions
                        .find_active_session(request.course_id)
                        .await?
                        .is_some()
                    {
                        return Err(AttendanceError::ActiveSessionExists);
                    }
                    if attempt >= CODE_ATTEMPTS {
                        return Err(AttendanceError::Conflict(detail));
                    }
                    debug!(
                        target: "rollcall.lifecycle",
                        code = %session.code,
                        "Session code collision, retrying"
                    );
                    attempt += 1;
                    session.code = generate_session_code();
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            target: "rollcall.lifecycle",
            session_id = %session.id,
            course_id = %session.course_id,
            code = %session.code,
            created_by = %principal.user_id,
            "Session created"
        );

        self.summarize(&session).await
    }

    /// Close an active session and finalize its attendance.
    ///
    /// Closing an already-closed session is an error.
    pub async fn close_session(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<SessionSummary, AttendanceError> {
        let mut session = self.load(session_id).await?;
        principal
            .require_course_control(self.stores.directory.as_ref(), session.course_id)
            .await?;

        if !session.active {
            return Err(AttendanceError::SessionClosed);
        }

        let end_time = self.clock.now_utc();
        if !self.stores.sessions.close_session(session_id, end_time).await? {
            // A concurrent close won
            return Err(AttendanceError::SessionClosed);
        }
        session.active = false;
        session.end_time = Some(end_time);

        let finalized = self.finalize(&session, end_time).await;
        let summary = self.summarize(&session).await;

        // Streams and token state end with the session even when the sweep
        // or the recount failed. Cancel before discarding so a generator
        // tick racing this close cannot leave a slot behind.
        let closing = match &summary {
            Ok(summary) => summary.clone(),
            Err(_) => SessionSummary::new(&session, &StatsSnapshot::compute(&session, 0, &[])),
        };
        self.hub.close_session(closing).await;
        self.engine.discard(session_id);

        let absent = finalized.map_err(|e| {
            error!(
                target: "rollcall.lifecycle",
                session_id = %session_id,
                error = %e,
                "Session closed but absentee sweep failed"
            );
            AttendanceError::FinalizationIncomplete(e.to_string())
        })?;
        let summary = summary?;

        info!(
            target: "rollcall.lifecycle",
            session_id = %session_id,
            closed_by = %principal.user_id,
            present = summary.present,
            late = summary.late,
            absent = absent,
            "Session closed"
        );

        Ok(summary)
    }

    /// Re-run the absentee sweep on a closed session.
    ///
    /// Students who already have a record are skipped, so this is safe to
    /// repeat after a [`AttendanceError::FinalizationIncomplete`] close.
    ///
    /// # Errors
    /// - `SessionNotFound` - No such session
    /// - `Forbidden` - Caller does not control the course
    /// - `InvalidArgument` - Session is still active
    pub async fn finalize_session(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<SessionSummary, AttendanceError> {
        let session = self.load(session_id).await?;
        principal
            .require_course_control(self.stores.directory.as_ref(), session.course_id)
            .await?;

        if session.active {
            return Err(AttendanceError::InvalidArgument(
                "session is still active; close it instead".to_string(),
            ));
        }

        let at = session.end_time.unwrap_or_else(|| self.clock.now_utc());
        let absent = self.finalize(&session, at).await?;
        info!(
            target: "rollcall.lifecycle",
            session_id = %session_id,
            requested_by = %principal.user_id,
            absent = absent,
            "Attendance finalization re-run"
        );
        self.summarize(&session).await
    }

    /// Session metadata and counts for a course the requester controls.
    pub async fn get_session(
        &self,
        principal: &Principal,
        session_id: SessionId,
    ) -> Result<SessionSummary, AttendanceError> {
        let session = self.load(session_id).await?;
        principal
            .require_course_control(self.stores.directory.as_ref(), session.course_id)
            .await?;
        self.summarize(&session).await
    }

    /// Write an Absent record for every enrolled student without one.
    async fn finalize(
        &self,
        session: &Session,
        at: DateTime<Utc>,
    ) -> Result<usize, AttendanceError> {
        let enrolled = self
            .stores
            .directory
            .active_enrollments(session.course_id)
            .await?;
        let recorded: HashSet<String> = self
            .stores
            .attendance
            .records_for_session(session.id)
            .await?
            .into_iter()
            .map(|r| r.student_id)
            .collect();

        let mut created = 0;
        for student_id in enrolled.into_iter().filter(|s| !recorded.contains(s)) {
            let record = AttendanceRecord {
                session_id: session.id,
                student_id,
                status: AttendanceStatus::Absent,
                scanned_at: None,
                created_at: at,
            };
            match self.stores.attendance.create_attendance_record(&record).await {
                Ok(()) => created += 1,
                Err(StoreError::Conflict(_)) => {
                    warn!(
                        target: "rollcall.lifecycle",
                        session_id = %session.id,
                        student_id = %record.student_id,
                        "Record appeared during finalization, skipping"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(
            target: "rollcall.lifecycle",
            session_id = %session.id,
            absent = created,
            "Attendance finalized"
        );
        Ok(created)
    }

    fn geofence(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<Option<Geofence>, AttendanceError> {
        let Some(center) = request.geofence_center else {
            return Ok(None);
        };

        if !center.is_valid() {
            return Err(AttendanceError::InvalidArgument(format!(
                "geofence center out of range: ({}, {})",
                center.latitude, center.longitude
            )));
        }

        let radius_m = request.radius_m.unwrap_or(self.default_radius_m);
        if !(radius_m.is_finite() && radius_m > 0.0) {
            return Err(AttendanceError::InvalidArgument(format!(
                "geofence radius must be positive, got {}",
                radius_m
            )));
        }

        Ok(Some(Geofence { center, radius_m }))
    }

    async fn load(&self, session_id: SessionId) -> Result<Session, AttendanceError> {
        self.stores
            .sessions
            .get_session(session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound)
    }

    async fn summarize(&self, session: &Session) -> Result<SessionSummary, AttendanceError> {
        let stats = StatsSnapshot::load(
            session,
            self.stores.directory.as_ref(),
            self.stores.attendance.as_ref(),
        )
        .await?;
        Ok(SessionSummary::new(session, &stats))
    }
}

/// Draw a random session code.
pub fn generate_session_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SESSION_CODE_LEN)
        .map(|_| SESSION_CODE_ALPHABET[rng.gen_range(0..SESSION_CODE_ALPHABET.len())] as char)
        .collect()
}

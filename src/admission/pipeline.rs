//! Ordered scan admission and instructor overrides.
//!
//! A scan runs these checks in order, stopping at the first failure:
//!
//! 1. Session exists and is active
//! 2. Student holds an active enrollment in the course
//! 3. Student has no record for the session yet
//! 4. Geofence, when the session defines one
//! 5. Token signature, session binding and freshness
//!
//! Every attempt is journaled. The storage uniqueness rule on
//! (session, student) is the final arbiter between concurrent scans.

use crate::admission::geofence::{self, GeofenceVerdict};
use crate::admission::{ScanOutcome, ScanRequest, ScanResult};
use crate::audit::{spawn_audit, ScanAttempt};
use crate::auth::Principal;
use crate::clock::Clock;
use crate::engine::TokenEngine;
use crate::live::LiveHub;
use crate::models::{AttendanceRecord, Session, SessionId};
use crate::store::Stores;
use crate::{AttendanceError, StoreError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

/// Scan admission pipeline.
pub struct ScanAdmission {
    engine: Arc<TokenEngine>,
    stores: Stores,
    hub: Arc<LiveHub>,
    clock: Arc<dyn Clock>,
}

impl ScanAdmission {
    /// Wire the pipeline to its collaborators.
    pub fn new(
        engine: Arc<TokenEngine>,
        stores: Stores,
        hub: Arc<LiveHub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            stores,
            hub,
            clock,
        }
    }

    /// Admit or reject a scan.
    ///
    /// Expected rejections come back as `Ok` with a non-success
    /// [`ScanResult`]. `Err` means the caller is not a student or a
    /// collaborator failed.
    pub async fn submit_scan(
        &self,
        principal: &Principal,
        request: &ScanRequest,
    ) -> Result<ScanOutcome, AttendanceError> {
        principal.require_student()?;
        let student_id = principal.user_id.as_str();

        self.run_checks(student_id, request).await.map_err(|e| {
            error!(
                target: "rollcall.admission",
                session_id = %request.session_id,
                student_id = %student_id,
                error = %e,
                "Scan aborted by collaborator failure"
            );
            self.journal(
                ScanAttempt::new(
                    self.clock.now_utc(),
                    request.session_id,
                    student_id,
                    &request.token,
                    ScanResult::Unavailable,
                )
                .with_device_info(request.device_info.as_deref())
                .with_source_address(request.source_address.as_deref())
                .with_notes(format!("Aborted: {}", e)),
            );
            e
        })
    }

    async fn run_checks(
        &self,
        student_id: &str,
        request: &ScanRequest,
    ) -> Result<ScanOutcome, AttendanceError> {
        let session_id = request.session_id;

        let session = match self.stores.sessions.get_session(session_id).await? {
            Some(session) if session.active => session,
            Some(_) => {
                return Ok(self.reject(
                    student_id,
                    request,
                    ScanResult::SessionInvalid,
                    "Session is not active",
                    "Session is not active",
                ))
            }
            None => {
                return Ok(self.reject(
                    student_id,
                    request,
                    ScanResult::SessionInvalid,
                    "Session not found",
                    "Session not found",
                ))
            }
        };

        if !self
            .stores
            .directory
            .find_active_enrollment(session.course_id, student_id)
            .await?
        {
            return Ok(self.reject(
                student_id,
                request,
                ScanResult::NotEnrolled,
                "You are not enrolled in this course",
                "Student not enrolled in course",
            ));
        }

        if self
            .stores
            .attendance
            .find_attendance_record(session_id, student_id)
            .await?
            .is_some()
        {
            return Ok(self.reject(
                student_id,
                request,
                ScanResult::Duplicate,
                "You have already marked your attendance for this session",
                "Duplicate scan attempt",
            ));
        }

        if let Some(fence) = &session.geofence {
            match geofence::check(fence, request.coordinates) {
                GeofenceVerdict::Inside { .. } => {}
                GeofenceVerdict::Missing => {
                    return Ok(self.reject(
                        student_id,
                        request,
                        ScanResult::LocationRequired,
                        "Location permission is required for this session.",
                        "Location required",
                    ));
                }
                GeofenceVerdict::Unusable => {
                    return Ok(self.reject(
                        student_id,
                        request,
                        ScanResult::LocationInvalid,
                        "Your location could not be verified.",
                        "Unusable coordinates",
                    ));
                }
                GeofenceVerdict::Outside { distance_m } => {
                    return Ok(self.reject(
                        student_id,
                        request,
                        ScanResult::LocationInvalid,
                        format!(
                            "You are too far from the classroom ({:.0}m away).",
                            distance_m
                        ),
                        format!("Too far: {:.1}m > {}m", distance_m, fence.radius_m),
                    ));
                }
            }
        }

        if let Err(e) = self.engine.validate(&request.token, session_id) {
            let reason = e.to_string();
            return Ok(self.reject(student_id, request, e.scan_result(), reason.clone(), reason));
        }

        let now = self.clock.now_utc();
        let record = scanned_record(&session, student_id, now);

        match self.stores.attendance.create_attendance_record(&record).await {
            Ok(()) => {}
            Err(StoreError::Conflict(detail)) => {
                return Ok(self.reject(
                    student_id,
                    request,
                    ScanResult::Conflict,
                    "You have already marked your attendance for this session",
                    format!("Lost concurrent insert: {}", detail),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        self.journal(
            ScanAttempt::new(now, session_id, student_id, &request.token, ScanResult::Success)
                .with_device_info(request.device_info.as_deref())
                .with_source_address(request.source_address.as_deref()),
        );

        info!(
            target: "rollcall.admission",
            session_id = %session_id,
            student_id = %student_id,
            status = ?record.status,
            "Scan accepted"
        );

        self.hub.notify_attendance_changed(session_id).await;

        Ok(ScanOutcome::accepted(record.status, now))
    }

    /// Record a student as present or late without a scan.
    ///
    /// Requires control of the course and an active session; the student
    /// must be enrolled and must not already have a record.
    pub async fn mark_present(
        &self,
        principal: &Principal,
        session_id: SessionId,
        student_id: &str,
    ) -> Result<AttendanceRecord, AttendanceError> {
        let session = self.load_session(session_id).await?;
        principal
            .require_course_control(self.stores.directory.as_ref(), session.course_id)
            .await?;

        if !session.active {
            return Err(AttendanceError::SessionClosed);
        }
        if !self
            .stores
            .directory
            .find_active_enrollment(session.course_id, student_id)
            .await?
        {
            return Err(AttendanceError::NotEnrolled);
        }
        if self
            .stores
            .attendance
            .find_attendance_record(session_id, student_id)
            .await?
            .is_some()
        {
            return Err(AttendanceError::AlreadyMarked);
        }

        let now = self.clock.now_utc();
        let record = scanned_record(&session, student_id, now);
        self.stores
            .attendance
            .create_attendance_record(&record)
            .await?;

        self.journal(
            ScanAttempt::new(now, session_id, student_id, "", ScanResult::Success)
                .with_notes(format!("Marked manually by {}", principal.user_id)),
        );

        info!(
            target: "rollcall.admission",
            session_id = %session_id,
            student_id = %student_id,
            marked_by = %principal.user_id,
            status = ?record.status,
            "Student marked manually"
        );

        self.hub.notify_attendance_changed(session_id).await;
        Ok(record)
    }

    /// Delete a student's record, whether scanned, manual or finalized.
    pub async fn unmark(
        &self,
        principal: &Principal,
        session_id: SessionId,
        student_id: &str,
    ) -> Result<(), AttendanceError> {
        let session = self.load_session(session_id).await?;
        principal
            .require_course_control(self.stores.directory.as_ref(), session.course_id)
            .await?;

        if !self
            .stores
            .attendance
            .delete_attendance_record(session_id, student_id)
            .await?
        {
            return Err(AttendanceError::RecordNotFound);
        }

        self.journal(
            ScanAttempt::new(
                self.clock.now_utc(),
                session_id,
                student_id,
                "",
                ScanResult::Success,
            )
            .with_notes(format!("Unmarked by {}", principal.user_id)),
        );

        info!(
            target: "rollcall.admission",
            session_id = %session_id,
            student_id = %student_id,
            unmarked_by = %principal.user_id,
            "Attendance record removed"
        );

        self.hub.notify_attendance_changed(session_id).await;
        Ok(())
    }

    async fn load_session(&self, session_id: SessionId) -> Result<Session, AttendanceError> {
        self.stores
            .sessions
            .get_session(session_id)
            .await?
            .ok_or(AttendanceError::SessionNotFound)
    }

    fn reject(
        &self,
        student_id: &str,
        request: &ScanRequest,
        result: ScanResult,
        message: impl Into<String>,
        notes: impl Into<String>,
    ) -> ScanOutcome {
        let notes = notes.into();

        info!(
            target: "rollcall.admission",
            session_id = %request.session_id,
            student_id = %student_id,
            result = ?result,
            notes = %notes,
            "Scan rejected"
        );

        self.journal(
            ScanAttempt::new(
                self.clock.now_utc(),
                request.session_id,
                student_id,
                &request.token,
                result,
            )
            .with_device_info(request.device_info.as_deref())
            .with_source_address(request.source_address.as_deref())
            .with_notes(notes),
        );

        ScanOutcome::rejected(result, message)
    }

    fn journal(&self, attempt: ScanAttempt) {
        spawn_audit(Arc::clone(&self.stores.audit), attempt);
    }
}

fn scanned_record(session: &Session, student_id: &str, at: DateTime<Utc>) -> AttendanceRecord {
    AttendanceRecord {
        session_id: session.id,
        student_id: student_id.to_string(),
        status: session.classify(at),
        scanned_at: Some(at),
        created_at: at,
    }
}

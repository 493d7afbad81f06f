//! Persistence collaborator contracts.
//!
//! The core keeps no durable state of its own. Sessions, enrollments,
//! attendance records and the scan audit journal all live behind these
//! traits; [`memory::MemoryStore`] is the in-process reference backend.
//!
//! Every write that can violate a uniqueness rule must report
//! [`StoreError::Conflict`] rather than overwrite.

pub mod memory;

use crate::audit::ScanAttempt;
use crate::models::{AttendanceRecord, CourseId, Session, SessionId};
use crate::StoreError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Handles to every collaborator the core talks to.
#[derive(Clone)]
pub struct Stores {
    /// Session persistence.
    pub sessions: Arc<dyn SessionStore>,
    /// Course ownership and enrollment.
    pub directory: Arc<dyn CourseDirectory>,
    /// Attendance records.
    pub attendance: Arc<dyn AttendanceStore>,
    /// Scan attempt journal.
    pub audit: Arc<dyn ScanAuditLog>,
}

impl Stores {
    /// Use one backend for every contract.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: SessionStore + CourseDirectory + AttendanceStore + ScanAuditLog + 'static,
    {
        Self {
            sessions: backend.clone(),
            directory: backend.clone(),
            attendance: backend.clone(),
            audit: backend,
        }
    }
}

/// Session persistence.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session by id.
    async fn get_session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError>;

    /// The active session for a course, if any.
    async fn find_active_session(&self, course_id: CourseId)
        -> Result<Option<Session>, StoreError>;

    /// Persist a new session.
    ///
    /// Fails with `Conflict` if the course already has an active session or
    /// the session code is taken.
    async fn create_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Transition an active session to closed.
    ///
    /// Returns `false` when the session is missing or already closed, so
    /// concurrent closes have exactly one winner.
    async fn close_session(
        &self,
        session_id: SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Course ownership and enrollment lookups.
#[async_trait::async_trait]
pub trait CourseDirectory: Send + Sync {
    /// Whether `user_id` owns (teaches) the course.
    async fn course_owned_by(&self, course_id: CourseId, user_id: &str)
        -> Result<bool, StoreError>;

    /// Whether `student_id` holds an active enrollment in the course.
    async fn find_active_enrollment(
        &self,
        course_id: CourseId,
        student_id: &str,
    ) -> Result<bool, StoreError>;

    /// Number of active enrollments in the course.
    async fn count_active_enrollments(&self, course_id: CourseId) -> Result<usize, StoreError>;

    /// Ids of actively enrolled students.
    async fn active_enrollments(&self, course_id: CourseId) -> Result<Vec<String>, StoreError>;
}

/// Attendance record persistence, unique per (session, student).
#[async_trait::async_trait]
pub trait AttendanceStore: Send + Sync {
    /// The record for a student in a session, if any.
    async fn find_attendance_record(
        &self,
        session_id: SessionId,
        student_id: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Insert a record. Fails with `Conflict` if one already exists.
    async fn create_attendance_record(&self, record: &AttendanceRecord)
        -> Result<(), StoreError>;

    /// Delete a record. Returns `false` if there was nothing to delete.
    async fn delete_attendance_record(
        &self,
        session_id: SessionId,
        student_id: &str,
    ) -> Result<bool, StoreError>;

    /// Every record in a session.
    async fn records_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// Append-only journal of scan attempts.
#[async_trait::async_trait]
pub trait ScanAuditLog: Send + Sync {
    /// Journal one attempt.
    async fn audit_scan_attempt(&self, attempt: ScanAttempt) -> Result<(), StoreError>;
}

//! In-memory reference backend.
//!
//! Implements every collaborator contract over a single lock. Uniqueness
//! rules are checked and applied under the same write guard, so concurrent
//! duplicate inserts have exactly one winner.

use crate::audit::ScanAttempt;
use crate::models::{AttendanceRecord, CourseId, Session, SessionId};
use crate::store::{AttendanceStore, CourseDirectory, ScanAuditLog, SessionStore};
use crate::StoreError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Course {
    owner: String,
    enrolled: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    courses: HashMap<CourseId, Course>,
    sessions: HashMap<SessionId, Session>,
    records: HashMap<(SessionId, String), AttendanceRecord>,
    audit: Vec<ScanAttempt>,
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    audit_failing: AtomicBool,
    records_failing: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a course taught by `owner`.
    pub fn add_course(&self, course_id: CourseId, owner: impl Into<String>) {
        self.write().courses.insert(
            course_id,
            Course {
                owner: owner.into(),
                enrolled: BTreeSet::new(),
            },
        );
    }

    /// Actively enroll a student. Unknown courses are created without an owner.
    pub fn enroll(&self, course_id: CourseId, student_id: impl Into<String>) {
        self.write()
            .courses
            .entry(course_id)
            .or_default()
            .enrolled
            .insert(student_id.into());
    }

    /// End a student's enrollment.
    pub fn withdraw(&self, course_id: CourseId, student_id: &str) {
        if let Some(course) = self.write().courses.get_mut(&course_id) {
            course.enrolled.remove(student_id);
        }
    }

    /// Snapshot of the audit journal, oldest first.
    pub fn audit_entries(&self) -> Vec<ScanAttempt> {
        self.read().audit.clone()
    }

    /// Make audit writes fail, to exercise the fire-and-forget path.
    pub fn set_audit_failing(&self, failing: bool) {
        self.audit_failing.store(failing, Ordering::SeqCst);
    }

    /// Make attendance record writes report the backend as unavailable.
    pub fn set_records_failing(&self, failing: bool) {
        self.records_failing.store(failing, Ordering::SeqCst);
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl SessionStore for MemoryStore {
    async fn get_session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.read().sessions.get(&session_id).cloned())
    }

    async fn find_active_session(
        &self,
        course_id: CourseId,
    ) -> Result<Option<Session>, StoreError> {
        Ok(self
            .read()
            .sessions
            .values()
            .find(|s| s.course_id == course_id && s.active)
            .cloned())
    }

    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut inner = self.write();

        if inner
            .sessions
            .values()
            .any(|s| s.course_id == session.course_id && s.active)
        {
            return Err(StoreError::Conflict(format!(
                "course {} already has an active session",
                session.course_id
            )));
        }
        if inner.sessions.values().any(|s| s.code == session.code) {
            return Err(StoreError::Conflict(format!(
                "session code {} is taken",
                session.code
            )));
        }
        if inner.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }

        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn close_session(
        &self,
        session_id: SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.write();
        match inner.sessions.get_mut(&session_id) {
            Some(session) if session.active => {
                session.active = false;
                session.end_time = Some(end_time);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl CourseDirectory for MemoryStore {
    async fn course_owned_by(
        &self,
        course_id: CourseId,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .read()
            .courses
            .get(&course_id)
            .is_some_and(|c| c.owner == user_id))
    }

    async fn find_active_enrollment(
        &self,
        course_id: CourseId,
        student_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .read()
            .courses
            .get(&course_id)
            .is_some_and(|c| c.enrolled.contains(student_id)))
    }

    async fn count_active_enrollments(&self, course_id: CourseId) -> Result<usize, StoreError> {
        Ok(self
            .read()
            .courses
            .get(&course_id)
            .map_or(0, |c| c.enrolled.len()))
    }

    async fn active_enrollments(&self, course_id: CourseId) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read()
            .courses
            .get(&course_id)
            .map(|c| c.enrolled.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl AttendanceStore for MemoryStore {
    async fn find_attendance_record(
        &self,
        session_id: SessionId,
        student_id: &str,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        Ok(self
            .read()
            .records
            .get(&(session_id, student_id.to_string()))
            .cloned())
    }

    async fn create_attendance_record(
        &self,
        record: &AttendanceRecord,
    ) -> Result<(), StoreError> {
        if self.records_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "attendance writes disabled".to_string(),
            ));
        }
        let key = (record.session_id, record.student_id.clone());
        let mut inner = self.write();
        if inner.records.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "attendance record for {} in session {} already exists",
                record.student_id, record.session_id
            )));
        }
        inner.records.insert(key, record.clone());
        Ok(())
    }

    async fn delete_attendance_record(
        &self,
        session_id: SessionId,
        student_id: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .write()
            .records
            .remove(&(session_id, student_id.to_string()))
            .is_some())
    }

    async fn records_for_session(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(self
            .read()
            .records
            .values()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ScanAuditLog for MemoryStore {
    async fn audit_scan_attempt(&self, attempt: ScanAttempt) -> Result<(), StoreError> {
        if self.audit_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit sink offline".to_string()));
        }
        self.write().audit.push(attempt);
        Ok(())
    }
}

//! Rollcall error types.

use thiserror::Error;

/// Errors surfaced by session, override, and subscription operations.
///
/// Expected scan rejections are not errors; they come back as
/// [`ScanResult`](crate::admission::ScanResult) codes inside a
/// [`ScanOutcome`](crate::admission::ScanOutcome).
#[derive(Debug, Error)]
pub enum AttendanceError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A request parameter is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No session exists with the given id.
    #[error("Session not found")]
    SessionNotFound,

    /// The session is closed and the operation needs an active one.
    #[error("Session is already closed")]
    SessionClosed,

    /// The course already has an active session.
    #[error("An active session already exists for this course")]
    ActiveSessionExists,

    /// The caller's capability does not permit the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Manual override target is not enrolled in the course.
    #[error("Student is not enrolled in the course for this session")]
    NotEnrolled,

    /// Manual override target already has a record for the session.
    #[error("Student already has an attendance record for this session")]
    AlreadyMarked,

    /// No attendance record exists to remove.
    #[error("No attendance record found for this student in the session")]
    RecordNotFound,

    /// The session closed but its absentee sweep did not complete.
    ///
    /// Live streams and token state were still torn down; the sweep can be
    /// re-run on the closed session.
    #[error("Session closed but finalization is incomplete: {0}")]
    FinalizationIncomplete(String),

    /// A concurrent write won the uniqueness race.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A storage collaborator failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The signing primitive or entropy source failed.
    #[error("Crypto error: {0}")]
    Crypto(String),
}

/// Errors reported by storage collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("uniqueness violation: {0}")]
    Conflict(String),

    /// The backend could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for AttendanceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(detail) => AttendanceError::Conflict(detail),
            StoreError::Unavailable(detail) => AttendanceError::Store(detail),
        }
    }
}

/// Reasons a scanned token is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Encoding or field layout is wrong.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// Token was issued for another session.
    #[error("Token is for a different session")]
    SessionMismatch,

    /// Signature does not match the signed fields.
    #[error("Invalid token signature")]
    SignatureInvalid,

    /// Token is older than the validity window.
    #[error("Token expired (age {age_ms}ms, max {max_ms}ms)")]
    Expired {
        /// Age of the token in milliseconds.
        age_ms: i64,
        /// Validity window in milliseconds.
        max_ms: i64,
    },

    /// Token claims a generation time beyond the allowed clock skew.
    #[error("Token timestamp is in the future")]
    FromFuture {
        /// How far ahead of the local clock the token is, in milliseconds.
        skew_ms: i64,
    },
}

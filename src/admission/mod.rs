//! Scan admission: ordered checks that decide whether a scan is recorded.

pub mod geofence;
pub mod pipeline;

use crate::models::{AttendanceStatus, Coordinates, SessionId};
use crate::TokenError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use pipeline::ScanAdmission;

/// Reason code for a scan attempt. Every non-success value is terminal for
/// that attempt; the student rescans with a fresh token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanResult {
    /// Attendance was recorded.
    Success,
    /// Session missing or closed.
    SessionInvalid,
    /// Student is not actively enrolled in the course.
    NotEnrolled,
    /// Student already has a record for the session.
    Duplicate,
    /// Session has a geofence and no coordinates were sent.
    LocationRequired,
    /// Submitter is outside the geofence.
    LocationInvalid,
    /// Token is older than the validity window.
    Expired,
    /// Token belongs to another session.
    SessionMismatch,
    /// Token is malformed, forged or future-dated.
    Invalid,
    /// A concurrent scan for the same student won the insert.
    Conflict,
    /// A collaborator failed mid-admission. Journaled only; the caller
    /// receives an error instead of an outcome.
    Unavailable,
}

impl TokenError {
    /// Reason code reported to the scanning client.
    pub fn scan_result(&self) -> ScanResult {
        match self {
            TokenError::Malformed(_) => ScanResult::Invalid,
            TokenError::SessionMismatch => ScanResult::SessionMismatch,
            TokenError::SignatureInvalid => ScanResult::Invalid,
            TokenError::Expired { .. } => ScanResult::Expired,
            TokenError::FromFuture { .. } => ScanResult::Invalid,
        }
    }
}

/// A scan submitted by a student client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Session the student claims to be in.
    pub session_id: SessionId,
    /// Token blob read from the displayed code.
    pub token: String,
    /// Submitter location, if the client shared it.
    pub coordinates: Option<Coordinates>,
    /// Client device fingerprint.
    pub device_info: Option<String>,
    /// Network origin as seen by the transport.
    pub source_address: Option<String>,
}

impl ScanRequest {
    /// A request with no optional fields.
    pub fn new(session_id: SessionId, token: impl Into<String>) -> Self {
        Self {
            session_id,
            token: token.into(),
            coordinates: None,
            device_info: None,
            source_address: None,
        }
    }

    /// Attach submitter coordinates.
    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    /// Attach a device fingerprint.
    pub fn with_device_info(mut self, device_info: impl Into<String>) -> Self {
        self.device_info = Some(device_info.into());
        self
    }

    /// Attach the source address.
    pub fn with_source_address(mut self, source_address: impl Into<String>) -> Self {
        self.source_address = Some(source_address.into());
        self
    }
}

/// Result of a scan attempt as returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Whether a record was created.
    pub accepted: bool,
    /// Reason code.
    pub result: ScanResult,
    /// Message suitable for display.
    pub message: String,
    /// Recorded status, on success.
    pub status: Option<AttendanceStatus>,
    /// Recorded scan time, on success.
    pub scanned_at: Option<DateTime<Utc>>,
}

impl ScanOutcome {
    /// An accepted scan.
    pub fn accepted(status: AttendanceStatus, scanned_at: DateTime<Utc>) -> Self {
        let message = match status {
            AttendanceStatus::Late => "Attendance marked as LATE",
            _ => "Attendance marked successfully!",
        };
        Self {
            accepted: true,
            result: ScanResult::Success,
            message: message.to_string(),
            status: Some(status),
            scanned_at: Some(scanned_at),
        }
    }

    /// A rejected scan.
    pub fn rejected(result: ScanResult, message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            result,
            message: message.into(),
            status: None,
            scanned_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_codes() {
        assert_eq!(
            TokenError::Malformed("x".into()).scan_result(),
            ScanResult::Invalid
        );
        assert_eq!(
            TokenError::SessionMismatch.scan_result(),
            ScanResult::SessionMismatch
        );
        assert_eq!(
            TokenError::SignatureInvalid.scan_result(),
            ScanResult::Invalid
        );
        assert_eq!(
            TokenError::Expired {
                age_ms: 5000,
                max_ms: 4000
            }
            .scan_result(),
            ScanResult::Expired
        );
        assert_eq!(
            TokenError::FromFuture { skew_ms: 2000 }.scan_result(),
            ScanResult::Invalid
        );
    }

    #[test]
    fn test_outcome_messages() {
        let now = Utc::now();
        assert_eq!(
            ScanOutcome::accepted(AttendanceStatus::Late, now).message,
            "Attendance marked as LATE"
        );
        let ok = ScanOutcome::accepted(AttendanceStatus::Present, now);
        assert!(ok.accepted);
        assert_eq!(ok.scanned_at, Some(now));

        let no = ScanOutcome::rejected(ScanResult::Duplicate, "again");
        assert!(!no.accepted);
        assert!(no.status.is_none());
    }

    #[test]
    fn test_result_serializes_snake_case() {
        let json = serde_json::to_string(&ScanResult::LocationInvalid).unwrap();
        assert_eq!(json, "\"location_invalid\"");
    }
}

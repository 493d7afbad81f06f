//! Session and attendance domain types shared with storage collaborators.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier.
pub type SessionId = Uuid;

/// Opaque course identifier.
pub type CourseId = Uuid;

/// User identifier as issued by the account system.
pub type UserId = String;

/// A point on the earth in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinates {
    /// Create a coordinate pair.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and within ±90° latitude, ±180° longitude.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Acceptable physical area for scans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    /// Center of the area.
    pub center: Coordinates,
    /// Radius in meters.
    pub radius_m: f64,
}

/// One instance of an instructor presenting codes for a course meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session id.
    pub id: SessionId,
    /// Owning course.
    pub course_id: CourseId,
    /// Human-readable code.
    pub code: String,
    /// When the session opened.
    pub start_time: DateTime<Utc>,
    /// When the session closed.
    pub end_time: Option<DateTime<Utc>>,
    /// Whether scans are still accepted.
    pub active: bool,
    /// Scans after `start_time + late_threshold_secs` are late.
    pub late_threshold_secs: i64,
    /// Optional proximity requirement.
    pub geofence: Option<Geofence>,
}

impl Session {
    /// Instant after which accepted scans are classified late.
    ///
    /// A threshold past the representable range never classifies late.
    pub fn late_after(&self) -> DateTime<Utc> {
        late_cutoff(self.start_time, self.late_threshold_secs).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Classify a scan made at `at`.
    pub fn classify(&self, at: DateTime<Utc>) -> AttendanceStatus {
        if at <= self.late_after() {
            AttendanceStatus::Present
        } else {
            AttendanceStatus::Late
        }
    }
}

/// `start + threshold_secs`, or `None` when it cannot be represented.
pub fn late_cutoff(start: DateTime<Utc>, threshold_secs: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(threshold_secs).and_then(|t| start.checked_add_signed(t))
}

/// Persisted attendance state for a (session, student) pair.
///
/// Pending is implicit: it is the absence of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Scanned within the on-time window.
    Present,
    /// Scanned after the late threshold.
    Late,
    /// Never scanned before the session closed.
    Absent,
}

/// The single attendance row for a student in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Session id.
    pub session_id: SessionId,
    /// Student id.
    pub student_id: UserId,
    /// Recorded status.
    pub status: AttendanceStatus,
    /// When the scan was accepted; `None` for finalization sweeps.
    pub scanned_at: Option<DateTime<Utc>>,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

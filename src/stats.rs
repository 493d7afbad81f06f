//! Session statistics snapshots.

use crate::models::{AttendanceRecord, AttendanceStatus, CourseId, Session, SessionId};
use crate::store::{AttendanceStore, CourseDirectory};
use crate::AttendanceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of entries kept in [`StatsSnapshot::recent_scans`].
pub const RECENT_SCANS: usize = 5;

/// A scanned record as shown on a live dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentScan {
    /// Student id.
    pub student_id: String,
    /// Recorded status.
    pub status: AttendanceStatus,
    /// Scan time.
    pub scanned_at: DateTime<Utc>,
}

/// Point-in-time attendance counts for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Session id.
    pub session_id: SessionId,
    /// Human-readable session code.
    pub session_code: String,
    /// Whether the session is still accepting scans.
    pub active: bool,
    /// Session start.
    pub start_time: DateTime<Utc>,
    /// Active enrollments in the course.
    pub total_enrolled: usize,
    /// Present records.
    pub present: usize,
    /// Late records.
    pub late: usize,
    /// Absent records, or every unscanned student once closed.
    pub absent: usize,
    /// Students yet to scan; zero once closed.
    pub pending: usize,
    /// `(present + late) / total_enrolled` as a percentage, one decimal.
    pub percentage: f64,
    /// Most recent scans, newest first.
    pub recent_scans: Vec<RecentScan>,
}

impl StatsSnapshot {
    /// Compute a snapshot from a session, its enrollment count and its records.
    pub fn compute(session: &Session, total_enrolled: usize, records: &[AttendanceRecord]) -> Self {
        let count = |status: AttendanceStatus| records.iter().filter(|r| r.status == status).count();
        let present = count(AttendanceStatus::Present);
        let late = count(AttendanceStatus::Late);
        let scanned = present + late;

        let (absent, pending) = if session.active {
            (
                count(AttendanceStatus::Absent),
                total_enrolled.saturating_sub(scanned),
            )
        } else {
            (total_enrolled.saturating_sub(scanned), 0)
        };

        let mut recent: Vec<RecentScan> = records
            .iter()
            .filter_map(|r| {
                r.scanned_at.map(|scanned_at| RecentScan {
                    student_id: r.student_id.clone(),
                    status: r.status,
                    scanned_at,
                })
            })
            .collect();
        recent.sort_by(|a, b| {
            b.scanned_at
                .cmp(&a.scanned_at)
                .then_with(|| a.student_id.cmp(&b.student_id))
        });
        recent.truncate(RECENT_SCANS);

        Self {
            session_id: session.id,
            session_code: session.code.clone(),
            active: session.active,
            start_time: session.start_time,
            total_enrolled,
            present,
            late,
            absent,
            pending,
            percentage: percentage(scanned, total_enrolled),
            recent_scans: recent,
        }
    }

    /// Load counts from the collaborators and compute a snapshot.
    pub async fn load(
        session: &Session,
        directory: &dyn CourseDirectory,
        attendance: &dyn AttendanceStore,
    ) -> Result<Self, AttendanceError> {
        let total_enrolled = directory.count_active_enrollments(session.course_id).await?;
        let records = attendance.records_for_session(session.id).await?;
        Ok(Self::compute(session, total_enrolled, &records))
    }
}

/// Session metadata plus headline counts, returned by create, close and get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session id.
    pub id: SessionId,
    /// Owning course.
    pub course_id: CourseId,
    /// Human-readable code.
    pub code: String,
    /// Session start.
    pub start_time: DateTime<Utc>,
    /// Session end, once closed.
    pub end_time: Option<DateTime<Utc>>,
    /// Whether scans are accepted.
    pub active: bool,
    /// Late threshold in seconds.
    pub late_threshold_secs: i64,
    /// Active enrollments.
    pub total_students: usize,
    /// Present count.
    pub present: usize,
    /// Late count.
    pub late: usize,
    /// Absent count.
    pub absent: usize,
}

impl SessionSummary {
    /// Combine session metadata with a snapshot's counts.
    pub fn new(session: &Session, stats: &StatsSnapshot) -> Self {
        Self {
            id: session.id,
            course_id: session.course_id,
            code: session.code.clone(),
            start_time: session.start_time,
            end_time: session.end_time,
            active: session.active,
            late_threshold_secs: session.late_threshold_secs,
            total_students: stats.total_enrolled,
            present: stats.present,
            late: stats.late,
            absent: stats.absent,
        }
    }
}

fn percentage(scanned: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = scanned as f64 / total as f64 * 100.0;
    (raw * 10.0).round() / 10.0
}

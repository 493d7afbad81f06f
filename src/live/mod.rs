//! Live distribution: token streams for presenters and stats fan-out for
//! every subscriber of a session.

pub mod hub;
pub mod stream;

use crate::stats::{SessionSummary, StatsSnapshot};
use serde::{Deserialize, Serialize};

pub use hub::LiveHub;
pub use stream::{Subscription, TokenStream};

/// Event pushed to session subscribers.
///
/// Serializes as `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    /// First event on every subscription.
    InitialStats(StatsSnapshot),
    /// Attendance changed through a scan or a manual override.
    AttendanceUpdated(StatsSnapshot),
    /// Terminal event; the subscription ends after it.
    SessionClosed(SessionSummary),
}

impl SessionEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::InitialStats(_) => "initial_stats",
            SessionEvent::AttendanceUpdated(_) => "attendance_updated",
            SessionEvent::SessionClosed(_) => "session_closed",
        }
    }

    /// Render for a text transport.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Session;
    use chrono::Utc;
    use uuid::Uuid;

    fn session() -> Session {
        Session {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            code: "HJK234".to_string(),
            start_time: Utc::now(),
            end_time: None,
            active: true,
            late_threshold_secs: 60,
            geofence: None,
        }
    }

    #[test]
    fn test_event_envelope() {
        let s = session();
        let event = SessionEvent::AttendanceUpdated(StatsSnapshot::compute(&s, 3, &[]));
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["event"], event.name());
        assert_eq!(value["data"]["session_code"], "HJK234");
        assert_eq!(value["data"]["pending"], 3);
    }

    #[test]
    fn test_closed_event_name() {
        let s = session();
        let summary = SessionSummary::new(&s, &StatsSnapshot::compute(&s, 0, &[]));
        let json = SessionEvent::SessionClosed(summary).to_json().unwrap();
        assert!(json.starts_with(r#"{"event":"session_closed""#));
    }
}

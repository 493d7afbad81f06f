//! Scan attempt journaling.
//!
//! Every scan attempt, accepted or not, produces one [`ScanAttempt`].
//! Journaling is fire-and-forget: the write runs on its own task and a
//! failing sink is logged, never surfaced to the scanning student.

use crate::admission::ScanResult;
use crate::models::SessionId;
use crate::store::ScanAuditLog;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Maximum stored token length in characters.
pub const MAX_TOKEN_CHARS: usize = 500;

/// Maximum stored device info length in characters.
pub const MAX_DEVICE_INFO_CHARS: usize = 1000;

/// One journaled scan attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanAttempt {
    /// When the attempt was processed.
    pub ts: DateTime<Utc>,
    /// Target session.
    pub session_id: SessionId,
    /// Submitting student.
    pub student_id: String,
    /// Submitted token, truncated.
    pub token: String,
    /// Outcome code.
    pub result: ScanResult,
    /// Client device fingerprint, truncated.
    pub device_info: Option<String>,
    /// Network origin of the request.
    pub source_address: Option<String>,
    /// Diagnostic detail for the outcome.
    pub notes: Option<String>,
}

impl ScanAttempt {
    /// Start an entry; long fields are truncated here.
    pub fn new(
        ts: DateTime<Utc>,
        session_id: SessionId,
        student_id: impl Into<String>,
        token: &str,
        result: ScanResult,
    ) -> Self {
        Self {
            ts,
            session_id,
            student_id: student_id.into(),
            token: truncate(token, MAX_TOKEN_CHARS),
            result,
            device_info: None,
            source_address: None,
            notes: None,
        }
    }

    /// Attach the device fingerprint.
    pub fn with_device_info(mut self, device_info: Option<&str>) -> Self {
        self.device_info = device_info.map(|d| truncate(d, MAX_DEVICE_INFO_CHARS));
        self
    }

    /// Attach the source address.
    pub fn with_source_address(mut self, source_address: Option<&str>) -> Self {
        self.source_address = source_address.map(str::to_string);
        self
    }

    /// Attach a diagnostic note.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Write an entry on a background task.
///
/// Must be called from within a tokio runtime.
pub fn spawn_audit(log: Arc<dyn ScanAuditLog>, attempt: ScanAttempt) {
    tokio::spawn(async move {
        let session_id = attempt.session_id;
        let result = attempt.result;
        if let Err(e) = log.audit_scan_attempt(attempt).await {
            warn!(
                target: "rollcall.audit",
                session_id = %session_id,
                result = ?result,
                error = %e,
                "Failed to journal scan attempt"
            );
        }
    });
}

fn truncate(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => value[..cut].to_string(),
        None => value.to_string(),
    }
}

//! Opaque wire codec for attendance tokens.
//!
//! The blob handed to clients is standard base64 over UTF-8 text:
//! ```text
//! <session uuid>|<rfc3339 timestamp>|<nonce b64>|<signature b64>
//! ```
//! The signature covers the first three fields exactly as written, so
//! verification always runs over the received text rather than a
//! re-rendered copy.

use crate::TokenError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

const SEPARATOR: char = '|';
const FIELD_COUNT: usize = 4;

/// Render a timestamp the way it is embedded in tokens.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Build the canonical string that gets signed.
pub fn canonical_string(session_id: &str, timestamp: &str, nonce: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        session_id,
        timestamp,
        nonce,
        sep = SEPARATOR
    )
}

/// Append the signature and encode the whole token.
pub fn encode(canonical: &str, signature_b64: &str) -> String {
    STANDARD.encode(format!("{}{}{}", canonical, SEPARATOR, signature_b64))
}

/// Token fields as they appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToken {
    /// Session id text.
    pub session_id: String,
    /// Timestamp text.
    pub timestamp: String,
    /// Nonce text.
    pub nonce: String,
    /// Signature text (base64).
    pub signature: String,
}

impl RawToken {
    /// The string the signature is expected to cover.
    pub fn canonical(&self) -> String {
        canonical_string(&self.session_id, &self.timestamp, &self.nonce)
    }

    /// Parse the session id field.
    pub fn session_uuid(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.session_id)
            .map_err(|_| TokenError::Malformed("Invalid session ID in token".to_string()))
    }

    /// Parse the timestamp field.
    pub fn generated_at(&self) -> Result<DateTime<Utc>, TokenError> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| TokenError::Malformed("Invalid timestamp in token".to_string()))
    }
}

/// Decode a token blob into its four fields.
pub fn decode(blob: &str) -> Result<RawToken, TokenError> {
    let bytes = STANDARD
        .decode(blob.trim())
        .map_err(|_| TokenError::Malformed("Token is not valid base64".to_string()))?;

    let text = String::from_utf8(bytes)
        .map_err(|_| TokenError::Malformed("Token is not valid UTF-8".to_string()))?;

    let parts: Vec<&str> = text.split(SEPARATOR).collect();
    let [session_id, timestamp, nonce, signature] = parts.as_slice() else {
        return Err(TokenError::Malformed(format!(
            "Expected {} fields, got {}",
            FIELD_COUNT,
            parts.len()
        )));
    };

    Ok(RawToken {
        session_id: (*session_id).to_string(),
        timestamp: (*timestamp).to_string(),
        nonce: (*nonce).to_string(),
        signature: (*signature).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(format_timestamp(at), "2025-01-15T12:00:00.000000Z");
    }

    #[test]
    fn test_canonical_string_layout() {
        let canonical = canonical_string("sid", "ts", "nonce");
        assert_eq!(canonical, "sid|ts|nonce");
    }

    #[test]
    fn test_decode_recovers_fields() {
        let blob = encode("sid|ts|nonce", "sig==");
        let raw = decode(&blob).unwrap();
        assert_eq!(raw.session_id, "sid");
        assert_eq!(raw.timestamp, "ts");
        assert_eq!(raw.nonce, "nonce");
        assert_eq!(raw.signature, "sig==");
        assert_eq!(raw.canonical(), "sid|ts|nonce");
    }

    #[test]
    fn test_decode_rejects_non_base64() {
        let result = decode("%%% not base64 %%%");
        assert!(matches!(result, Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_wrong_field_count() {
        let blob = STANDARD.encode("a|b|c");
        assert!(matches!(decode(&blob), Err(TokenError::Malformed(_))));

        let blob = STANDARD.encode("a|b|c|d|e");
        assert!(matches!(decode(&blob), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let blob = STANDARD.encode([0xff, 0xfe, b'|', b'|', b'|']);
        assert!(matches!(decode(&blob), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_session_uuid_parse() {
        let id = Uuid::new_v4();
        let raw = RawToken {
            session_id: id.to_string(),
            timestamp: String::new(),
            nonce: String::new(),
            signature: String::new(),
        };
        assert_eq!(raw.session_uuid().unwrap(), id);

        let bad = RawToken {
            session_id: "not-a-uuid".to_string(),
            ..raw
        };
        assert!(matches!(bad.session_uuid(), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_generated_at_roundtrips_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 15).unwrap();
        let raw = RawToken {
            session_id: String::new(),
            timestamp: format_timestamp(at),
            nonce: String::new(),
            signature: String::new(),
        };
        assert_eq!(raw.generated_at().unwrap(), at);
    }
}

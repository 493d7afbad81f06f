//! Token engine: per-session rotating token generation and validation.
//!
//! Validation is a pure function of the signed fields and wall-clock time,
//! so any replica holding the same secret can validate tokens generated by
//! another. Only the "current token" cache is per-process state.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::crypto::{freshness::check_freshness, signer::Signer, token};
use crate::models::SessionId;
use crate::{AttendanceError, TokenError};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 16;

/// Sequence allocator shared by every engine in the process, so numbers are
/// never reused after `discard` or after an engine is rebuilt.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A generated token and its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Opaque token blob to render in the code.
    pub token: String,
    /// Session the token is bound to.
    pub session_id: SessionId,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
    /// End of the validity window.
    pub expires_at: DateTime<Utc>,
    /// Strictly increasing per session (diagnostic only).
    pub sequence: u64,
}

/// Fields recovered from a token that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Session the token is bound to.
    pub session_id: SessionId,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
}

type Slot = Arc<Mutex<Option<TokenPayload>>>;

/// Rotating token generator and validator.
pub struct TokenEngine {
    signer: Signer,
    clock: Arc<dyn Clock>,
    valid_window: Duration,
    max_future_skew: Duration,
    /// One slot per session; the slot mutex serializes generation for that
    /// session while unrelated sessions proceed independently.
    slots: RwLock<HashMap<SessionId, Slot>>,
}

impl TokenEngine {
    /// Build an engine from configuration.
    pub fn new(config: &EngineConfig, clock: Arc<dyn Clock>) -> Result<Self, AttendanceError> {
        config.validate()?;

        let signer = Signer::new(config.signing_secret.expose_secret().as_bytes())?;
        let valid_window = Duration::from_std(config.valid_window())
            .map_err(|e| AttendanceError::Config(format!("validity window: {}", e)))?;
        let max_future_skew = Duration::from_std(config.max_future_skew)
            .map_err(|e| AttendanceError::Config(format!("future skew: {}", e)))?;

        Ok(Self {
            signer,
            clock,
            valid_window,
            max_future_skew,
            slots: RwLock::new(HashMap::new()),
        })
    }

    /// Generate, cache and return a fresh token for `session_id`.
    pub fn generate(&self, session_id: SessionId) -> Result<TokenPayload, AttendanceError> {
        let slot = self.slot(session_id);
        let mut current = slot.lock().unwrap_or_else(|e| e.into_inner());

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| AttendanceError::Crypto(format!("entropy source failed: {}", e)))?;
        let nonce = STANDARD.encode(nonce_bytes);

        let generated_at = self.clock.now_utc();
        let session_text = session_id.to_string();
        let timestamp = token::format_timestamp(generated_at);
        let canonical = token::canonical_string(&session_text, &timestamp, &nonce);
        let signature = self.signer.sign_b64(&canonical);

        let sequence = SEQUENCE.fetch_add(1, Ordering::SeqCst) + 1;

        let payload = TokenPayload {
            token: token::encode(&canonical, &signature),
            session_id,
            generated_at,
            expires_at: generated_at + self.valid_window,
            sequence,
        };
        *current = Some(payload.clone());

        debug!(
            target: "rollcall.engine",
            session_id = %session_id,
            sequence = sequence,
            "Generated token"
        );

        Ok(payload)
    }

    /// Validate a scanned token against the session it was submitted for.
    ///
    /// Checks run in order: encoding, session id, signature, freshness.
    pub fn validate(
        &self,
        blob: &str,
        expected_session: SessionId,
    ) -> Result<VerifiedToken, TokenError> {
        let raw = token::decode(blob)?;

        let session_id = raw.session_uuid()?;
        if session_id != expected_session {
            return Err(TokenError::SessionMismatch);
        }

        if !self.signer.verify_b64(&raw.canonical(), &raw.signature) {
            return Err(TokenError::SignatureInvalid);
        }

        let generated_at = raw.generated_at()?;
        check_freshness(
            generated_at,
            self.valid_window,
            self.max_future_skew,
            self.clock.as_ref(),
        )?;

        Ok(VerifiedToken {
            session_id,
            generated_at,
        })
    }

    /// The cached token for a session, if it has not yet expired.
    pub fn current_token(&self, session_id: SessionId) -> Option<TokenPayload> {
        let slot = {
            let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
            slots.get(&session_id).cloned()
        }?;

        let current = slot.lock().unwrap_or_else(|e| e.into_inner());
        current
            .as_ref()
            .filter(|payload| payload.expires_at > self.clock.now_utc())
            .cloned()
    }

    /// Drop cached state for a closed session.
    pub fn discard(&self, session_id: SessionId) {
        let removed = self
            .slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session_id);

        if removed.is_some() {
            debug!(
                target: "rollcall.engine",
                session_id = %session_id,
                "Discarded token state"
            );
        }
    }

    /// Number of sessions with cached token state.
    pub fn tracked_sessions(&self) -> usize {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Total validity window applied to tokens.
    pub fn valid_window(&self) -> Duration {
        self.valid_window
    }

    fn slot(&self, session_id: SessionId) -> Slot {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&session_id)
        {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(session_id).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::TimeZone;
    use uuid::Uuid;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn engine_with_clock() -> (TokenEngine, MockClock) {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap());
        let engine = TokenEngine::new(&EngineConfig::new(SECRET), Arc::new(clock.clone())).unwrap();
        (engine, clock)
    }

    fn tamper(blob: &str, index: usize) -> String {
        let mut bytes = STANDARD.decode(blob).unwrap();
        bytes[index] ^= 0x01;
        STANDARD.encode(bytes)
    }

    #[test]
    fn test_generate_then_validate() {
        let (engine, _clock) = engine_with_clock();
        let session = Uuid::new_v4();

        let payload = engine.generate(session).unwrap();
        let verified = engine.validate(&payload.token, session).unwrap();

        assert_eq!(verified.session_id, session);
        assert_eq!(verified.generated_at, payload.generated_at);
        assert_eq!(payload.expires_at - payload.generated_at, Duration::seconds(4));
    }

    #[test]
    fn test_valid_through_whole_window() {
        let (engine, clock) = engine_with_clock();
        let session = Uuid::new_v4();
        let payload = engine.generate(session).unwrap();

        for _ in 0..8 {
            clock.advance(Duration::milliseconds(500));
            assert!(engine.validate(&payload.token, session).is_ok());
        }

        clock.advance(Duration::milliseconds(1));
        assert!(matches!(
            engine.validate(&payload.token, session),
            Err(TokenError::Expired { .. })
        ));
    }

    #[test]
    fn test_session_mismatch() {
        let (engine, _clock) = engine_with_clock();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let payload = engine.generate(a).unwrap();
        assert_eq!(
            engine.validate(&payload.token, b),
            Err(TokenError::SessionMismatch)
        );
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let (engine, _clock) = engine_with_clock();
        let session = Uuid::new_v4();
        let payload = engine.generate(session).unwrap();

        let decoded_len = STANDARD.decode(&payload.token).unwrap().len();
        let tampered = tamper(&payload.token, decoded_len - 3);
        assert_eq!(
            engine.validate(&tampered, session),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn test_tampered_nonce_rejected() {
        let (engine, _clock) = engine_with_clock();
        let session = Uuid::new_v4();
        let payload = engine.generate(session).unwrap();

        // uuid (36) + '|' + timestamp (27) + '|' puts the nonce at offset 65
        let tampered = tamper(&payload.token, 66);
        assert_eq!(
            engine.validate(&tampered, session),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let (engine, clock) = engine_with_clock();
        let other = TokenEngine::new(
            &EngineConfig::new("fedcba9876543210fedcba9876543210"),
            Arc::new(clock),
        )
        .unwrap();
        let session = Uuid::new_v4();

        let payload = other.generate(session).unwrap();
        assert_eq!(
            engine.validate(&payload.token, session),
            Err(TokenError::SignatureInvalid)
        );
    }

    #[test]
    fn test_future_token_rejected() {
        let (engine, clock) = engine_with_clock();
        let session = Uuid::new_v4();
        let payload = engine.generate(session).unwrap();

        clock.advance(Duration::seconds(-2));
        assert!(matches!(
            engine.validate(&payload.token, session),
            Err(TokenError::FromFuture { .. })
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let (engine, _clock) = engine_with_clock();
        assert!(matches!(
            engine.validate("not a token", Uuid::new_v4()),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_sequence_strictly_increasing() {
        let (engine, _clock) = engine_with_clock();
        let session = Uuid::new_v4();

        let first = engine.generate(session).unwrap().sequence;
        let second = engine.generate(session).unwrap().sequence;
        let third = engine.generate(session).unwrap().sequence;
        assert!(first < second && second < third);
    }

    #[test]
    fn test_sequence_not_reused_after_discard() {
        let (engine, _clock) = engine_with_clock();
        let session = Uuid::new_v4();

        let before = engine.generate(session).unwrap().sequence;
        engine.discard(session);
        let after = engine.generate(session).unwrap().sequence;
        assert!(after > before);
    }

    #[test]
    fn test_nonces_differ() {
        let (engine, _clock) = engine_with_clock();
        let session = Uuid::new_v4();
        let a = engine.generate(session).unwrap();
        let b = engine.generate(session).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_current_token_until_expiry() {
        let (engine, clock) = engine_with_clock();
        let session = Uuid::new_v4();
        assert!(engine.current_token(session).is_none());

        let payload = engine.generate(session).unwrap();
        assert_eq!(engine.current_token(session), Some(payload));

        clock.advance(Duration::seconds(4));
        assert!(engine.current_token(session).is_none());
    }

    #[test]
    fn test_current_token_is_latest() {
        let (engine, _clock) = engine_with_clock();
        let session = Uuid::new_v4();
        engine.generate(session).unwrap();
        let latest = engine.generate(session).unwrap();
        assert_eq!(engine.current_token(session).unwrap().sequence, latest.sequence);
    }

    #[test]
    fn test_discard_drops_state() {
        let (engine, _clock) = engine_with_clock();
        let session = Uuid::new_v4();
        engine.generate(session).unwrap();
        assert_eq!(engine.tracked_sessions(), 1);

        engine.discard(session);
        assert_eq!(engine.tracked_sessions(), 0);
        assert!(engine.current_token(session).is_none());
    }

    #[test]
    fn test_concurrent_generation_yields_distinct_sequences() {
        let (engine, _clock) = engine_with_clock();
        let engine = Arc::new(engine);
        let session = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| engine.generate(session).unwrap().sequence)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            let seqs = handle.join().unwrap();
            // Each thread observes its own generations in increasing order
            assert!(seqs.windows(2).all(|w| w[0] < w[1]));
            all.extend(seqs);
        }

        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}

//! Rollcall configuration.

use crate::AttendanceError;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Minimum signing secret length in bytes (256 bits).
pub const MIN_SECRET_LEN: usize = 32;

const ENV_SECRET: &str = "ROLLCALL_SIGNING_SECRET";
const ENV_PERIOD: &str = "ROLLCALL_TOKEN_PERIOD_SECS";
const ENV_BUFFER: &str = "ROLLCALL_TOKEN_BUFFER_SECS";
const ENV_SKEW: &str = "ROLLCALL_MAX_FUTURE_SKEW_MS";
const ENV_LATE: &str = "ROLLCALL_LATE_THRESHOLD_SECS";
const ENV_RADIUS: &str = "ROLLCALL_GEOFENCE_RADIUS_M";
const ENV_EVENT_BUFFER: &str = "ROLLCALL_EVENT_BUFFER";

/// Configuration for token generation, validation and live fan-out.
#[derive(Debug)]
pub struct EngineConfig {
    /// Process-wide HMAC secret shared by every replica that validates tokens.
    pub signing_secret: SecretString,

    /// How often a fresh token is generated for a presenting session.
    pub generation_period: Duration,

    /// Network and clock allowance added to the generation period.
    /// Total validity window = `generation_period + validation_buffer`.
    pub validation_buffer: Duration,

    /// How far in the future a token timestamp may be before it is rejected.
    pub max_future_skew: Duration,

    /// Late threshold applied when a session is created without one.
    pub default_late_threshold: Duration,

    /// Geofence radius applied when a session has a center but no radius.
    pub default_geofence_radius_m: f64,

    /// Per-session event buffer. Slow subscribers lose the oldest events.
    pub event_buffer: usize,
}

impl EngineConfig {
    /// Build a configuration with default timings around the given secret.
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: SecretString::from(signing_secret.into()),
            generation_period: Duration::from_secs(2),
            validation_buffer: Duration::from_secs(2),
            max_future_skew: Duration::from_secs(1),
            default_late_threshold: Duration::from_secs(60),
            default_geofence_radius_m: 50.0,
            event_buffer: 64,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AttendanceError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a map of variables (for testing).
    ///
    /// When only the period is given, the buffer defaults to the same value.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, AttendanceError> {
        let secret = vars.get(ENV_SECRET).ok_or_else(|| {
            AttendanceError::Config(format!("missing required variable {}", ENV_SECRET))
        })?;

        let mut config = Self::new(secret.clone());

        if let Some(secs) = parse_var::<u64>(vars, ENV_PERIOD)? {
            config.generation_period = Duration::from_secs(secs);
            config.validation_buffer = config.generation_period;
        }
        if let Some(secs) = parse_var::<u64>(vars, ENV_BUFFER)? {
            config.validation_buffer = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(vars, ENV_SKEW)? {
            config.max_future_skew = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(vars, ENV_LATE)? {
            config.default_late_threshold = Duration::from_secs(secs);
        }
        if let Some(radius) = parse_var::<f64>(vars, ENV_RADIUS)? {
            config.default_geofence_radius_m = radius;
        }
        if let Some(capacity) = parse_var::<usize>(vars, ENV_EVENT_BUFFER)? {
            config.event_buffer = capacity;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), AttendanceError> {
        let secret_len = self.signing_secret.expose_secret().len();
        if secret_len < MIN_SECRET_LEN {
            return Err(AttendanceError::Config(format!(
                "signing secret must be at least {} bytes, got {}",
                MIN_SECRET_LEN, secret_len
            )));
        }
        if self.generation_period.is_zero() {
            return Err(AttendanceError::Config(
                "generation_period cannot be zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(AttendanceError::Config(
                "event_buffer cannot be zero".to_string(),
            ));
        }
        if !(self.default_geofence_radius_m.is_finite() && self.default_geofence_radius_m > 0.0) {
            return Err(AttendanceError::Config(format!(
                "default_geofence_radius_m must be positive, got {}",
                self.default_geofence_radius_m
            )));
        }
        let late_secs = i64::try_from(self.default_late_threshold.as_secs()).ok();
        if late_secs
            .and_then(|secs| crate::models::late_cutoff(chrono::Utc::now(), secs))
            .is_none()
        {
            return Err(AttendanceError::Config(format!(
                "default_late_threshold out of range: {:?}",
                self.default_late_threshold
            )));
        }
        chrono::Duration::from_std(self.valid_window()).map_err(|e| {
            AttendanceError::Config(format!("validity window out of range: {}", e))
        })?;
        Ok(())
    }

    /// Total time a token stays acceptable after generation.
    pub fn valid_window(&self) -> Duration {
        self.generation_period.saturating_add(self.validation_buffer)
    }
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
) -> Result<Option<T>, AttendanceError>
where
    T::Err: std::fmt::Display,
{
    vars.get(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                AttendanceError::Config(format!("invalid value for {}: {} ({})", name, raw, e))
            })
        })
        .transpose()
}

//! Token freshness enforcement (replay window and clock skew).

use crate::clock::Clock;
use crate::TokenError;
use chrono::{DateTime, Duration, Utc};

/// Check that a token generated at `generated_at` is still acceptable.
///
/// # Arguments
/// * `generated_at` - Timestamp embedded in the token
/// * `valid_window` - Generation period plus validation buffer
/// * `max_future_skew` - How far ahead of local time a token may claim to be
/// * `clock` - Clock implementation for current time
///
/// # Errors
/// * `Expired` - Token is older than the validity window
/// * `FromFuture` - Token timestamp is beyond the allowed skew
pub fn check_freshness<C: Clock + ?Sized>(
    generated_at: DateTime<Utc>,
    valid_window: Duration,
    max_future_skew: Duration,
    clock: &C,
) -> Result<(), TokenError> {
    let age = clock.now_utc() - generated_at;

    if age > valid_window {
        return Err(TokenError::Expired {
            age_ms: age.num_milliseconds(),
            max_ms: valid_window.num_milliseconds(),
        });
    }

    if age < -max_future_skew {
        return Err(TokenError::FromFuture {
            skew_ms: -age.num_milliseconds(),
        });
    }

    Ok(())
}

//! Reconnect policy and backoff calculation.
//!
//! Pure math only. The timer and the jitter source live with the
//! connection supervisor in `tether-transport`.
//!
//! - [`ReconnectPolicy`]: Backoff parameters (base, cap, attempt ceiling, jitter)
//! - [`calculate_backoff_delay`]: Pre-jitter exponential delay for an attempt

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// First reconnect delay, in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum (pre-jitter) delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
/// Default number of reconnect attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
/// Default upper bound of the additive jitter in milliseconds.
pub const DEFAULT_JITTER_MS: u64 = 250;

/// Reconnect backoff parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt in ms (default: 500).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the exponential delay in ms (default: 10000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Attempt ceiling; exceeding it stops reconnecting (default: 6).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Additive jitter upper bound in ms (default: 250).
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_jitter_ms() -> u64 {
    DEFAULT_JITTER_MS
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }
}

impl ReconnectPolicy {
    /// Pre-jitter delay for a 1-based attempt.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> u64 {
        calculate_backoff_delay(attempt, self.base_delay_ms, self.max_delay_ms)
    }

    /// Delay for a 1-based attempt with jitter drawn from `random`.
    ///
    /// `random` should be a value in `[0.0, 1.0)` from a PRNG; it is clamped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, random: f64) -> Duration {
        let jitter = (self.jitter_ms as f64 * random.clamp(0.0, 1.0)).floor() as u64;
        let jitter = jitter.min(self.jitter_ms.saturating_sub(1));
        Duration::from_millis(self.base_delay_for(attempt).saturating_add(jitter))
    }

    /// Whether `attempt` (1-based) is past the ceiling.
    #[must_use]
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delay math
// ─────────────────────────────────────────────────────────────────────────────

/// Calculate the exponential backoff delay before jitter.
///
/// Formula: `min(base_delay * 2^(attempt - 1), max_delay)`
///
/// # Arguments
///
/// * `attempt`: one-based attempt index (1 for the first reconnect); 0 yields 0
/// * `base_delay_ms`: base delay in milliseconds
/// * `max_delay_ms`: maximum delay cap
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let exponent = (attempt - 1).min(31);
    base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(max_delay_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn policy_defaults() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay_ms, 500);
        assert_eq!(policy.max_delay_ms, 10_000);
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.jitter_ms, 250);
    }

    #[test]
    fn policy_serde_defaults() {
        let policy: ReconnectPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, ReconnectPolicy::default());
    }

    #[test]
    fn policy_serde_partial() {
        let policy: ReconnectPolicy = serde_json::from_str(r#"{"maxAttempts": 3}"#).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay_ms, 500);
    }

    #[test]
    fn backoff_bounds_for_reference_attempts() {
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| calculate_backoff_delay(attempt, 500, 10_000))
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 10_000]);
    }

    #[test]
    fn attempt_zero_has_no_delay() {
        assert_eq!(calculate_backoff_delay(0, 500, 10_000), 0);
    }

    #[test]
    fn huge_attempt_numbers_stay_capped() {
        assert_eq!(calculate_backoff_delay(100, 500, 10_000), 10_000);
        assert_eq!(calculate_backoff_delay(u32::MAX, u64::MAX, u64::MAX), u64::MAX);
    }

    #[test]
    fn jitter_zero_random() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1, 0.0), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_below_bound() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(6, 0.999_999), Duration::from_millis(10_249));
        assert_eq!(policy.delay_for(6, 1.0), Duration::from_millis(10_249));
        assert_eq!(policy.delay_for(6, 7.0), Duration::from_millis(10_249));
    }

    #[test]
    fn no_jitter_when_disabled() {
        let policy = ReconnectPolicy {
            jitter_ms: 0,
            ..ReconnectPolicy::default()
        };
        assert_eq!(policy.delay_for(2, 0.9), Duration::from_millis(1000));
    }

    #[test]
    fn exhaustion_after_ceiling() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.is_exhausted(6));
        assert!(policy.is_exhausted(7));
    }

    proptest! {
        #[test]
        fn delay_never_exceeds_cap_plus_jitter(attempt in 0u32..64, random in 0.0f64..1.0) {
            let policy = ReconnectPolicy::default();
            let delay = policy.delay_for(attempt, random).as_millis() as u64;
            prop_assert!(delay < policy.max_delay_ms + policy.jitter_ms);
            prop_assert!(policy.base_delay_for(attempt) <= policy.max_delay_ms);
        }

        #[test]
        fn delay_is_monotonic(attempt in 1u32..40) {
            let policy = ReconnectPolicy::default();
            prop_assert!(policy.base_delay_for(attempt) <= policy.base_delay_for(attempt + 1));
        }
    }
}

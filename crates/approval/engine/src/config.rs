//! Engine configuration.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the approval engine.
///
/// Every field has a sensible default, so `EngineConfig::default()` is a
/// working configuration for tests and small deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub escalation: EscalationPolicy,

    #[serde(default)]
    pub sweep: SweepConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            escalation: EscalationPolicy::default(),
            sweep: SweepConfig::default(),
        }
    }
}

/// Retry behavior for optimistic-concurrency conflicts.
///
/// A conflicting write is retried against freshly loaded state with
/// exponential backoff and jitter, up to `max_attempts` total attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): exponential in the
    /// attempt, capped at `max_delay_ms`, with jitter in [50%, 100%] of
    /// the capped value so colliding writers spread out.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let ceiling = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms)
            .max(1);
        let jitter: f64 = rand::thread_rng().gen();
        let millis = (ceiling as f64 * (0.5 + jitter / 2.0)).round() as u64;
        Duration::from_millis(millis.max(1))
    }
}

/// Bounds on deadline escalation.
///
/// A level whose timeout action is `Escalate` gets at most
/// `max_extensions` deadline extensions of `extension_hours` each; after
/// the final extension lapses one last escalation notice goes out and the
/// level simply stays overdue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    #[serde(default = "default_max_extensions")]
    pub max_extensions: u32,

    #[serde(default = "default_extension_hours")]
    pub extension_hours: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            max_extensions: default_max_extensions(),
            extension_hours: default_extension_hours(),
        }
    }
}

/// Timeout sweep cadence and batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,

    /// Maximum due instances handled per sweep. `0` means no limit.
    #[serde(default)]
    pub batch_limit: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            batch_limit: 0,
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    25
}

fn default_max_delay_ms() -> u64 {
    400
}

fn default_max_extensions() -> u32 {
    1
}

fn default_extension_hours() -> u32 {
    4
}

fn default_sweep_interval_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = EngineConfig::default();
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.escalation.max_extensions, 1);
        assert_eq!(config.sweep.interval_secs, 60);
        assert_eq!(config.sweep.batch_limit, 0);
    }

    #[test]
    fn empty_document_deserializes_to_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.retry.base_delay_ms, 25);
        assert_eq!(config.escalation.extension_hours, 4);
    }

    #[test]
    fn backoff_grows_and_stays_bounded() {
        let policy = RetryPolicy::default();
        for attempt in 1..=10 {
            let delay = policy.backoff_delay(attempt);
            assert!(delay >= Duration::from_millis(1));
            assert!(delay <= Duration::from_millis(policy.max_delay_ms));
        }
        // The cap keeps very high attempt numbers from overflowing.
        let delay = policy.backoff_delay(u32::MAX);
        assert!(delay <= Duration::from_millis(policy.max_delay_ms));
    }
}

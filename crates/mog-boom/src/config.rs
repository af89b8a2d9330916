/// Configuration for the boom store.
///
/// Durations are humantime strings in JSON (`"24h"`, `"1m 30s"`).
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BoomError;
use crate::types::ChannelId;

/// Name of the snapshot file inside `message_dir`.
pub const SNAPSHOT_FILE: &str = "messages.json";

/// Messages requested per page during reconciliation.
pub const PAGE_LIMIT: u8 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoomConfig {
    /// The only channel whose messages expire.
    pub channel_id: ChannelId,
    /// Time-to-live of an unreacted message.
    #[serde(with = "humantime_serde")]
    pub dead_after: Duration,
    /// Interval between snapshot checks.
    #[serde(with = "humantime_serde")]
    pub save_after: Duration,
    /// Directory holding the snapshot file. Filled in by the loader when empty.
    #[serde(default)]
    pub message_dir: PathBuf,
    #[serde(default)]
    pub delete_retry: RetryPolicy,
}

impl BoomConfig {
    pub fn new(channel_id: impl Into<ChannelId>, dead_after: Duration, message_dir: PathBuf) -> Self {
        Self {
            channel_id: channel_id.into(),
            dead_after,
            save_after: Duration::from_secs(60),
            message_dir,
            delete_retry: RetryPolicy::default(),
        }
    }

    pub fn save_after(mut self, interval: Duration) -> Self {
        self.save_after = interval;
        self
    }

    pub fn delete_retry(mut self, policy: RetryPolicy) -> Self {
        self.delete_retry = policy;
        self
    }

    /// Full path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.message_dir.join(SNAPSHOT_FILE)
    }

    pub fn validate(&self) -> Result<(), BoomError> {
        if self.channel_id.as_str().is_empty() {
            return Err(BoomError::Config("channel_id is empty".into()));
        }
        if self.dead_after.is_zero() {
            return Err(BoomError::Config("dead_after must be positive".into()));
        }
        if self.save_after.is_zero() {
            return Err(BoomError::Config("save_after must be positive".into()));
        }
        if self.message_dir.as_os_str().is_empty() {
            return Err(BoomError::Config("message_dir is empty".into()));
        }
        self.delete_retry.validate()
    }
}

/// Bounded retry for failed remote deletes.
///
/// Failure `n` defers the message by `base_backoff * 2^(n-1)`, capped at
/// `max_backoff`. After `max_attempts` consecutive failures the message is
/// dropped from tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    /// Deferral after the `attempt`-th consecutive failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_backoff
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Whether `attempts` consecutive failures exhaust the policy.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    fn validate(&self) -> Result<(), BoomError> {
        if self.max_attempts == 0 {
            return Err(BoomError::Config("delete_retry.max_attempts must be >= 1".into()));
        }
        if self.base_backoff > self.max_backoff {
            return Err(BoomError::Config(
                "delete_retry.base_backoff exceeds max_backoff".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_humantime_durations() {
        let json = r#"{
            "channel_id": "9001",
            "dead_after": "24h",
            "save_after": "1m 30s",
            "message_dir": "/var/lib/mog/boom-message"
        }"#;
        let config: BoomConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.channel_id.as_str(), "9001");
        assert_eq!(config.dead_after, Duration::from_secs(24 * 3600));
        assert_eq!(config.save_after, Duration::from_secs(90));
        assert_eq!(config.delete_retry, RetryPolicy::default());
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/var/lib/mog/boom-message/messages.json")
        );
        config.validate().unwrap();
    }

    #[test]
    fn partial_retry_section_keeps_defaults() {
        let json = r#"{
            "channel_id": "1",
            "dead_after": "5s",
            "save_after": "1s",
            "delete_retry": { "max_attempts": 2 }
        }"#;
        let config: BoomConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.delete_retry.max_attempts, 2);
        assert_eq!(config.delete_retry.base_backoff, Duration::from_secs(1));
        assert!(config.message_dir.as_os_str().is_empty());
    }

    #[test]
    fn rejects_bad_duration() {
        let json = r#"{"channel_id": "1", "dead_after": "soon", "save_after": "1s"}"#;
        assert!(serde_json::from_str::<BoomConfig>(json).is_err());
    }

    #[test]
    fn validate_rejects_zero_ttl() {
        let config = BoomConfig::new("1", Duration::ZERO, PathBuf::from("/tmp/x"));
        assert!(matches!(config.validate(), Err(BoomError::Config(_))));
    }

    #[test]
    fn validate_rejects_empty_channel() {
        let config = BoomConfig::new("", Duration::from_secs(5), PathBuf::from("/tmp/x"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(5), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn exhausted_at_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));
    }
}

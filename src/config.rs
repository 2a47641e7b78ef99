//! Session policy: retry budgets, timeouts and update chunking.
//!
//! None of these are protocol constants; they are loaded from YAML or left at
//! their defaults.
//!
//! ```yaml
//! family: fe02
//! handshake:
//!   attempts: 3
//!   backoff: 100ms
//! handshake_timeout: 500ms
//! exchange_timeout: 500ms
//! register:
//!   attempts: 3
//! erase_timeout: 10s
//! chunk:
//!   attempts: 3
//! chunk_size: 128
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::command::{Family, MAX_DATA_CHUNK};

/// Bounded retry with linear backoff: attempt `n + 1` waits `backoff * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub attempts: u32,
    #[serde(
        default,
        deserialize_with = "parse_duration",
        serialize_with = "format_duration"
    )]
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        RetryPolicy { attempts, backoff }
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff * attempt.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Family negotiated once the link is synchronised.
    pub family: Family,
    pub handshake: RetryPolicy,
    #[serde(deserialize_with = "parse_duration", serialize_with = "format_duration")]
    pub handshake_timeout: Duration,
    /// Per-exchange reply timeout for register and update traffic.
    #[serde(deserialize_with = "parse_duration", serialize_with = "format_duration")]
    pub exchange_timeout: Duration,
    pub register: RetryPolicy,
    /// Reply timeout for `M_CLEARMEMFLASH`, erasing is slow.
    #[serde(deserialize_with = "parse_duration", serialize_with = "format_duration")]
    pub erase_timeout: Duration,
    /// Per-chunk retry budget during a firmware transfer.
    pub chunk: RetryPolicy,
    pub chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            family: Family::Fe02,
            handshake: RetryPolicy::new(3, Duration::from_millis(100)),
            handshake_timeout: Duration::from_millis(500),
            exchange_timeout: Duration::from_millis(500),
            register: RetryPolicy::new(3, Duration::ZERO),
            erase_timeout: Duration::from_secs(10),
            chunk: RetryPolicy::new(3, Duration::ZERO),
            chunk_size: MAX_DATA_CHUNK,
        }
    }
}

impl SessionConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: SessionConfig = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let raw = std::fs::read_to_string(p)?;
        log::debug!("Loading session config from {}", p.display());
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (1..=MAX_DATA_CHUNK).contains(&self.chunk_size),
            "chunk_size must be within 1..={}, got {}",
            MAX_DATA_CHUNK,
            self.chunk_size
        );
        for (name, policy) in [
            ("handshake", self.handshake),
            ("register", self.register),
            ("chunk", self.chunk),
        ] {
            anyhow::ensure!(policy.attempts > 0, "{} attempts must be at least 1", name);
        }
        Ok(())
    }
}

fn parse_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    let text = match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => return Ok(Duration::from_millis(ms)),
        Raw::Text(s) => s,
    };
    let s = text.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse().map(Duration::from_secs)
    } else {
        s.parse().map(Duration::from_millis)
    };
    parsed.map_err(|_| serde::de::Error::custom(format!("invalid duration {:?}", text)))
}

fn format_duration<S>(d: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{}ms", d.as_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.register.attempts, 3);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = SessionConfig::from_yaml_str(
            "register:\n  attempts: 5\n  backoff: 20ms\nerase_timeout: 3s\nexchange_timeout: 250\n",
        )
        .unwrap();
        assert_eq!(config.register, RetryPolicy::new(5, Duration::from_millis(20)));
        assert_eq!(config.erase_timeout, Duration::from_secs(3));
        assert_eq!(config.exchange_timeout, Duration::from_millis(250));
        assert_eq!(config.handshake, SessionConfig::default().handshake);
        assert_eq!(config.family, Family::Fe02);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(SessionConfig::from_yaml_str("chunk_size: 0").is_err());
        assert!(SessionConfig::from_yaml_str("chunk_size: 4096").is_err());
        assert!(SessionConfig::from_yaml_str("handshake:\n  attempts: 0\n").is_err());
        assert!(SessionConfig::from_yaml_str("exchange_timeout: soon").is_err());
    }

    #[test]
    fn linear_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
    }

    #[test]
    fn yaml_round_trip() {
        let config = SessionConfig::default();
        let text = serde_yaml::to_string(&config).unwrap();
        assert_eq!(SessionConfig::from_yaml_str(&text).unwrap(), config);
    }
}

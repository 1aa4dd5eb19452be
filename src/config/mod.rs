//! Configuration management

use crate::domain::call_quality::QualityThresholds;
use crate::domain::media::IceServer;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `CHATCALL__SIGNALING__GRACE_DELAY_MS`
pub const ENV_PREFIX: &str = "CHATCALL";

/// Largest threshold `chrono::Duration::seconds` accepts
const MAX_STALE_AFTER_SECS: u64 = (i64::MAX / 1_000) as u64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub signaling: SignalingConfig,
    pub media: MediaConfig,
    pub quality: QualityConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Pause between the terminal status write and the delete
    pub grace_delay_ms: u64,
    /// Age after which a call document no longer counts as live
    pub stale_after_secs: u64,
    /// Unanswered caller sessions cancel themselves after this; 0 disables
    pub ring_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub ice_servers: Vec<IceServer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub sample_interval_ms: u64,
    pub thresholds: QualityThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            grace_delay_ms: 100,
            stale_after_secs: 300,
            ring_timeout_secs: 45,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
            ],
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 2000,
            thresholds: QualityThresholds::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then the optional file at `path`, then `CHATCALL__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self, ::config::ConfigError> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }
}

impl SignalingConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    /// Staleness threshold; values past what chrono can hold saturate
    pub fn stale_after(&self) -> chrono::Duration {
        let secs = self.stale_after_secs.min(MAX_STALE_AFTER_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn ring_timeout(&self) -> Option<Duration> {
        (self.ring_timeout_secs > 0).then(|| Duration::from_secs(self.ring_timeout_secs))
    }
}

impl QualityConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.signaling.grace_delay(), Duration::from_millis(100));
        assert_eq!(config.signaling.stale_after(), chrono::Duration::minutes(5));
        assert_eq!(config.signaling.ring_timeout(), Some(Duration::from_secs(45)));
        assert_eq!(config.media.ice_servers.len(), 2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_ring_timeout_disables() {
        let signaling = SignalingConfig {
            ring_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(signaling.ring_timeout(), None);
    }

    #[test]
    fn test_huge_stale_threshold_saturates() {
        let signaling = SignalingConfig {
            stale_after_secs: u64::MAX,
            ..Default::default()
        };
        let threshold = signaling.stale_after();
        assert!(threshold > chrono::Duration::days(365 * 1_000_000));
        assert_eq!(threshold.num_seconds(), i64::MAX / 1_000);
    }

    #[test]
    fn test_toml_round_trip() {
        let text = toml::to_string(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.signaling.stale_after_secs, 300);
        assert_eq!(parsed.media.ice_servers, Config::default().media.ice_servers);
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("chatcall-{}.toml", uuid::Uuid::new_v4()));
        fs::write(
            &path,
            r#"
[signaling]
grace_delay_ms = 10

[quality]
sample_interval_ms = 500
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.signaling.grace_delay_ms, 10);
        assert_eq!(config.signaling.stale_after_secs, 300);
        assert_eq!(config.quality.sample_interval_ms, 500);
        assert_eq!(config.media.ice_servers.len(), 2);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("chatcall-does-not-exist.toml");
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.signaling.ring_timeout_secs, 45);
    }
}

//! Flow-control thresholds
//!
//! Transmits are handed to the transport until `max_pending_transmits` are
//! outstanding, after which they wait in the queue. Once the queue holds
//! `max_queued_transmits` the queue enters transmit-only mode and drains
//! until the depth falls to `queue_transmit_unblock_threshold`. Beyond
//! `drop_transmits_level` new transmits fail immediately.
//!
//! Values come from [`TransmitConfig::default`], environment overrides
//! ([`TransmitConfig::from_env`]) or a TOML file ([`TransmitConfig::from_file`]).

use crate::error::TransmitError;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_MAX_PENDING_TRANSMITS: usize = 20;
pub const DEFAULT_MAX_QUEUED_TRANSMITS: usize = 950;
pub const DEFAULT_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD: usize = 780;
/// Headroom between the drain trigger and the drop level
pub const DEFAULT_DROP_HEADROOM: usize = 100;
pub const DEFAULT_PRODUCER_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_DRAIN_DURATION: Duration = Duration::from_secs(10);

pub const ENV_MAX_PENDING_TRANSMITS: &str = "ACTOR_MAX_PENDING_TRANSMITS";
pub const ENV_MAX_QUEUED_TRANSMITS: &str = "ACTOR_MAX_QUEUED_TRANSMITS";
pub const ENV_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD: &str = "ACTOR_QUEUED_TRANSMIT_UNBLOCK_THRESHOLD";
pub const ENV_DROP_TRANSMITS_LEVEL: &str = "ACTOR_DROP_TRANSMITS_LEVEL";
pub const ENV_PRODUCER_BACKOFF_MS: &str = "ACTOR_TRANSMIT_PRODUCER_BACKOFF_MS";
pub const ENV_MAX_DRAIN_MS: &str = "ACTOR_TRANSMIT_MAX_DRAIN_MS";

/// Thresholds and timings for one transmit queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitConfig {
    /// Maximum transmits handed to the transport and not yet completed
    pub max_pending_transmits: usize,
    /// Queue depth that triggers transmit-only drain mode
    pub max_queued_transmits: usize,
    /// Queue depth drain mode aims for before resuming normal admission
    pub queue_transmit_unblock_threshold: usize,
    /// Queue depth at which new transmits are rejected outright
    pub drop_transmits_level: usize,
    /// Sleep for producers that find the queue saturated but cannot drain it
    pub producer_backoff: Duration,
    /// Upper bound on a single drain episode
    pub max_drain_duration: Duration,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            max_pending_transmits: DEFAULT_MAX_PENDING_TRANSMITS,
            max_queued_transmits: DEFAULT_MAX_QUEUED_TRANSMITS,
            queue_transmit_unblock_threshold: DEFAULT_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD,
            drop_transmits_level: default_drop_level(DEFAULT_MAX_QUEUED_TRANSMITS),
            producer_backoff: DEFAULT_PRODUCER_BACKOFF,
            max_drain_duration: DEFAULT_MAX_DRAIN_DURATION,
        }
    }
}

impl TransmitConfig {
    /// Build a config from the three primary limits, deriving the drop level
    pub fn with_limits(
        max_pending_transmits: usize,
        max_queued_transmits: usize,
        queue_transmit_unblock_threshold: usize,
    ) -> Self {
        Self {
            max_pending_transmits,
            max_queued_transmits,
            queue_transmit_unblock_threshold,
            drop_transmits_level: default_drop_level(max_queued_transmits),
            ..Self::default()
        }
    }

    pub fn with_drop_level(mut self, drop_transmits_level: usize) -> Self {
        self.drop_transmits_level = drop_transmits_level;
        self
    }

    pub fn with_producer_backoff(mut self, backoff: Duration) -> Self {
        self.producer_backoff = backoff;
        self
    }

    pub fn with_max_drain_duration(mut self, max: Duration) -> Self {
        self.max_drain_duration = max;
        self
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// Unparsable values fall back to the defaults. When the drop level is
    /// not given it tracks the (possibly overridden) queued limit.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let count = |name: &str| parse_var::<usize>(&lookup, name);
        let millis = |name: &str| parse_var::<u64>(&lookup, name).map(Duration::from_millis);

        let max_queued = count(ENV_MAX_QUEUED_TRANSMITS).unwrap_or(DEFAULT_MAX_QUEUED_TRANSMITS);

        Self {
            max_pending_transmits: count(ENV_MAX_PENDING_TRANSMITS)
                .unwrap_or(DEFAULT_MAX_PENDING_TRANSMITS),
            max_queued_transmits: max_queued,
            queue_transmit_unblock_threshold: count(ENV_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD)
                .unwrap_or(DEFAULT_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD),
            drop_transmits_level: count(ENV_DROP_TRANSMITS_LEVEL)
                .unwrap_or_else(|| default_drop_level(max_queued)),
            producer_backoff: millis(ENV_PRODUCER_BACKOFF_MS).unwrap_or(DEFAULT_PRODUCER_BACKOFF),
            max_drain_duration: millis(ENV_MAX_DRAIN_MS).unwrap_or(DEFAULT_MAX_DRAIN_DURATION),
        }
    }

    /// Reset only the fields that make this config invalid.
    ///
    /// Each reset is logged with the offending value; valid overrides are kept.
    pub fn with_invalid_fields_reset(mut self) -> Self {
        if self.max_pending_transmits == 0 {
            warn!(
                "max_pending_transmits=0 is invalid, using {}",
                DEFAULT_MAX_PENDING_TRANSMITS
            );
            self.max_pending_transmits = DEFAULT_MAX_PENDING_TRANSMITS;
        }
        if self.queue_transmit_unblock_threshold >= self.max_queued_transmits {
            if self.queue_transmit_unblock_threshold != DEFAULT_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD {
                warn!(
                    "queue_transmit_unblock_threshold={} is not below max_queued_transmits={}, using {}",
                    self.queue_transmit_unblock_threshold,
                    self.max_queued_transmits,
                    DEFAULT_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD
                );
                self.queue_transmit_unblock_threshold = DEFAULT_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD;
            }
            if self.queue_transmit_unblock_threshold >= self.max_queued_transmits {
                warn!(
                    "max_queued_transmits={} is not above queue_transmit_unblock_threshold={}, using {}",
                    self.max_queued_transmits,
                    self.queue_transmit_unblock_threshold,
                    DEFAULT_MAX_QUEUED_TRANSMITS
                );
                self.max_queued_transmits = DEFAULT_MAX_QUEUED_TRANSMITS;
            }
        }
        if self.drop_transmits_level < self.max_queued_transmits {
            let derived = default_drop_level(self.max_queued_transmits);
            warn!(
                "drop_transmits_level={} is below max_queued_transmits={}, using {}",
                self.drop_transmits_level, self.max_queued_transmits, derived
            );
            self.drop_transmits_level = derived;
        }
        self
    }

    /// Create from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, TransmitError> {
        let raw: TransmitConfigToml = toml::from_str(toml_str)
            .map_err(|e| TransmitError::config("toml", e.to_string()))?;
        let config = raw.to_config();
        config.validate()?;
        Ok(config)
    }

    /// Create from file path
    pub fn from_file(path: &Path) -> Result<Self, TransmitError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TransmitError::config("path", format!("{}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded transmit config from {}", path.display());
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), TransmitError> {
        if self.max_pending_transmits == 0 {
            return Err(TransmitError::config(
                "max_pending_transmits",
                "must be greater than 0",
            ));
        }
        if self.queue_transmit_unblock_threshold >= self.max_queued_transmits {
            return Err(TransmitError::config(
                "queue_transmit_unblock_threshold",
                format!(
                    "{} must be below max_queued_transmits ({})",
                    self.queue_transmit_unblock_threshold, self.max_queued_transmits
                ),
            ));
        }
        if self.drop_transmits_level < self.max_queued_transmits {
            return Err(TransmitError::config(
                "drop_transmits_level",
                format!(
                    "{} must not be below max_queued_transmits ({})",
                    self.drop_transmits_level, self.max_queued_transmits
                ),
            ));
        }
        Ok(())
    }

    /// Process-wide configuration, read from the environment on first use
    pub fn global() -> &'static TransmitConfig {
        &GLOBAL
    }
}

static GLOBAL: Lazy<TransmitConfig> = Lazy::new(|| {
    let config = TransmitConfig::from_env();
    match config.validate() {
        Ok(()) => config,
        Err(e) => {
            warn!("Invalid transmit configuration from environment: {}", e);
            let repaired = config.with_invalid_fields_reset();
            match repaired.validate() {
                Ok(()) => repaired,
                Err(e) => {
                    warn!("Using default transmit configuration: {}", e);
                    TransmitConfig::default()
                }
            }
        }
    }
});

/// Drop level used when none is configured
fn default_drop_level(max_queued_transmits: usize) -> usize {
    max_queued_transmits.saturating_add(DEFAULT_DROP_HEADROOM)
}

fn parse_var<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable {}={:?}", name, raw);
            None
        }
    }
}

/// Transmit configuration in TOML format
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransmitConfigToml {
    pub max_pending_transmits: Option<usize>,
    pub max_queued_transmits: Option<usize>,
    pub queue_transmit_unblock_threshold: Option<usize>,
    pub drop_transmits_level: Option<usize>,
    pub producer_backoff_ms: Option<u64>,
    pub max_drain_ms: Option<u64>,
}

impl TransmitConfigToml {
    /// Convert TOML configuration to TransmitConfig
    pub fn to_config(&self) -> TransmitConfig {
        let max_queued = self
            .max_queued_transmits
            .unwrap_or(DEFAULT_MAX_QUEUED_TRANSMITS);
        TransmitConfig {
            max_pending_transmits: self
                .max_pending_transmits
                .unwrap_or(DEFAULT_MAX_PENDING_TRANSMITS),
            max_queued_transmits: max_queued,
            queue_transmit_unblock_threshold: self
                .queue_transmit_unblock_threshold
                .unwrap_or(DEFAULT_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD),
            drop_transmits_level: self
                .drop_transmits_level
                .unwrap_or_else(|| default_drop_level(max_queued)),
            producer_backoff: self
                .producer_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_PRODUCER_BACKOFF),
            max_drain_duration: self
                .max_drain_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_MAX_DRAIN_DURATION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TransmitConfig::default();
        assert_eq!(config.max_pending_transmits, 20);
        assert_eq!(config.max_queued_transmits, 950);
        assert_eq!(config.queue_transmit_unblock_threshold, 780);
        assert_eq!(config.drop_transmits_level, 1050);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = TransmitConfig::from_vars(vars(&[
            (ENV_MAX_PENDING_TRANSMITS, "5"),
            (ENV_MAX_QUEUED_TRANSMITS, "50"),
            (ENV_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD, "30"),
            (ENV_MAX_DRAIN_MS, "250"),
        ]));

        assert_eq!(config.max_pending_transmits, 5);
        assert_eq!(config.max_queued_transmits, 50);
        assert_eq!(config.queue_transmit_unblock_threshold, 30);
        // Drop level follows the overridden queued limit
        assert_eq!(config.drop_transmits_level, 150);
        assert_eq!(config.max_drain_duration, Duration::from_millis(250));
        assert_eq!(config.producer_backoff, DEFAULT_PRODUCER_BACKOFF);
    }

    #[test]
    fn test_env_garbage_falls_back_to_defaults() {
        let config = TransmitConfig::from_vars(vars(&[
            (ENV_MAX_PENDING_TRANSMITS, "lots"),
            (ENV_DROP_TRANSMITS_LEVEL, "-3"),
        ]));
        assert_eq!(config, TransmitConfig::default());
    }

    #[test]
    fn test_huge_queued_override_saturates_drop_level() {
        let max = usize::MAX.to_string();
        let config = TransmitConfig::from_vars(vars(&[(ENV_MAX_QUEUED_TRANSMITS, max.as_str())]));

        assert_eq!(config.max_queued_transmits, usize::MAX);
        assert_eq!(config.drop_transmits_level, usize::MAX);
        assert!(config.validate().is_ok());

        let config = TransmitConfig::with_limits(1, usize::MAX, 5);
        assert_eq!(config.drop_transmits_level, usize::MAX);

        let toml = format!("max_queued_transmits = {}", i64::MAX);
        let config = TransmitConfig::from_toml(&toml).unwrap();
        assert_eq!(config.drop_transmits_level, i64::MAX as usize + DEFAULT_DROP_HEADROOM);

        // Beyond usize is unparsable, not truncated
        let config = TransmitConfig::from_vars(vars(&[(
            ENV_MAX_PENDING_TRANSMITS,
            "99999999999999999999999999",
        )]));
        assert_eq!(config.max_pending_transmits, DEFAULT_MAX_PENDING_TRANSMITS);
    }

    #[test]
    fn test_invalid_fields_reset_individually() {
        let config = TransmitConfig::from_vars(vars(&[
            (ENV_MAX_PENDING_TRANSMITS, "0"),
            (ENV_MAX_QUEUED_TRANSMITS, "400"),
            (ENV_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD, "500"),
            (ENV_PRODUCER_BACKOFF_MS, "5"),
        ]));
        assert!(config.validate().is_err());

        let repaired = config.with_invalid_fields_reset();
        assert!(repaired.validate().is_ok());
        assert_eq!(repaired.max_pending_transmits, DEFAULT_MAX_PENDING_TRANSMITS);
        assert_eq!(repaired.max_queued_transmits, DEFAULT_MAX_QUEUED_TRANSMITS);
        assert_eq!(repaired.queue_transmit_unblock_threshold, 780);
        // Drop level derived from the overridden queued limit is now too low
        assert_eq!(repaired.drop_transmits_level, 1050);
        assert_eq!(repaired.producer_backoff, Duration::from_millis(5));
    }

    #[test]
    fn test_reset_keeps_valid_queued_override() {
        let config = TransmitConfig::from_vars(vars(&[
            (ENV_MAX_QUEUED_TRANSMITS, "2000"),
            (ENV_QUEUE_TRANSMIT_UNBLOCK_THRESHOLD, "2500"),
            (ENV_DROP_TRANSMITS_LEVEL, "10"),
        ]));

        let repaired = config.with_invalid_fields_reset();
        assert_eq!(repaired.max_queued_transmits, 2000);
        assert_eq!(repaired.queue_transmit_unblock_threshold, 780);
        assert_eq!(repaired.drop_transmits_level, 2100);
        assert!(repaired.validate().is_ok());

        // A valid config passes through unchanged
        assert_eq!(
            TransmitConfig::default().with_invalid_fields_reset(),
            TransmitConfig::default()
        );
    }

    #[test]
    fn test_validation_errors() {
        let mut config = TransmitConfig::default();
        config.max_pending_transmits = 0;
        assert!(matches!(
            config.validate(),
            Err(TransmitError::Config { ref field, .. }) if field == "max_pending_transmits"
        ));

        let config = TransmitConfig::with_limits(2, 10, 10);
        assert!(config.validate().is_err());

        let config = TransmitConfig::with_limits(2, 10, 5).with_drop_level(9);
        assert!(config.validate().is_err());

        let config = TransmitConfig::with_limits(2, 10, 5).with_drop_level(10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            max_pending_transmits = 4
            max_queued_transmits = 40
            queue_transmit_unblock_threshold = 20
            producer_backoff_ms = 0
        "#;

        let config = TransmitConfig::from_toml(toml).unwrap();
        assert_eq!(config.max_pending_transmits, 4);
        assert_eq!(config.drop_transmits_level, 140);
        assert_eq!(config.producer_backoff, Duration::ZERO);
        assert_eq!(config.max_drain_duration, DEFAULT_MAX_DRAIN_DURATION);
    }

    #[test]
    fn test_toml_rejects_invalid_limits() {
        let toml = r#"
            max_queued_transmits = 10
            queue_transmit_unblock_threshold = 50
        "#;
        let result = TransmitConfig::from_toml(toml);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("queue_transmit_unblock_threshold"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_pending_transmits = 7").unwrap();

        let config = TransmitConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_pending_transmits, 7);
        assert_eq!(config.max_queued_transmits, DEFAULT_MAX_QUEUED_TRANSMITS);

        let missing = TransmitConfig::from_file(Path::new("/nonexistent/transmit.toml"));
        assert!(missing.is_err());
    }
}

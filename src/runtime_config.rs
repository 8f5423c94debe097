// =============================================================================
// Runtime Configuration — Persisted pipeline settings with atomic save
// =============================================================================
//
// Every tunable of the ingestion and alerting pipeline lives here: the
// instrument selector, alert gating, history/buffer sizing, reconnection
// backoff and toast rate limits.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alerts::dispatcher::{MIN_ADVISORY_INTERVAL, MIN_TOAST_INTERVAL};
use crate::error::PipelineError;
use crate::market_data::series_buffer::DEFAULT_CAPACITY;
use crate::signals::AlertSettings;
use crate::supervisor::backoff::BackoffPolicy;
use crate::types::{InstrumentSelector, Interval};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_confidence_threshold() -> f64 {
    70.0
}

fn default_alert_volume() -> f64 {
    0.5
}

fn default_history_limit() -> usize {
    100
}

fn default_buffer_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_growth() -> f64 {
    1.5
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_min_toast_interval_ms() -> u64 {
    MIN_TOAST_INTERVAL.as_millis() as u64
}

fn default_min_advisory_interval_ms() -> u64 {
    MIN_ADVISORY_INTERVAL.as_millis() as u64
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Instrument ----------------------------------------------------------

    /// Symbol being watched, e.g. `BTCUSDT`.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default)]
    pub interval: Interval,

    // --- Alert gating --------------------------------------------------------

    /// Minimum confidence (0–100) for a BUY/SELL to raise an alert.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default = "default_true")]
    pub alerts_enabled: bool,

    /// Alert sound volume in `[0, 1]`.
    #[serde(default = "default_alert_volume")]
    pub alert_volume: f64,

    #[serde(default = "default_true")]
    pub notifications_enabled: bool,

    /// Optional webhook that receives notifications as JSON POSTs.
    #[serde(default)]
    pub notify_webhook: Option<String>,

    // --- Series sizing -------------------------------------------------------

    /// Bars fetched on every connection attempt.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Maximum bars retained in memory.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    // --- Reconnection --------------------------------------------------------

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_growth")]
    pub backoff_growth: f64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Automatic retries stop after this many consecutive failures.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    // --- Rate limits ---------------------------------------------------------

    #[serde(default = "default_min_toast_interval_ms")]
    pub min_toast_interval_ms: u64,

    #[serde(default = "default_min_advisory_interval_ms")]
    pub min_advisory_interval_ms: u64,

    // --- API -----------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: Interval::default(),
            confidence_threshold: default_confidence_threshold(),
            alerts_enabled: true,
            alert_volume: default_alert_volume(),
            notifications_enabled: true,
            notify_webhook: None,
            history_limit: default_history_limit(),
            buffer_capacity: default_buffer_capacity(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_growth: default_backoff_growth(),
            backoff_max_ms: default_backoff_max_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            min_toast_interval_ms: default_min_toast_interval_ms(),
            min_advisory_interval_ms: default_min_advisory_interval_ms(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            interval = %config.interval,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `SENTINEL_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(sym) = std::env::var("SENTINEL_SYMBOL") {
            let sym = sym.trim().to_uppercase();
            if !sym.is_empty() {
                self.symbol = sym;
            }
        }
        if let Ok(iv) = std::env::var("SENTINEL_INTERVAL") {
            match iv.parse() {
                Ok(iv) => self.interval = iv,
                Err(e) => tracing::warn!(error = %e, "ignoring SENTINEL_INTERVAL"),
            }
        }
        if let Ok(addr) = std::env::var("SENTINEL_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("SENTINEL_NOTIFY_WEBHOOK") {
            self.notify_webhook = Some(url).filter(|u| !u.trim().is_empty());
        }
    }

    pub fn selector(&self) -> Result<InstrumentSelector, PipelineError> {
        InstrumentSelector::new(&self.symbol, self.interval)
    }

    pub fn alert_settings(&self) -> AlertSettings {
        AlertSettings {
            confidence_threshold: self.confidence_threshold,
            alerts_enabled: self.alerts_enabled,
            alert_volume: self.alert_volume,
            notifications_enabled: self.notifications_enabled,
        }
        .sanitized()
    }

    /// Write back the caller-visible part of a `configure` call.
    pub fn apply_configure(&mut self, selector: &InstrumentSelector, settings: &AlertSettings) {
        self.symbol = selector.symbol.clone();
        self.interval = selector.interval;
        self.confidence_threshold = settings.confidence_threshold;
        self.alerts_enabled = settings.alerts_enabled;
        self.alert_volume = settings.alert_volume;
        self.notifications_enabled = settings.notifications_enabled;
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            growth: self.backoff_growth,
            max_delay: Duration::from_millis(self.backoff_max_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    pub fn toast_interval(&self) -> Duration {
        Duration::from_millis(self.min_toast_interval_ms)
    }

    pub fn advisory_interval(&self) -> Duration {
        Duration::from_millis(self.min_advisory_interval_ms)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.interval, Interval::FiveMinutes);
        assert!((cfg.confidence_threshold - 70.0).abs() < f64::EPSILON);
        assert!(cfg.alerts_enabled);
        assert!(cfg.notifications_enabled);
        assert_eq!(cfg.history_limit, 100);
        assert_eq!(cfg.max_reconnect_attempts, 10);
        assert_eq!(cfg.toast_interval(), Duration::from_millis(5_000));
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbol, "BTCUSDT");
        assert_eq!(cfg.backoff_base_ms, 1_000);
        assert!((cfg.backoff_growth - 1.5).abs() < f64::EPSILON);
        assert_eq!(cfg.backoff_max_ms, 30_000);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbol": "ETHUSDT", "interval": "1h", "alerts_enabled": false }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.selector().unwrap().to_string(), "ETHUSDT@1h");
        assert!(!cfg.alerts_enabled);
        assert_eq!(cfg.buffer_capacity, 100);
    }

    #[test]
    fn alert_settings_are_sanitized() {
        let cfg = RuntimeConfig {
            alert_volume: 3.0,
            confidence_threshold: -5.0,
            ..RuntimeConfig::default()
        };
        let s = cfg.alert_settings();
        assert_eq!(s.alert_volume, 1.0);
        assert_eq!(s.confidence_threshold, 0.0);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!("sentinel-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.symbol = "SOLUSDT".into();
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.symbol, "SOLUSDT");
        std::fs::remove_dir_all(&dir).ok();
    }
}

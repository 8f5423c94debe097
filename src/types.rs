// =============================================================================
// Shared types used across the Signal Sentinel pipeline
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Kline intervals the pipeline knows how to subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub const ALL: [Interval; 8] = [
        Self::OneMinute,
        Self::ThreeMinutes,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::FourHours,
        Self::OneDay,
    ];

    /// Exchange wire representation (`"5m"`, `"1h"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::FiveMinutes
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|iv| iv.as_str() == trimmed)
            .ok_or_else(|| PipelineError::InvalidSelector(format!("unknown interval '{s}'")))
    }
}

// =============================================================================
// InstrumentSelector
// =============================================================================

/// Identity of a live subscription. Changing either field invalidates the
/// current connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentSelector {
    pub symbol: String,
    pub interval: Interval,
}

impl InstrumentSelector {
    /// Build a selector, normalising the symbol to upper case.
    ///
    /// Symbols must be 2–20 ASCII alphanumerics (`BTCUSDT`, `ETHBTC`).
    pub fn new(symbol: &str, interval: Interval) -> Result<Self, PipelineError> {
        let symbol = symbol.trim().to_uppercase();
        let valid_len = (2..=20).contains(&symbol.len());
        if !valid_len || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PipelineError::InvalidSelector(format!(
                "malformed symbol '{symbol}'"
            )));
        }
        Ok(Self { symbol, interval })
    }

    /// Parse both halves from their string forms.
    pub fn parse(symbol: &str, interval: &str) -> Result<Self, PipelineError> {
        Self::new(symbol, interval.parse()?)
    }

    /// Re-run validation on a selector that may have been deserialised.
    pub fn validated(self) -> Result<Self, PipelineError> {
        Self::new(&self.symbol, self.interval)
    }
}

impl std::fmt::Display for InstrumentSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

// =============================================================================
// Signal direction
// =============================================================================

/// Overall recommendation produced by the signal engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
    Neutral,
}

impl SignalType {
    /// BUY and SELL are the only directions that can ever raise an alert.
    pub fn is_directional(&self) -> bool {
        matches!(self, Self::Buy | Self::Sell)
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

// =============================================================================
// Connection state
// =============================================================================

/// Lifecycle of the live subscription owned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_normalises_symbol() {
        let sel = InstrumentSelector::parse(" btcusdt ", "5m").unwrap();
        assert_eq!(sel.symbol, "BTCUSDT");
        assert_eq!(sel.interval, Interval::FiveMinutes);
        assert_eq!(sel.to_string(), "BTCUSDT@5m");
    }

    #[test]
    fn selector_rejects_bad_symbols() {
        assert!(InstrumentSelector::parse("", "5m").is_err());
        assert!(InstrumentSelector::parse("BTC/USDT", "5m").is_err());
        assert!(InstrumentSelector::parse("B", "5m").is_err());
    }

    #[test]
    fn selector_rejects_unknown_interval() {
        let err = InstrumentSelector::parse("BTCUSDT", "7m").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSelector(_)));
    }

    #[test]
    fn interval_serde_uses_wire_names() {
        let json = serde_json::to_string(&Interval::FourHours).unwrap();
        assert_eq!(json, "\"4h\"");
        let iv: Interval = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(iv, Interval::FifteenMinutes);
    }

    #[test]
    fn only_buy_and_sell_are_directional() {
        assert!(SignalType::Buy.is_directional());
        assert!(SignalType::Sell.is_directional());
        assert!(!SignalType::Hold.is_directional());
        assert!(!SignalType::Neutral.is_directional());
    }
}

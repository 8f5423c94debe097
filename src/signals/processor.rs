// =============================================================================
// Signal Processor — dedup, confidence gate and direction-change gate
// =============================================================================
//
// Two independent filters sit between a fresh summary and an alert:
//
//   1. "Seen before": a summary whose fingerprint equals the last processed
//      fingerprint is dropped immediately. Re-delivery of the same frame can
//      never alert twice.
//   2. "Actionable and novel": BUY/SELL at or above the confidence threshold
//      whose direction differs from the last alerted direction.
//
// Confidence changes alone never re-trigger an alert for an unchanged
// direction.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::signals::fingerprint::SignalFingerprint;
use crate::signals::SignalSummary;
use crate::types::SignalType;

/// Caller-supplied alert configuration, passed explicitly on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    /// Minimum confidence (0–100) for a directional signal to alert.
    pub confidence_threshold: f64,
    pub alerts_enabled: bool,
    /// Sound volume in `[0, 1]`.
    pub alert_volume: f64,
    pub notifications_enabled: bool,
}

impl AlertSettings {
    /// Clamp threshold and volume into their valid ranges. Non-finite values
    /// fall back to the defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        self.confidence_threshold = if self.confidence_threshold.is_finite() {
            self.confidence_threshold.clamp(0.0, 100.0)
        } else {
            defaults.confidence_threshold
        };
        self.alert_volume = if self.alert_volume.is_finite() {
            self.alert_volume.clamp(0.0, 1.0)
        } else {
            defaults.alert_volume
        };
        self
    }
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 70.0,
            alerts_enabled: true,
            alert_volume: 0.5,
            notifications_enabled: true,
        }
    }
}

/// Why a summary did not produce an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Duplicate,
    NotDirectional,
    InvalidConfidence,
    BelowThreshold,
    NotNovel,
    AudioNotReady,
    AlertsDisabled,
}

/// What the dispatcher should do with a processed summary.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertDecision {
    Fire { signal: SignalType, confidence: f64 },
    Skip(SkipReason),
}

impl AlertDecision {
    #[cfg(test)]
    pub fn should_fire(&self) -> bool {
        matches!(self, Self::Fire { .. })
    }
}

/// Per-session memory of what has already been processed and alerted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertState {
    /// Only ever BUY, SELL or None.
    pub last_signal_type: Option<SignalType>,
    pub last_fingerprint: Option<SignalFingerprint>,
    pub last_alert_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct SignalProcessor {
    state: AlertState,
}

impl SignalProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AlertState {
        &self.state
    }

    /// Forget everything; called whenever the instrument selector changes.
    pub fn reset(&mut self) {
        self.state = AlertState::default();
    }

    pub fn process(
        &mut self,
        summary: &SignalSummary,
        settings: &AlertSettings,
        audio_ready: bool,
    ) -> AlertDecision {
        let fingerprint = SignalFingerprint::of(summary);
        if self.state.last_fingerprint == Some(fingerprint) {
            return AlertDecision::Skip(SkipReason::Duplicate);
        }
        self.state.last_fingerprint = Some(fingerprint);

        let signal = summary.overall_signal;
        let confidence = summary.confidence;

        let verdict = if !signal.is_directional() {
            Err(SkipReason::NotDirectional)
        } else if !confidence.is_finite() {
            Err(SkipReason::InvalidConfidence)
        } else if confidence < settings.confidence_threshold {
            Err(SkipReason::BelowThreshold)
        } else if self.state.last_signal_type == Some(signal) {
            Err(SkipReason::NotNovel)
        } else if !audio_ready {
            Err(SkipReason::AudioNotReady)
        } else if !settings.alerts_enabled {
            Err(SkipReason::AlertsDisabled)
        } else {
            Ok(())
        };

        match verdict {
            Ok(()) => {
                self.state.last_signal_type = Some(signal);
                self.state.last_alert_at = Some(Utc::now());
                AlertDecision::Fire { signal, confidence }
            }
            Err(reason) => {
                debug!(fingerprint = %fingerprint, reason = ?reason, "signal not alerted");
                AlertDecision::Skip(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(signal: SignalType, confidence: f64) -> SignalSummary {
        SignalSummary::new(signal, confidence)
    }

    fn settings() -> AlertSettings {
        AlertSettings {
            confidence_threshold: 70.0,
            ..AlertSettings::default()
        }
    }

    #[test]
    fn repeated_identical_summaries_alert_once() {
        let mut p = SignalProcessor::new();
        let s = summary(SignalType::Buy, 80.0);
        let fired = (0..10)
            .filter(|_| p.process(&s, &settings(), true).should_fire())
            .count();
        assert_eq!(fired, 1);
    }

    #[test]
    fn hold_and_neutral_never_alert() {
        let mut p = SignalProcessor::new();
        for sig in [SignalType::Hold, SignalType::Neutral] {
            for conf in [0.0, 70.0, 99.0, 100.0] {
                let d = p.process(&summary(sig, conf), &settings(), true);
                assert!(!d.should_fire());
            }
        }
        assert_eq!(p.state().last_signal_type, None);
    }

    #[test]
    fn same_direction_with_new_confidence_does_not_realert() {
        let mut p = SignalProcessor::new();
        assert!(p.process(&summary(SignalType::Buy, 82.0), &settings(), true).should_fire());
        assert_eq!(
            p.process(&summary(SignalType::Buy, 91.0), &settings(), true),
            AlertDecision::Skip(SkipReason::NotNovel)
        );
    }

    #[test]
    fn buy_then_sell_fires_twice_in_order() {
        let mut p = SignalProcessor::new();
        let first = p.process(&summary(SignalType::Buy, 80.0), &settings(), true);
        let second = p.process(&summary(SignalType::Sell, 80.0), &settings(), true);
        assert_eq!(
            first,
            AlertDecision::Fire {
                signal: SignalType::Buy,
                confidence: 80.0
            }
        );
        assert_eq!(
            second,
            AlertDecision::Fire {
                signal: SignalType::Sell,
                confidence: 80.0
            }
        );
    }

    #[test]
    fn btcusdt_walkthrough() {
        let mut p = SignalProcessor::new();
        let cfg = settings();

        assert!(p.process(&summary(SignalType::Buy, 82.0), &cfg, true).should_fire());
        assert_eq!(p.state().last_signal_type, Some(SignalType::Buy));

        assert!(!p.process(&summary(SignalType::Buy, 91.0), &cfg, true).should_fire());
        assert_eq!(p.state().last_signal_type, Some(SignalType::Buy));

        assert!(p.process(&summary(SignalType::Sell, 75.0), &cfg, true).should_fire());
        assert_eq!(p.state().last_signal_type, Some(SignalType::Sell));

        assert_eq!(
            p.process(&summary(SignalType::Hold, 95.0), &cfg, true),
            AlertDecision::Skip(SkipReason::NotDirectional)
        );
        assert_eq!(p.state().last_signal_type, Some(SignalType::Sell));
    }

    #[test]
    fn below_threshold_is_skipped_but_fingerprinted() {
        let mut p = SignalProcessor::new();
        let s = summary(SignalType::Buy, 60.0);
        assert_eq!(
            p.process(&s, &settings(), true),
            AlertDecision::Skip(SkipReason::BelowThreshold)
        );
        assert_eq!(
            p.process(&s, &settings(), true),
            AlertDecision::Skip(SkipReason::Duplicate)
        );
    }

    #[test]
    fn nan_confidence_is_not_actionable() {
        let mut p = SignalProcessor::new();
        assert_eq!(
            p.process(&summary(SignalType::Sell, f64::NAN), &settings(), true),
            AlertDecision::Skip(SkipReason::InvalidConfidence)
        );
        assert_eq!(p.state().last_signal_type, None);
    }

    #[test]
    fn disabled_alerts_or_missing_audio_do_not_record_direction() {
        let mut p = SignalProcessor::new();
        let off = AlertSettings {
            alerts_enabled: false,
            ..settings()
        };
        assert_eq!(
            p.process(&summary(SignalType::Buy, 90.0), &off, true),
            AlertDecision::Skip(SkipReason::AlertsDisabled)
        );
        assert_eq!(
            p.process(&summary(SignalType::Buy, 91.0), &settings(), false),
            AlertDecision::Skip(SkipReason::AudioNotReady)
        );
        assert_eq!(p.state().last_signal_type, None);
        assert!(p.process(&summary(SignalType::Buy, 92.0), &settings(), true).should_fire());
    }

    #[test]
    fn reset_clears_direction_memory() {
        let mut p = SignalProcessor::new();
        assert!(p.process(&summary(SignalType::Buy, 80.0), &settings(), true).should_fire());
        p.reset();
        assert!(p.process(&summary(SignalType::Buy, 80.0), &settings(), true).should_fire());
    }

    #[test]
    fn sanitized_clamps_ranges() {
        let s = AlertSettings {
            confidence_threshold: 140.0,
            alert_volume: -2.0,
            ..AlertSettings::default()
        }
        .sanitized();
        assert_eq!(s.confidence_threshold, 100.0);
        assert_eq!(s.alert_volume, 0.0);
    }
}

// =============================================================================
// Signal Engine — Weighted indicator vote over the bar series
// =============================================================================
//
// Each indicator casts a vote with a direction (+1 bullish, -1 bearish, 0
// neutral) and a confidence in [0, 1]. Votes are combined into a normalised
// score in [-1, 1]:
//
//   score = Σ(weight · confidence · direction) / Σ(weight)
//
//   score >  entry_threshold  => BUY
//   score < -entry_threshold  => SELL
//   otherwise                 => HOLD
//   no readings at all        => NEUTRAL
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market_data::Bar;
use crate::signals::indicators;
use crate::types::SignalType;

/// A single indicator's contribution to the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorReading {
    pub name: String,
    pub value: f64,
    pub weight: f64,
    pub confidence: f64,
    /// +1.0 for bullish, -1.0 for bearish, 0.0 for neutral.
    pub direction: f64,
}

impl IndicatorReading {
    fn contribution(&self) -> f64 {
        self.weight * self.confidence * self.direction
    }
}

/// Aggregated recommendation for the current series. Never mutated after
/// creation; a new summary replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub overall_signal: SignalType,
    /// 0–100. May be NaN when an engine misbehaves; consumers treat that as
    /// not actionable.
    pub confidence: f64,
    pub indicators: Vec<IndicatorReading>,
    pub computed_at: DateTime<Utc>,
}

impl SignalSummary {
    pub fn new(overall_signal: SignalType, confidence: f64) -> Self {
        Self {
            overall_signal,
            confidence,
            indicators: Vec::new(),
            computed_at: Utc::now(),
        }
    }
}

/// Pure, deterministic mapping from a bar series to a summary.
pub trait SignalEngine: Send + Sync + 'static {
    fn compute(&self, series: &[Bar]) -> SignalSummary;
}

// =============================================================================
// TechnicalSignalEngine
// =============================================================================

/// Weights for each indicator vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorWeights {
    pub ema_trend: f64,
    pub rsi: f64,
    pub macd: f64,
    pub percent_b: f64,
}

impl Default for IndicatorWeights {
    fn default() -> Self {
        Self {
            ema_trend: 0.35,
            rsi: 0.25,
            macd: 0.25,
            percent_b: 0.15,
        }
    }
}

/// Default engine: EMA 9/21 trend, RSI-14, MACD 12/26/9 and Bollinger %B.
#[derive(Debug, Clone)]
pub struct TechnicalSignalEngine {
    weights: IndicatorWeights,
    /// Minimum absolute normalised score for a directional call.
    pub entry_threshold: f64,
}

impl TechnicalSignalEngine {
    pub fn new(weights: IndicatorWeights, entry_threshold: f64) -> Self {
        Self {
            weights,
            entry_threshold,
        }
    }

    fn readings(&self, closes: &[f64]) -> Vec<IndicatorReading> {
        let mut out = Vec::with_capacity(4);

        if let (Some(fast), Some(slow)) = (indicators::ema(closes, 9), indicators::ema(closes, 21)) {
            if slow != 0.0 {
                let spread = (fast - slow) / slow;
                out.push(IndicatorReading {
                    name: "ema_trend".into(),
                    value: spread,
                    weight: self.weights.ema_trend,
                    // A 0.5 % spread between the averages counts as full conviction.
                    confidence: (spread.abs() * 200.0).min(1.0),
                    direction: signum(spread),
                });
            }
        }

        if let Some(value) = indicators::rsi(closes, 14) {
            let (direction, confidence) = if value <= 30.0 {
                (1.0, (30.0 - value) / 30.0 * 0.5 + 0.5)
            } else if value >= 70.0 {
                (-1.0, (value - 70.0) / 30.0 * 0.5 + 0.5)
            } else {
                (0.0, 0.0)
            };
            out.push(IndicatorReading {
                name: "rsi".into(),
                value,
                weight: self.weights.rsi,
                confidence,
                direction,
            });
        }

        if let Some(m) = indicators::macd(closes, 12, 26, 9) {
            let scale = m.signal.abs().max(f64::EPSILON);
            out.push(IndicatorReading {
                name: "macd".into(),
                value: m.histogram,
                weight: self.weights.macd,
                confidence: (m.histogram.abs() / scale).min(1.0),
                direction: signum(m.histogram),
            });
        }

        if let Some(value) = indicators::percent_b(closes, 20, 2.0) {
            let (direction, confidence) = if value < 0.0 {
                (1.0, (-value).min(1.0))
            } else if value > 1.0 {
                (-1.0, (value - 1.0).min(1.0))
            } else {
                (0.0, 0.0)
            };
            out.push(IndicatorReading {
                name: "percent_b".into(),
                value,
                weight: self.weights.percent_b,
                confidence,
                direction,
            });
        }

        out
    }
}

impl Default for TechnicalSignalEngine {
    fn default() -> Self {
        Self::new(IndicatorWeights::default(), 0.15)
    }
}

impl SignalEngine for TechnicalSignalEngine {
    fn compute(&self, series: &[Bar]) -> SignalSummary {
        let closes: Vec<f64> = series.iter().map(|b| b.close).collect();
        let readings = self.readings(&closes);

        let total_weight: f64 = readings.iter().map(|r| r.weight).sum();
        if readings.is_empty() || total_weight <= 0.0 {
            return SignalSummary::new(SignalType::Neutral, 0.0);
        }

        let score = readings.iter().map(IndicatorReading::contribution).sum::<f64>() / total_weight;

        let (overall_signal, confidence) = if score > self.entry_threshold {
            (SignalType::Buy, score * 100.0)
        } else if score < -self.entry_threshold {
            (SignalType::Sell, -score * 100.0)
        } else {
            (SignalType::Hold, (1.0 - score.abs()) * 100.0)
        };

        SignalSummary {
            overall_signal,
            confidence: confidence.clamp(0.0, 100.0).round(),
            indicators: readings,
            computed_at: Utc::now(),
        }
    }
}

fn signum(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::series_buffer::tests::sample_bar;

    fn series_from(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| sample_bar(i as i64 * 60_000, c, true))
            .collect()
    }

    #[test]
    fn short_series_is_neutral() {
        let engine = TechnicalSignalEngine::default();
        let summary = engine.compute(&series_from(&[100.0, 101.0, 102.0]));
        assert_eq!(summary.overall_signal, SignalType::Neutral);
        assert_eq!(summary.confidence, 0.0);
        assert!(summary.indicators.is_empty());
    }

    #[test]
    fn flat_series_holds() {
        let engine = TechnicalSignalEngine::default();
        let summary = engine.compute(&series_from(&[100.0; 60]));
        assert_eq!(summary.overall_signal, SignalType::Hold);
    }

    #[test]
    fn steady_rally_reads_bullish() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 1.004f64.powi(i)).collect();
        let engine = TechnicalSignalEngine::new(
            IndicatorWeights {
                ema_trend: 1.0,
                rsi: 0.0,
                macd: 0.0,
                percent_b: 0.0,
            },
            0.15,
        );
        let summary = engine.compute(&series_from(&closes));
        assert_eq!(summary.overall_signal, SignalType::Buy);
        assert!(summary.confidence > 0.0 && summary.confidence <= 100.0);
    }

    #[test]
    fn compute_is_deterministic() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 3.0).collect();
        let engine = TechnicalSignalEngine::default();
        let a = engine.compute(&series_from(&closes));
        let b = engine.compute(&series_from(&closes));
        assert_eq!(a.overall_signal, b.overall_signal);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.indicators, b.indicators);
    }
}

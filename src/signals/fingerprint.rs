use serde::Serialize;

use crate::signals::SignalSummary;
use crate::types::SignalType;

/// Equality key used to recognise "the same signal as before".
///
/// Combines the overall direction with the confidence rounded to a whole
/// percentage point. A non-finite confidence gets its own bucket (`None`) so
/// a broken summary never aliases a real one. No ordering semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SignalFingerprint {
    pub signal: SignalType,
    pub confidence: Option<i64>,
}

impl SignalFingerprint {
    pub fn of(summary: &SignalSummary) -> Self {
        let confidence = summary
            .confidence
            .is_finite()
            .then(|| summary.confidence.round() as i64);
        Self {
            signal: summary.overall_signal,
            confidence,
        }
    }
}

impl std::fmt::Display for SignalFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.confidence {
            Some(c) => write!(f, "{}-{}", self.signal, c),
            None => write!(f, "{}-NaN", self.signal),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_direction_and_confidence() {
        let fp = SignalFingerprint::of(&SignalSummary::new(SignalType::Buy, 73.0));
        assert_eq!(fp.to_string(), "BUY-73");
    }

    #[test]
    fn same_direction_and_confidence_are_equal() {
        let a = SignalFingerprint::of(&SignalSummary::new(SignalType::Sell, 75.0));
        let b = SignalFingerprint::of(&SignalSummary::new(SignalType::Sell, 75.0));
        assert_eq!(a, b);
    }

    #[test]
    fn confidence_change_changes_fingerprint() {
        let a = SignalFingerprint::of(&SignalSummary::new(SignalType::Buy, 82.0));
        let b = SignalFingerprint::of(&SignalSummary::new(SignalType::Buy, 91.0));
        assert_ne!(a, b);
    }

    #[test]
    fn nan_confidence_has_its_own_bucket() {
        let fp = SignalFingerprint::of(&SignalSummary::new(SignalType::Buy, f64::NAN));
        assert_eq!(fp.confidence, None);
        assert_eq!(fp.to_string(), "BUY-NaN");
    }
}

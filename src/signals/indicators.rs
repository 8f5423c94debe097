// =============================================================================
// Technical indicators feeding the default signal engine
// =============================================================================
//
// Pure functions over close prices. Every function returns `Option` so that
// insufficient history or numerical edge cases surface as "no reading" rather
// than a bogus value.
//
//   EMA       multiplier = 2 / (period + 1), seeded with the SMA of the first
//             `period` closes.
//   RSI       Wilder smoothing of average gain / loss.
//   MACD      EMA(fast) - EMA(slow), signal = EMA(signal) of the MACD line.
//   %B        (close - lower) / (upper - lower) for SMA ± k·σ bands.
// =============================================================================

/// Full EMA series; element 0 corresponds to close index `period - 1`.
pub fn ema_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = closes[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(closes.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &close in &closes[period..] {
        let next = close * multiplier + prev * (1.0 - multiplier);
        if !next.is_finite() {
            break;
        }
        out.push(next);
        prev = next;
    }
    out
}

/// Most recent EMA value.
pub fn ema(closes: &[f64], period: usize) -> Option<f64> {
    ema_series(closes, period).last().copied()
}

/// Most recent RSI value in `[0, 100]`.
///
/// Needs `period + 1` closes. A flat market reads 50, a market with no
/// down moves reads 100.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let p = period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;

    for (i, w) in closes.windows(2).enumerate() {
        let delta = w[1] - w[0];
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        if i < period {
            avg_gain += gain / p;
            avg_loss += loss / p;
        } else {
            avg_gain = (avg_gain * (p - 1.0) + gain) / p;
            avg_loss = (avg_loss * (p - 1.0) + loss) / p;
        }
    }

    let value = if avg_gain == 0.0 && avg_loss == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };
    value.is_finite().then_some(value)
}

/// MACD line, signal line and histogram for the latest close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || fast >= slow {
        return None;
    }
    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    if slow_series.is_empty() {
        return None;
    }
    // Align both series on the same close index.
    let offset = slow - fast;
    let line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .filter_map(|(i, s)| fast_series.get(i + offset).map(|f| f - s))
        .collect();

    let signal_value = ema(&line, signal)?;
    let line_value = *line.last()?;
    let histogram = line_value - signal_value;
    histogram.is_finite().then_some(Macd {
        line: line_value,
        signal: signal_value,
        histogram,
    })
}

/// Bollinger %B of the latest close against SMA(period) ± `width` σ.
///
/// Returns `None` for a perfectly flat window (zero band width).
pub fn percent_b(closes: &[f64], period: usize, width: f64) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / period as f64;
    let sigma = variance.sqrt();
    if sigma == 0.0 || !sigma.is_finite() {
        return None;
    }
    let lower = mean - width * sigma;
    let upper = mean + width * sigma;
    let last = *window.last()?;
    let value = (last - lower) / (upper - lower);
    value.is_finite().then_some(value)
}

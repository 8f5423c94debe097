use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV bar (kline) for one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

/// Outcome of integrating one incoming bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarUpdate {
    /// The newest bar was replaced in place (same `open_time`).
    Replaced,
    /// A newer bar was appended (possibly evicting the oldest).
    Appended,
    /// The bar is older than the newest one held and was ignored.
    Stale,
}

impl BarUpdate {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Stale)
    }
}

// ---------------------------------------------------------------------------
// SeriesBuffer -- bounded ordered series for one instrument selector
// ---------------------------------------------------------------------------

/// Default number of bars held per selector.
pub const DEFAULT_CAPACITY: usize = 100;

/// Ordered, bounded bar series owned by exactly one supervisor.
///
/// Bars are keyed by `open_time`, which never decreases from front to back.
/// The newest bar is continuously replaced while it is still forming; a bar
/// with a later `open_time` is appended and the oldest bar is evicted once
/// the buffer exceeds its capacity. Interior bars are never reordered or
/// dropped.
#[derive(Debug)]
pub struct SeriesBuffer {
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl SeriesBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bars: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Replace the whole series with a freshly fetched history.
    ///
    /// The history goes through the same integration rules as live updates,
    /// so an out-of-order payload cannot break the ordering invariant.
    /// Returns the number of bars retained.
    pub fn seed(&mut self, history: Vec<Bar>) -> usize {
        self.bars.clear();
        let mut stale = 0usize;
        for bar in history {
            if self.integrate(bar) == BarUpdate::Stale {
                stale += 1;
            }
        }
        if stale > 0 {
            debug!(stale, "dropped out-of-order bars while seeding history");
        }
        self.bars.len()
    }

    /// Insert a live update.
    ///
    /// * Same `open_time` as the newest bar: replace it in place.
    /// * Later `open_time`: append, trimming the oldest to stay within
    ///   capacity.
    /// * Earlier `open_time`: ignore.
    pub fn integrate(&mut self, bar: Bar) -> BarUpdate {
        match self.bars.back() {
            Some(last) if bar.open_time < last.open_time => BarUpdate::Stale,
            Some(last) if bar.open_time == last.open_time => {
                if let Some(slot) = self.bars.back_mut() {
                    *slot = bar;
                }
                BarUpdate::Replaced
            }
            _ => {
                self.bars.push_back(bar);
                while self.bars.len() > self.capacity {
                    self.bars.pop_front();
                }
                BarUpdate::Appended
            }
        }
    }

    /// Contiguous oldest-first view of the series for the signal engine.
    pub fn series(&mut self) -> &[Bar] {
        self.bars.make_contiguous()
    }

    /// Close prices, oldest first.
    #[cfg(test)]
    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

impl Default for SeriesBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_bar(open_time: i64, close: f64, is_closed: bool) -> Bar {
        Bar {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            is_closed,
        }
    }

    #[test]
    fn evicts_oldest_on_overflow() {
        let mut buf = SeriesBuffer::new(3);
        for i in 0..5 {
            buf.integrate(sample_bar(i * 60_000, 100.0 + i as f64, true));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.closes(), vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn open_bar_is_replaced_in_place() {
        let mut buf = SeriesBuffer::new(10);
        assert_eq!(buf.integrate(sample_bar(0, 50.0, false)), BarUpdate::Appended);
        assert_eq!(buf.integrate(sample_bar(0, 51.0, false)), BarUpdate::Replaced);
        assert_eq!(buf.integrate(sample_bar(0, 52.0, true)), BarUpdate::Replaced);
        assert_eq!(buf.len(), 1);
        let last = buf.last().unwrap();
        assert!(last.is_closed);
        assert!((last.close - 52.0).abs() < f64::EPSILON);
    }

    #[test]
    fn next_bar_appends_after_close() {
        let mut buf = SeriesBuffer::new(10);
        buf.integrate(sample_bar(0, 50.0, true));
        assert_eq!(buf.integrate(sample_bar(60_000, 51.0, false)), BarUpdate::Appended);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn stale_bar_is_ignored() {
        let mut buf = SeriesBuffer::new(10);
        buf.integrate(sample_bar(60_000, 50.0, true));
        buf.integrate(sample_bar(120_000, 51.0, false));
        assert_eq!(buf.integrate(sample_bar(0, 10.0, true)), BarUpdate::Stale);
        assert_eq!(buf.closes(), vec![50.0, 51.0]);
    }

    #[test]
    fn seed_replaces_previous_series() {
        let mut buf = SeriesBuffer::new(4);
        buf.integrate(sample_bar(0, 1.0, true));
        let history: Vec<Bar> = (10..16)
            .map(|i| sample_bar(i * 60_000, i as f64, true))
            .collect();
        assert_eq!(buf.seed(history), 4);
        assert_eq!(buf.closes(), vec![12.0, 13.0, 14.0, 15.0]);
    }

    #[test]
    fn series_is_oldest_first_after_wraparound() {
        let mut buf = SeriesBuffer::new(2);
        for i in 0..4 {
            buf.integrate(sample_bar(i * 60_000, i as f64, true));
        }
        let times: Vec<i64> = buf.series().iter().map(|b| b.open_time).collect();
        assert_eq!(times, vec![120_000, 180_000]);
    }
}

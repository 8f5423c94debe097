// =============================================================================
// Alert Dispatcher — best-effort fan-out with toast rate limiting
// =============================================================================
//
// Sound and notification fire for every decision handed over by the signal
// processor (which already deduplicates). Toasts are additionally
// rate-limited because recomputation can outpace what a human can read.
//
// Connection advisories go through a separate gate and a different toast
// style so connection noise is never mistaken for a trading signal.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::alerts::sinks::{Notifier, SoundPlayer, Toast, ToastStyle, Toaster};
use crate::error::PipelineError;
use crate::signals::AlertSettings;
use crate::types::SignalType;

/// Default minimum gap between two signal toasts.
pub const MIN_TOAST_INTERVAL: Duration = Duration::from_millis(5_000);
/// Default minimum gap between two connection advisories.
pub const MIN_ADVISORY_INTERVAL: Duration = Duration::from_millis(10_000);

// =============================================================================
// ToastGate
// =============================================================================

/// Explicit rate-limit timer for one toast channel.
#[derive(Debug, Clone)]
pub struct ToastGate {
    min_interval: Duration,
    last: Option<Instant>,
}

impl ToastGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Returns `true` and arms the gate if at least `min_interval` has elapsed
    /// since the last accepted toast.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let open = match self.last {
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
            None => true,
        };
        if open {
            self.last = Some(now);
        }
        open
    }

    /// Record a toast that bypassed the gate.
    pub fn arm(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

// =============================================================================
// DispatchReport
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOutcome {
    Delivered,
    Failed,
    /// Channel disabled by configuration.
    Disabled,
    /// Suppressed by the rate limit.
    RateLimited,
}

/// Per-channel result of a single dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sound: ChannelOutcome,
    pub notification: ChannelOutcome,
    pub toast: ChannelOutcome,
}

// =============================================================================
// AlertDispatcher
// =============================================================================

pub struct AlertDispatcher {
    sound: Arc<dyn SoundPlayer>,
    notifier: Arc<dyn Notifier>,
    toaster: Arc<dyn Toaster>,
    signal_toasts: ToastGate,
    advisory_toasts: ToastGate,
}

impl AlertDispatcher {
    /// Dispatcher with the default rate limits.
    #[cfg(test)]
    pub fn new(
        sound: Arc<dyn SoundPlayer>,
        notifier: Arc<dyn Notifier>,
        toaster: Arc<dyn Toaster>,
    ) -> Self {
        Self::with_intervals(sound, notifier, toaster, MIN_TOAST_INTERVAL, MIN_ADVISORY_INTERVAL)
    }

    pub fn with_intervals(
        sound: Arc<dyn SoundPlayer>,
        notifier: Arc<dyn Notifier>,
        toaster: Arc<dyn Toaster>,
        toast_interval: Duration,
        advisory_interval: Duration,
    ) -> Self {
        Self {
            sound,
            notifier,
            toaster,
            signal_toasts: ToastGate::new(toast_interval),
            advisory_toasts: ToastGate::new(advisory_interval),
        }
    }

    /// Whether the sound channel is initialised.
    pub fn audio_ready(&self) -> bool {
        self.sound.is_ready()
    }

    /// Fan an actionable signal out to every channel. A failure in one
    /// channel never prevents the others.
    pub fn dispatch(
        &mut self,
        signal: SignalType,
        confidence: f64,
        label: &str,
        settings: &AlertSettings,
        now: Instant,
    ) -> DispatchReport {
        info!(signal = %signal, instrument = %label, confidence, "dispatching signal alert");

        let sound = match self.sound.play(signal, settings.alert_volume) {
            Ok(()) => ChannelOutcome::Delivered,
            Err(e) => {
                warn!(error = %e, "alert sound failed");
                ChannelOutcome::Failed
            }
        };

        let notification = if !settings.notifications_enabled {
            ChannelOutcome::Disabled
        } else {
            match self.notifier.notify(signal, label, confidence) {
                Ok(()) => ChannelOutcome::Delivered,
                Err(e) => {
                    warn!(error = %e, "alert notification failed");
                    ChannelOutcome::Failed
                }
            }
        };

        let toast = if !self.signal_toasts.try_acquire(now) {
            ChannelOutcome::RateLimited
        } else {
            let style = match signal {
                SignalType::Sell => ToastStyle::Error,
                _ => ToastStyle::Success,
            };
            let body = format!("{label}: {signal} signal with {confidence:.0}% confidence");
            match self.toaster.show(Toast::new(format!("{signal} signal"), body, style)) {
                Ok(()) => ChannelOutcome::Delivered,
                Err(e) => {
                    warn!(error = %e, "alert toast failed");
                    ChannelOutcome::Failed
                }
            }
        };

        DispatchReport {
            sound,
            notification,
            toast,
        }
    }

    /// Show a connection advisory, rate-limited independently of signal
    /// toasts. Terminal errors always get through and re-arm the gate.
    /// Returns whether the advisory was shown.
    pub fn advise(&mut self, error: &PipelineError, label: &str, now: Instant) -> bool {
        let style = if error.is_recoverable() {
            if !self.advisory_toasts.try_acquire(now) {
                return false;
            }
            ToastStyle::Warning
        } else {
            self.advisory_toasts.arm(now);
            ToastStyle::Error
        };
        let toast = Toast::new(format!("Connection issue ({label})"), error.to_string(), style);
        match self.toaster.show(toast) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "advisory toast failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::sinks::tests::Recorder;

    fn dispatcher(rec: &Arc<Recorder>) -> AlertDispatcher {
        AlertDispatcher::new(rec.clone(), rec.clone(), rec.clone())
    }

    #[test]
    fn toast_suppressed_within_interval() {
        let rec = Arc::new(Recorder::default());
        let mut d = dispatcher(&rec);
        let cfg = AlertSettings::default();
        let t0 = Instant::now();

        d.dispatch(SignalType::Buy, 82.0, "BTCUSDT@5m", &cfg, t0);
        let second = d.dispatch(
            SignalType::Sell,
            75.0,
            "BTCUSDT@5m",
            &cfg,
            t0 + Duration::from_millis(2_000),
        );

        assert_eq!(second.toast, ChannelOutcome::RateLimited);
        assert_eq!(rec.sounds.lock().len(), 2);
        assert_eq!(rec.notifications.lock().len(), 2);
        assert_eq!(rec.toasts.lock().len(), 1);
    }

    #[test]
    fn toast_allowed_after_interval() {
        let rec = Arc::new(Recorder::default());
        let mut d = dispatcher(&rec);
        let cfg = AlertSettings::default();
        let t0 = Instant::now();

        d.dispatch(SignalType::Buy, 82.0, "BTCUSDT@5m", &cfg, t0);
        d.dispatch(
            SignalType::Sell,
            75.0,
            "BTCUSDT@5m",
            &cfg,
            t0 + Duration::from_millis(6_000),
        );

        assert_eq!(rec.sounds.lock().len(), 2);
        assert_eq!(rec.toasts.lock().len(), 2);
    }

    #[test]
    fn failing_channels_do_not_block_others() {
        let failing = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let toasts = Arc::new(Recorder::default());
        let mut d = AlertDispatcher::new(failing.clone(), failing.clone(), toasts.clone());

        let report = d.dispatch(
            SignalType::Buy,
            90.0,
            "ETHUSDT@1h",
            &AlertSettings::default(),
            Instant::now(),
        );

        assert_eq!(report.sound, ChannelOutcome::Failed);
        assert_eq!(report.notification, ChannelOutcome::Failed);
        assert_eq!(report.toast, ChannelOutcome::Delivered);
        assert_eq!(toasts.toasts.lock().len(), 1);
    }

    #[test]
    fn notifications_respect_setting() {
        let rec = Arc::new(Recorder::default());
        let mut d = dispatcher(&rec);
        let cfg = AlertSettings {
            notifications_enabled: false,
            alert_volume: 0.8,
            ..AlertSettings::default()
        };
        let report = d.dispatch(SignalType::Sell, 88.0, "BTCUSDT@5m", &cfg, Instant::now());
        assert_eq!(report.notification, ChannelOutcome::Disabled);
        assert!(rec.notifications.lock().is_empty());
        assert_eq!(rec.sounds.lock()[0], (SignalType::Sell, 0.8));
    }

    #[test]
    fn advisories_use_their_own_gate() {
        let rec = Arc::new(Recorder::default());
        let mut d = dispatcher(&rec);
        let t0 = Instant::now();
        let err = PipelineError::TransportError("socket closed".into());

        d.dispatch(SignalType::Buy, 80.0, "BTCUSDT@5m", &AlertSettings::default(), t0);
        assert!(d.advise(&err, "BTCUSDT@5m", t0));
        assert!(!d.advise(&err, "BTCUSDT@5m", t0 + Duration::from_millis(3_000)));
        assert!(d.advise(&err, "BTCUSDT@5m", t0 + Duration::from_millis(10_000)));

        let toasts = rec.toasts.lock();
        assert_eq!(toasts.len(), 3);
        assert_eq!(toasts[1].style, ToastStyle::Warning);
    }

    #[test]
    fn terminal_advisory_is_never_rate_limited() {
        let rec = Arc::new(Recorder::default());
        let mut d = dispatcher(&rec);
        let t0 = Instant::now();
        let refused = PipelineError::TransportError("connection refused".into());
        let terminal = PipelineError::RetryBudgetExhausted { attempts: 10 };

        assert!(d.advise(&refused, "BTCUSDT@5m", t0));
        assert!(d.advise(&terminal, "BTCUSDT@5m", t0));
        // The terminal advisory re-arms the gate for recoverable ones.
        assert!(!d.advise(&refused, "BTCUSDT@5m", t0 + Duration::from_millis(3_000)));

        let toasts = rec.toasts.lock();
        assert_eq!(toasts.len(), 2);
        assert_eq!(toasts[1].style, ToastStyle::Error);
        assert_eq!(toasts[1].body, terminal.to_string());
    }
}

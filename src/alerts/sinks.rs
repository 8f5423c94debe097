// =============================================================================
// Alert sinks — sound, notification and toast channels
// =============================================================================
//
// Each channel is a small trait so the dispatcher can be exercised with
// recording fakes. The concrete sinks are thin:
//   - TerminalBell   rings the terminal bell on stderr
//   - WebhookNotifier POSTs a JSON payload (ntfy / Slack-style webhooks)
//   - LogNotifier    writes the notification to the log when no webhook is set
//   - FeedToaster    pushes toasts into AppState for the dashboard feed
// =============================================================================

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::types::SignalType;

pub trait SoundPlayer: Send + Sync {
    /// Whether the audio output has been initialised and can play.
    fn is_ready(&self) -> bool;
    /// `volume` is in `[0, 1]`.
    fn play(&self, kind: SignalType, volume: f64) -> Result<()>;
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: SignalType, label: &str, confidence: f64) -> Result<()>;
}

pub trait Toaster: Send + Sync {
    fn show(&self, toast: Toast) -> Result<()>;
}

/// Visual hint for the toast renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastStyle {
    Success,
    Error,
    Warning,
    Info,
}

/// An on-screen message for dashboard clients.
#[derive(Debug, Clone, Serialize)]
pub struct Toast {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub style: ToastStyle,
    /// ISO 8601 timestamp.
    pub at: String,
}

impl Toast {
    pub fn new(title: impl Into<String>, body: impl Into<String>, style: ToastStyle) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            body: body.into(),
            style,
            at: Utc::now().to_rfc3339(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sound
// ---------------------------------------------------------------------------

/// Rings the terminal bell: once for BUY, twice for SELL. A zero volume is
/// treated as muted.
#[derive(Debug, Default)]
pub struct TerminalBell;

impl SoundPlayer for TerminalBell {
    fn is_ready(&self) -> bool {
        true
    }

    fn play(&self, kind: SignalType, volume: f64) -> Result<()> {
        if volume <= 0.0 {
            debug!(kind = %kind, "alert sound muted");
            return Ok(());
        }
        let rings = match kind {
            SignalType::Sell => "\x07\x07",
            _ => "\x07",
        };
        let mut err = std::io::stderr().lock();
        err.write_all(rings.as_bytes())
            .context("failed to ring terminal bell")?;
        err.flush().context("failed to flush stderr")
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct NotificationPayload<'a> {
    title: String,
    message: String,
    signal: SignalType,
    instrument: &'a str,
    confidence: f64,
}

/// Fire-and-forget JSON POST to a webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .context("failed to build webhook client")?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, kind: SignalType, label: &str, confidence: f64) -> Result<()> {
        let runtime =
            tokio::runtime::Handle::try_current().context("no tokio runtime for webhook")?;
        let payload = NotificationPayload {
            title: format!("{kind} signal"),
            message: format!("{kind} on {label} ({confidence:.0}% confidence)"),
            signal: kind,
            instrument: label,
            confidence,
        };
        let body = serde_json::to_value(&payload).context("failed to encode notification")?;

        let client = self.client.clone();
        let url = self.url.clone();
        runtime.spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => debug!("notification delivered"),
                Ok(resp) => warn!(status = %resp.status(), "notification webhook rejected payload"),
                Err(e) => warn!(error = %e, "notification webhook request failed"),
            }
        });
        Ok(())
    }
}

/// Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: SignalType, label: &str, confidence: f64) -> Result<()> {
        info!(signal = %kind, instrument = %label, confidence, "NOTIFICATION");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Toasts
// ---------------------------------------------------------------------------

/// Publishes toasts to dashboard clients through the shared state feed.
pub struct FeedToaster {
    state: Arc<AppState>,
}

impl FeedToaster {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

impl Toaster for FeedToaster {
    fn show(&self, toast: Toast) -> Result<()> {
        debug!(title = %toast.title, style = ?toast.style, "toast published");
        self.state.push_toast(toast);
        Ok(())
    }
}

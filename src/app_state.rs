// =============================================================================
// Shared Application State — Signal Sentinel
// =============================================================================
//
// Observable state published by the supervisor and read by the dashboard API
// and WebSocket feed. The supervisor owns the pipeline; this struct only
// mirrors what it has decided so readers never touch the pipeline itself.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::alerts::{DispatchReport, Toast};
use crate::error::{ErrorView, PipelineError};
use crate::runtime_config::RuntimeConfig;
use crate::signals::{AlertState, SignalSummary};
use crate::types::{ConnectionState, InstrumentSelector, SignalType};

// =============================================================================
// Records
// =============================================================================

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// One alert that was actually dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub signal: SignalType,
    pub confidence: f64,
    pub instrument: String,
    pub channels: DispatchReport,
    pub at: String,
}

/// Connection lifecycle as last published by the supervisor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStatus {
    pub selector: Option<InstrumentSelector>,
    pub state: ConnectionState,
    pub attempts: u32,
    pub next_retry_ms: Option<u64>,
    pub last_error: Option<ErrorView>,
    pub bars_buffered: usize,
}

/// Serialisable snapshot for `GET /api/v1/state` and the WebSocket feed.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: String,
    pub uptime_secs: u64,
    pub config: RuntimeConfig,
    pub connection: ConnectionStatus,
    pub last_signal: Option<SignalSummary>,
    pub alert_state: AlertState,
    pub recent_alerts: Vec<AlertRecord>,
    pub recent_toasts: Vec<Toast>,
    pub recent_errors: Vec<ErrorRecord>,
}

// =============================================================================
// AppState
// =============================================================================

const MAX_RECENT_ERRORS: usize = 50;
const MAX_RECENT_ALERTS: usize = 100;
const MAX_RECENT_TOASTS: usize = 20;

pub struct AppState {
    /// Incremented on every meaningful mutation. The WebSocket feed uses this
    /// to detect changes and push updates.
    pub state_version: AtomicU64,

    /// WebSocket message sequence number (incremented per message sent).
    pub ws_sequence_number: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    pub connection: RwLock<ConnectionStatus>,
    pub last_signal: RwLock<Option<SignalSummary>>,
    pub alert_state: RwLock<AlertState>,

    pub recent_alerts: RwLock<Vec<AlertRecord>>,
    pub recent_toasts: RwLock<Vec<Toast>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            ws_sequence_number: AtomicU64::new(0),
            runtime_config: Arc::new(RwLock::new(config)),
            connection: RwLock::new(ConnectionStatus::default()),
            last_signal: RwLock::new(None),
            alert_state: RwLock::new(AlertState::default()),
            recent_alerts: RwLock::new(Vec::new()),
            recent_toasts: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Publishers (called by the supervisor) ───────────────────────────

    pub fn set_connection(&self, status: ConnectionStatus) {
        *self.connection.write() = status;
        self.increment_version();
    }

    pub fn set_signal(&self, summary: SignalSummary, alert_state: AlertState) {
        *self.last_signal.write() = Some(summary);
        *self.alert_state.write() = alert_state;
        self.increment_version();
    }

    /// Drop everything tied to the previous instrument selector.
    pub fn clear_signal(&self) {
        *self.last_signal.write() = None;
        *self.alert_state.write() = AlertState::default();
        self.increment_version();
    }

    pub fn push_alert(&self, record: AlertRecord) {
        push_capped(&self.recent_alerts, record, MAX_RECENT_ALERTS);
        self.increment_version();
    }

    pub fn push_toast(&self, toast: Toast) {
        push_capped(&self.recent_toasts, toast, MAX_RECENT_TOASTS);
        self.increment_version();
    }

    // ── Error Logging ───────────────────────────────────────────────────

    pub fn push_error(&self, err: &PipelineError) {
        let record = ErrorRecord {
            message: err.to_string(),
            code: Some(err.code().to_string()),
            at: Utc::now().to_rfc3339(),
        };
        push_capped(&self.recent_errors, record, MAX_RECENT_ERRORS);
        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    pub fn build_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().to_rfc3339(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            config: self.runtime_config.read().clone(),
            connection: self.connection.read().clone(),
            last_signal: self.last_signal.read().clone(),
            alert_state: self.alert_state.read().clone(),
            recent_alerts: self.recent_alerts.read().clone(),
            recent_toasts: self.recent_toasts.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

/// Append to a ring-style log, evicting the oldest entries beyond `cap`.
fn push_capped<T>(log: &RwLock<Vec<T>>, item: T, cap: usize) {
    let mut entries = log.write();
    entries.push(item);
    if entries.len() > cap {
        let overflow = entries.len() - cap;
        entries.drain(..overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_is_capped() {
        let state = AppState::new(RuntimeConfig::default());
        for i in 0..(MAX_RECENT_ERRORS + 5) {
            state.push_error(&PipelineError::TransportError(format!("drop {i}")));
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors[0].message, "transport error: drop 5");
        assert_eq!(errors[0].code.as_deref(), Some("TRANSPORT_ERROR"));
    }

    #[test]
    fn mutations_bump_version() {
        let state = AppState::new(RuntimeConfig::default());
        let v0 = state.current_state_version();
        state.set_connection(ConnectionStatus {
            state: ConnectionState::Connecting,
            ..ConnectionStatus::default()
        });
        state.set_signal(SignalSummary::new(SignalType::Hold, 50.0), AlertState::default());
        assert_eq!(state.current_state_version(), v0 + 2);
    }

    #[test]
    fn snapshot_serialises() {
        let state = AppState::new(RuntimeConfig::default());
        state.set_signal(SignalSummary::new(SignalType::Buy, 81.0), AlertState::default());
        let json = serde_json::to_value(state.build_snapshot()).unwrap();
        assert_eq!(json["last_signal"]["overall_signal"], "BUY");
        assert_eq!(json["connection"]["state"], "DISCONNECTED");
    }
}

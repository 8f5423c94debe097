// =============================================================================
// Pipeline error taxonomy
// =============================================================================
//
// Only `InvalidSelector` and `SupervisorGone` ever reach a caller. The other
// variants are recorded by the supervisor as `last_error` and surfaced as
// connection advisories.
// =============================================================================

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Historical fetch failed.
    #[error("market data unavailable: {0}")]
    DataUnavailable(String),

    /// Live subscription could not be opened or dropped.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Automatic reconnection gave up after the configured number of attempts.
    #[error("retry budget exhausted after {attempts} attempts")]
    RetryBudgetExhausted { attempts: u32 },

    #[error("invalid instrument selector: {0}")]
    InvalidSelector(String),

    /// The supervisor task has already shut down.
    #[error("supervisor is no longer running")]
    SupervisorGone,
}

impl PipelineError {
    /// Short machine-readable code for dashboards and error records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DataUnavailable(_) => "DATA_UNAVAILABLE",
            Self::TransportError(_) => "TRANSPORT_ERROR",
            Self::RetryBudgetExhausted { .. } => "RETRY_BUDGET_EXHAUSTED",
            Self::InvalidSelector(_) => "INVALID_SELECTOR",
            Self::SupervisorGone => "SUPERVISOR_GONE",
        }
    }

    /// Whether the supervisor can recover without caller intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DataUnavailable(_) | Self::TransportError(_))
    }
}

/// Serialisable view of a pipeline error for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorView {
    pub code: &'static str,
    pub message: String,
    pub recoverable: bool,
}

impl From<&PipelineError> for ErrorView {
    fn from(err: &PipelineError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

// =============================================================================
// Signals Module
// =============================================================================
//
// From bar series to alert decision:
// - Signal engine (weighted indicator vote) producing a `SignalSummary`
// - Fingerprinting for duplicate detection
// - Processor applying dedup, confidence and direction-change gates

pub mod engine;
pub mod fingerprint;
pub mod indicators;
pub mod processor;

pub use engine::{SignalEngine, SignalSummary, TechnicalSignalEngine};
pub use processor::{AlertDecision, AlertSettings, AlertState, SignalProcessor};

// =============================================================================
// Signal Sentinel — Main Entry Point
// =============================================================================
//
// Watches one instrument's klines, recomputes a technical signal on every
// update and raises deduplicated, confidence-gated alerts. The dashboard API
// exposes state and lets the user switch instruments or force a reconnect.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod alerts;
mod api;
mod app_state;
mod binance;
mod error;
mod market_data;
mod runtime_config;
mod signals;
mod supervisor;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::alerts::{AlertDispatcher, FeedToaster, LogNotifier, Notifier, TerminalBell, WebhookNotifier};
use crate::app_state::AppState;
use crate::binance::{BinanceClient, BinanceSource};
use crate::runtime_config::RuntimeConfig;
use crate::signals::TechnicalSignalEngine;
use crate::supervisor::{ConnectionSupervisor, SupervisorConfig};

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Signal Sentinel — Starting Up                     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();

    let selector = config.selector().context("invalid instrument in runtime config")?;
    let settings = config.alert_settings();
    info!(
        selector = %selector,
        threshold = settings.confidence_threshold,
        alerts_enabled = settings.alerts_enabled,
        "Configured instrument"
    );

    // ── 2. Alert sinks ───────────────────────────────────────────────────
    let state = Arc::new(AppState::new(config.clone()));

    let notifier: Arc<dyn Notifier> = match config.notify_webhook.as_deref() {
        Some(url) => {
            info!("Notifications will be POSTed to the configured webhook");
            Arc::new(WebhookNotifier::new(url)?)
        }
        None => Arc::new(LogNotifier),
    };
    let dispatcher = AlertDispatcher::with_intervals(
        Arc::new(TerminalBell),
        notifier,
        Arc::new(FeedToaster::new(state.clone())),
        config.toast_interval(),
        config.advisory_interval(),
    );

    // ── 3. Connection supervisor ─────────────────────────────────────────
    let source = Arc::new(BinanceSource::new(BinanceClient::new()?));
    let (supervisor, supervisor_task) = ConnectionSupervisor::spawn(
        source,
        Arc::new(TechnicalSignalEngine::default()),
        dispatcher,
        state.clone(),
        SupervisorConfig::from(&config),
        settings,
    );

    supervisor
        .on_signal_update(|summary| {
            debug!(
                signal = %summary.overall_signal,
                confidence = summary.confidence,
                "signal updated"
            );
        })
        .await?;
    supervisor.start(selector).await?;

    // ── 4. Start the API server ──────────────────────────────────────────
    let app = api::router(api::ApiState {
        app: state.clone(),
        supervisor: supervisor.clone(),
        config_path: Some(PathBuf::from(CONFIG_PATH)),
    });
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "API server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = supervisor.shutdown().await {
        warn!(error = %e, "Supervisor already stopped");
    }
    if let Err(e) = supervisor_task.await {
        error!(error = %e, "Supervisor task ended abnormally");
    }

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Signal Sentinel shut down complete.");
    Ok(())
}

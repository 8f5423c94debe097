// =============================================================================
// Connection Supervisor — live subscription lifecycle for one selector
// =============================================================================
//
// A single actor task owns everything that mutates per selector: the series
// buffer, the signal processor, the alert dispatcher, the live feed and the
// retry timer. Callers talk to it through `SupervisorHandle`; every command
// is acknowledged only after the actor has applied it, so teardown is
// synchronous from the caller's point of view.
//
// State machine:
//
//   DISCONNECTED ──start──▶ CONNECTING ──fetch ok + subscribe ok──▶ CONNECTED
//        ▲                      │  ▲                                  │
//        │ budget exhausted     │  └──────── retry timer ──────┐      │ feed drop
//        │                      ▼                              │      ▼
//        └──────────────── RECONNECTING ◀──────────────────────┴──────┘
//
// Connection attempts run as spawned tasks tagged with a generation number.
// Any teardown bumps the generation, so late results from a superseded
// attempt are discarded (and their subscription closed).
// =============================================================================

pub mod backoff;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alerts::AlertDispatcher;
use crate::app_state::{AlertRecord, AppState, ConnectionStatus};
use crate::error::{ErrorView, PipelineError};
use crate::market_data::{Bar, FeedEvent, FeedReceiver, MarketDataSource, SeriesBuffer, SubscriptionHandle};
use crate::runtime_config::RuntimeConfig;
use crate::signals::{AlertDecision, AlertSettings, SignalEngine, SignalProcessor, SignalSummary};
use crate::types::{ConnectionState, InstrumentSelector};

use self::backoff::BackoffPolicy;

/// Callback invoked with every freshly computed summary.
pub type SignalListener = Box<dyn Fn(&SignalSummary) + Send + Sync>;

const COMMAND_QUEUE_DEPTH: usize = 64;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Bars requested from the historical endpoint on every attempt.
    pub history_limit: usize,
    pub buffer_capacity: usize,
    pub backoff: BackoffPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            buffer_capacity: crate::market_data::series_buffer::DEFAULT_CAPACITY,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl From<&RuntimeConfig> for SupervisorConfig {
    fn from(cfg: &RuntimeConfig) -> Self {
        Self {
            history_limit: cfg.history_limit,
            buffer_capacity: cfg.buffer_capacity,
            backoff: cfg.backoff_policy(),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

enum Command {
    Start {
        selector: InstrumentSelector,
        ack: oneshot::Sender<()>,
    },
    Configure {
        selector: InstrumentSelector,
        settings: AlertSettings,
        ack: oneshot::Sender<()>,
    },
    Stop {
        ack: oneshot::Sender<()>,
    },
    Refresh {
        ack: oneshot::Sender<()>,
    },
    AddListener {
        listener: SignalListener,
        ack: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<ConnectionStatus>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Cloneable front door to a running [`ConnectionSupervisor`].
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    /// Connect to `selector`. A no-op when already connecting or connected to
    /// the identical selector.
    pub async fn start(&self, selector: InstrumentSelector) -> Result<(), PipelineError> {
        let selector = selector.validated()?;
        self.request(|ack| Command::Start { selector, ack }).await
    }

    /// Tear down the current subscription and drop back to `DISCONNECTED`.
    pub async fn stop(&self) -> Result<(), PipelineError> {
        self.request(|ack| Command::Stop { ack }).await
    }

    /// Switch instruments. The previous subscription is closed and its retry
    /// timer cancelled before the new one starts; once this returns, no
    /// update from the previous selector is observed.
    pub async fn on_selector_change(&self, selector: InstrumentSelector) -> Result<(), PipelineError> {
        self.start(selector).await
    }

    /// Replace alert settings and (re)connect to `selector`.
    pub async fn configure(
        &self,
        selector: InstrumentSelector,
        confidence_threshold: f64,
        alerts_enabled: bool,
        alert_volume: f64,
        notifications_enabled: bool,
    ) -> Result<(), PipelineError> {
        let selector = selector.validated()?;
        let settings = AlertSettings {
            confidence_threshold,
            alerts_enabled,
            alert_volume,
            notifications_enabled,
        }
        .sanitized();
        self.request(|ack| Command::Configure {
            selector,
            settings,
            ack,
        })
        .await
    }

    /// Register a listener for every computed summary, alerting or not.
    pub async fn on_signal_update<F>(&self, callback: F) -> Result<(), PipelineError>
    where
        F: Fn(&SignalSummary) + Send + Sync + 'static,
    {
        let listener: SignalListener = Box::new(callback);
        self.request(|ack| Command::AddListener { listener, ack }).await
    }

    /// Force teardown and reconnect of the current selector. Also resets the
    /// attempt counter, resuming after the retry budget was exhausted.
    pub async fn refresh(&self) -> Result<(), PipelineError> {
        self.request(|ack| Command::Refresh { ack }).await
    }

    pub async fn status(&self) -> Result<ConnectionStatus, PipelineError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Cancel all timers, close the subscription and end the actor.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        self.request(|ack| Command::Shutdown { ack }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, PipelineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| PipelineError::SupervisorGone)?;
        rx.await.map_err(|_| PipelineError::SupervisorGone)
    }
}

// =============================================================================
// Actor
// =============================================================================

struct ActiveFeed {
    handle: SubscriptionHandle,
    events: FeedReceiver,
}

enum Phase {
    Fetched(Result<Vec<Bar>, PipelineError>),
    Subscribed(Result<(SubscriptionHandle, FeedReceiver), PipelineError>),
}

struct AttemptOutcome {
    generation: u64,
    phase: Phase,
}

pub struct ConnectionSupervisor {
    source: Arc<dyn MarketDataSource>,
    engine: Arc<dyn SignalEngine>,
    dispatcher: AlertDispatcher,
    processor: SignalProcessor,
    buffer: SeriesBuffer,
    settings: AlertSettings,
    config: SupervisorConfig,
    app: Arc<AppState>,
    listeners: Vec<SignalListener>,

    selector: Option<InstrumentSelector>,
    state: ConnectionState,
    attempts: u32,
    last_error: Option<PipelineError>,
    next_retry_ms: Option<u64>,

    generation: u64,
    attempt_task: Option<JoinHandle<()>>,
    outcomes_tx: mpsc::UnboundedSender<AttemptOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<AttemptOutcome>,
    feed: Option<ActiveFeed>,
    /// The single pending retry timer, if any.
    retry_at: Option<Instant>,
}

impl ConnectionSupervisor {
    /// Spawn the actor and return its handle. Nothing connects until
    /// `start` or `configure` is called.
    pub fn spawn(
        source: Arc<dyn MarketDataSource>,
        engine: Arc<dyn SignalEngine>,
        dispatcher: AlertDispatcher,
        app: Arc<AppState>,
        config: SupervisorConfig,
        settings: AlertSettings,
    ) -> (SupervisorHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        let actor = Self {
            source,
            engine,
            dispatcher,
            processor: SignalProcessor::new(),
            buffer: SeriesBuffer::new(config.buffer_capacity),
            settings: settings.sanitized(),
            config,
            app,
            listeners: Vec::new(),
            selector: None,
            state: ConnectionState::Disconnected,
            attempts: 0,
            last_error: None,
            next_retry_ms: None,
            generation: 0,
            attempt_task: None,
            outcomes_tx,
            outcomes_rx,
            feed: None,
            retry_at: None,
        };

        let task = tokio::spawn(actor.run(commands_rx));
        (
            SupervisorHandle {
                commands: commands_tx,
            },
            task,
        )
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("connection supervisor started");
        loop {
            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown { ack }) => {
                        self.teardown(ConnectionState::Disconnected);
                        let _ = ack.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.teardown(ConnectionState::Disconnected);
                        break;
                    }
                },

                Some(outcome) = self.outcomes_rx.recv() => self.on_outcome(outcome),

                event = next_feed_event(&mut self.feed) => self.on_feed_event(event),

                _ = wait_for_retry(self.retry_at) => {
                    self.retry_at = None;
                    self.next_retry_ms = None;
                    self.begin_attempt();
                }
            }
        }
        info!("connection supervisor stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { selector, ack } => {
                self.start(selector);
                let _ = ack.send(());
            }
            Command::Configure {
                selector,
                settings,
                ack,
            } => {
                self.app.runtime_config.write().apply_configure(&selector, &settings);
                self.settings = settings;
                self.start(selector);
                let _ = ack.send(());
            }
            Command::Stop { ack } => {
                self.teardown(ConnectionState::Disconnected);
                self.attempts = 0;
                self.publish_status();
                let _ = ack.send(());
            }
            Command::Refresh { ack } => {
                self.refresh();
                let _ = ack.send(());
            }
            Command::AddListener { listener, ack } => {
                self.listeners.push(listener);
                let _ = ack.send(());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            // Handled in `run` because it ends the loop.
            Command::Shutdown { ack } => {
                let _ = ack.send(());
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    fn start(&mut self, selector: InstrumentSelector) {
        let same = self.selector.as_ref() == Some(&selector);
        if same && matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            debug!(selector = %selector, "already connected — start is a no-op");
            return;
        }

        self.teardown(ConnectionState::Disconnected);
        if !same {
            info!(
                from = ?self.selector.as_ref().map(ToString::to_string),
                to = %selector,
                "instrument selector changed"
            );
            self.processor.reset();
            self.buffer = SeriesBuffer::new(self.config.buffer_capacity);
            self.last_error = None;
            self.selector = Some(selector);
            self.app.clear_signal();
        }
        self.attempts = 0;
        self.begin_attempt();
    }

    fn refresh(&mut self) {
        let Some(selector) = self.selector.clone() else {
            debug!("refresh requested with no selector — ignoring");
            return;
        };
        info!(selector = %selector, "manual refresh");
        self.teardown(ConnectionState::Disconnected);
        self.attempts = 0;
        self.begin_attempt();
    }

    /// Close the live feed, abort any in-flight attempt and cancel the retry
    /// timer. Bumping the generation invalidates results still in transit.
    fn teardown(&mut self, next: ConnectionState) {
        self.generation += 1;
        if let Some(task) = self.attempt_task.take() {
            task.abort();
        }
        self.retry_at = None;
        self.next_retry_ms = None;
        if let Some(feed) = self.feed.take() {
            debug!(subscription = %feed.handle.id, "closing live subscription");
            self.source.unsubscribe(&feed.handle);
        }
        self.state = next;
    }

    /// Enter `CONNECTING`: fetch history in a background task.
    fn begin_attempt(&mut self) {
        let Some(selector) = self.selector.clone() else {
            return;
        };
        if let Some(task) = self.attempt_task.take() {
            task.abort();
        }
        self.generation += 1;
        let generation = self.generation;
        self.state = ConnectionState::Connecting;
        self.publish_status();

        info!(selector = %selector, attempt = self.attempts, "connecting");
        let source = self.source.clone();
        let outcomes = self.outcomes_tx.clone();
        let limit = self.config.history_limit;
        self.attempt_task = Some(tokio::spawn(async move {
            let result = source.fetch_series(&selector, limit).await;
            let _ = outcomes.send(AttemptOutcome {
                generation,
                phase: Phase::Fetched(result),
            });
        }));
    }

    /// Second half of an attempt: open the live subscription.
    fn open_subscription(&mut self, selector: InstrumentSelector) {
        let generation = self.generation;
        let source = self.source.clone();
        let outcomes = self.outcomes_tx.clone();
        self.attempt_task = Some(tokio::spawn(async move {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let result = source
                .subscribe(&selector, events_tx)
                .await
                .map(|handle| (handle, events_rx));
            let _ = outcomes.send(AttemptOutcome {
                generation,
                phase: Phase::Subscribed(result),
            });
        }));
    }

    fn on_outcome(&mut self, outcome: AttemptOutcome) {
        if outcome.generation != self.generation {
            if let Phase::Subscribed(Ok((handle, _))) = outcome.phase {
                debug!(subscription = %handle.id, "closing subscription from superseded attempt");
                self.source.unsubscribe(&handle);
            }
            return;
        }
        self.attempt_task = None;
        let Some(selector) = self.selector.clone() else {
            return;
        };

        match outcome.phase {
            Phase::Fetched(Ok(history)) => {
                let kept = self.buffer.seed(history);
                info!(selector = %selector, bars = kept, "history loaded");
                self.recompute();
                self.open_subscription(selector);
            }
            Phase::Fetched(Err(err)) if self.attempts == 0 => {
                // Cold start: surface the warning, do not retry on our own.
                self.record_error(err);
                self.state = ConnectionState::Disconnected;
                self.publish_status();
            }
            Phase::Fetched(Err(err)) => self.on_transport_failure(err),
            Phase::Subscribed(Ok((handle, events))) => {
                info!(selector = %selector, subscription = %handle.id, "live subscription open");
                self.feed = Some(ActiveFeed { handle, events });
                self.attempts = 0;
                self.last_error = None;
                self.state = ConnectionState::Connected;
                self.publish_status();
            }
            Phase::Subscribed(Err(err)) => self.on_transport_failure(err),
        }
    }

    fn on_feed_event(&mut self, event: Option<FeedEvent>) {
        match event {
            Some(FeedEvent::Bar(bar)) => {
                if self.buffer.integrate(bar).changed() {
                    self.recompute();
                } else {
                    debug!("stale bar ignored");
                }
            }
            Some(FeedEvent::Closed(reason)) => {
                self.on_transport_failure(PipelineError::TransportError(reason));
            }
            None => {
                self.on_transport_failure(PipelineError::TransportError(
                    "live stream ended".to_string(),
                ));
            }
        }
    }

    /// Drive the backoff state machine after a transport-level failure.
    fn on_transport_failure(&mut self, err: PipelineError) {
        if let Some(feed) = self.feed.take() {
            self.source.unsubscribe(&feed.handle);
        }
        self.attempts += 1;
        warn!(error = %err, attempts = self.attempts, "connection failure");
        self.record_error(err);

        if self.config.backoff.exhausted(self.attempts) {
            let terminal = PipelineError::RetryBudgetExhausted {
                attempts: self.config.backoff.max_attempts,
            };
            error!(error = %terminal, "giving up on automatic reconnection");
            self.retry_at = None;
            self.next_retry_ms = None;
            self.state = ConnectionState::Disconnected;
            self.record_error(terminal);
            self.publish_status();
            return;
        }

        let delay = self.config.backoff.delay(self.attempts);
        let delay_ms = delay.as_millis() as u64;
        // Replaces any earlier deadline: at most one retry is ever pending.
        self.retry_at = Some(Instant::now() + delay);
        self.next_retry_ms = Some(delay_ms);
        self.state = ConnectionState::Reconnecting;
        info!(delay_ms, attempts = self.attempts, "reconnect scheduled");
        self.publish_status();
    }

    // ── Signal path ─────────────────────────────────────────────────────

    /// Recompute the summary from the buffer and push it downstream.
    fn recompute(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let summary = self.engine.compute(self.buffer.series());
        for listener in &self.listeners {
            listener(&summary);
        }

        let audio_ready = self.dispatcher.audio_ready();
        let decision = self.processor.process(&summary, &self.settings, audio_ready);
        if let AlertDecision::Fire { signal, confidence } = decision {
            let label = self.label();
            let channels =
                self.dispatcher
                    .dispatch(signal, confidence, &label, &self.settings, Instant::now());
            self.app.push_alert(AlertRecord {
                id: Uuid::new_v4(),
                signal,
                confidence,
                instrument: label,
                channels,
                at: chrono::Utc::now().to_rfc3339(),
            });
        }

        self.app.set_signal(summary, self.processor.state().clone());
    }

    // ── Reporting ───────────────────────────────────────────────────────

    fn record_error(&mut self, err: PipelineError) {
        let label = self.label();
        self.app.push_error(&err);
        self.dispatcher.advise(&err, &label, Instant::now());
        self.last_error = Some(err);
    }

    fn label(&self) -> String {
        self.selector
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string())
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            selector: self.selector.clone(),
            state: self.state,
            attempts: self.attempts,
            next_retry_ms: self.next_retry_ms,
            last_error: self.last_error.as_ref().map(ErrorView::from),
            bars_buffered: self.buffer.len(),
        }
    }

    fn publish_status(&self) {
        self.app.set_connection(self.status());
    }
}

async fn next_feed_event(feed: &mut Option<ActiveFeed>) -> Option<FeedEvent> {
    match feed {
        Some(active) => active.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_for_retry(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Tests
// =============================================================================

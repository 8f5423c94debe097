// =============================================================================
// Market data source contract
// =============================================================================
//
// The supervisor only ever talks to the exchange through this trait: one
// historical fetch per connection attempt, then a live subscription that
// pushes `FeedEvent`s into a channel owned by the supervisor.
// =============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::market_data::Bar;
use crate::types::InstrumentSelector;

/// Event delivered by a live subscription.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Incremental bar update.
    Bar(Bar),
    /// The transport dropped or the stream ended. No further events follow.
    Closed(String),
}

pub type FeedSender = mpsc::UnboundedSender<FeedEvent>;
pub type FeedReceiver = mpsc::UnboundedReceiver<FeedEvent>;

/// Opaque identity of an open subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: Uuid,
    pub selector: InstrumentSelector,
}

impl SubscriptionHandle {
    pub fn new(selector: InstrumentSelector) -> Self {
        Self {
            id: Uuid::new_v4(),
            selector,
        }
    }
}

#[async_trait]
pub trait MarketDataSource: Send + Sync + 'static {
    /// Fetch the most recent `limit` bars, oldest first.
    async fn fetch_series(
        &self,
        selector: &InstrumentSelector,
        limit: usize,
    ) -> Result<Vec<Bar>, PipelineError>;

    /// Open a live subscription. Updates are pushed into `events` until the
    /// subscription is closed or fails, in which case a final
    /// [`FeedEvent::Closed`] is sent.
    async fn subscribe(
        &self,
        selector: &InstrumentSelector,
        events: FeedSender,
    ) -> Result<SubscriptionHandle, PipelineError>;

    /// Close a subscription. Must be idempotent.
    fn unsubscribe(&self, handle: &SubscriptionHandle);
}

pub mod series_buffer;
pub mod source;

pub use series_buffer::{Bar, SeriesBuffer};
pub use source::{FeedEvent, FeedReceiver, FeedSender, MarketDataSource, SubscriptionHandle};

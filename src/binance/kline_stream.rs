// =============================================================================
// Binance kline source — REST history + WebSocket live updates
// =============================================================================
//
// `BinanceSource` is the production `MarketDataSource`. Each subscription is
// a reader task that pumps parsed klines into the supervisor's channel and
// finishes with a `FeedEvent::Closed` when the socket drops. Unsubscribing
// aborts the reader, which also closes the socket.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::binance::client::{parse_str_f64, BinanceClient};
use crate::error::PipelineError;
use crate::market_data::{Bar, FeedEvent, FeedSender, MarketDataSource, SubscriptionHandle};
use crate::types::InstrumentSelector;

const DEFAULT_WS_BASE: &str = "wss://stream.binance.com:9443/ws";

/// One decoded kline event.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineUpdate {
    pub symbol: String,
    pub interval: String,
    pub bar: Bar,
}

pub struct BinanceSource {
    client: BinanceClient,
    ws_base: String,
    readers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl BinanceSource {
    pub fn new(client: BinanceClient) -> Self {
        Self {
            client,
            ws_base: DEFAULT_WS_BASE.to_string(),
            readers: Mutex::new(HashMap::new()),
        }
    }

    /// Stream URL for a selector, e.g. `.../ws/btcusdt@kline_5m`.
    pub fn stream_url(&self, selector: &InstrumentSelector) -> String {
        format!(
            "{}/{}@kline_{}",
            self.ws_base,
            selector.symbol.to_lowercase(),
            selector.interval.as_str()
        )
    }
}

#[async_trait]
impl MarketDataSource for BinanceSource {
    async fn fetch_series(
        &self,
        selector: &InstrumentSelector,
        limit: usize,
    ) -> Result<Vec<Bar>, PipelineError> {
        self.client
            .get_klines(&selector.symbol, selector.interval.as_str(), limit)
            .await
            .map_err(|e| PipelineError::DataUnavailable(format!("{e:#}")))
    }

    async fn subscribe(
        &self,
        selector: &InstrumentSelector,
        events: FeedSender,
    ) -> Result<SubscriptionHandle, PipelineError> {
        let url = self.stream_url(selector);
        info!(url = %url, selector = %selector, "connecting to kline WebSocket");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .map_err(|e| PipelineError::TransportError(format!("failed to connect to {url}: {e}")))?;

        let handle = SubscriptionHandle::new(selector.clone());
        let reader = tokio::spawn(read_klines(ws_stream.split().1, selector.clone(), events));

        let mut readers = self.readers.lock();
        readers.retain(|_, task| !task.is_finished());
        readers.insert(handle.id, reader);

        info!(selector = %selector, subscription = %handle.id, "kline WebSocket connected");
        Ok(handle)
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Some(reader) = self.readers.lock().remove(&handle.id) {
            debug!(subscription = %handle.id, "aborting kline reader");
            reader.abort();
        }
    }
}

impl Drop for BinanceSource {
    fn drop(&mut self) {
        for (_, reader) in self.readers.lock().drain() {
            reader.abort();
        }
    }
}

/// Pump text frames into `events` until the socket ends or the receiver is
/// dropped.
async fn read_klines<S>(mut read: S, selector: InstrumentSelector, events: FeedSender)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let reason = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match parse_kline_message(&text) {
                Ok(update) => {
                    if update.symbol != selector.symbol || update.interval != selector.interval.as_str() {
                        debug!(symbol = %update.symbol, interval = %update.interval, "kline for another selector ignored");
                        continue;
                    }
                    if events.send(FeedEvent::Bar(update.bar)).is_err() {
                        debug!(selector = %selector, "subscriber gone — stopping kline reader");
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse kline message");
                }
            },
            Some(Ok(Message::Close(frame))) => {
                break format!("server closed kline stream: {frame:?}");
            }
            // Ping / Pong / Binary: tungstenite answers pings itself.
            Some(Ok(_)) => {}
            Some(Err(e)) => break format!("kline WebSocket read error: {e}"),
            None => break "kline WebSocket stream ended".to_string(),
        }
    };

    warn!(selector = %selector, reason = %reason, "kline stream closed");
    let _ = events.send(FeedEvent::Closed(reason));
}

/// Parse a kline message, accepting both the single-stream payload and the
/// combined-stream `{ "stream": ..., "data": ... }` envelope.
///
/// ```json
/// { "e": "kline", "s": "BTCUSDT", "k": { "t": 0, "T": 299999, "i": "5m", ... } }
/// ```
pub fn parse_kline_message(text: &str) -> Result<KlineUpdate> {
    let root: serde_json::Value = serde_json::from_str(text).context("failed to parse kline JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let symbol = data["s"].as_str().context("missing field s")?.to_uppercase();
    let k = &data["k"];
    let interval = k["i"].as_str().context("missing field k.i")?.to_string();

    let bar = Bar {
        open_time: k["t"].as_i64().context("missing field k.t")?,
        close_time: k["T"].as_i64().context("missing field k.T")?,
        open: parse_str_f64(&k["o"]).context("bad field k.o")?,
        high: parse_str_f64(&k["h"]).context("bad field k.h")?,
        low: parse_str_f64(&k["l"]).context("bad field k.l")?,
        close: parse_str_f64(&k["c"]).context("bad field k.c")?,
        volume: parse_str_f64(&k["v"]).context("bad field k.v")?,
        is_closed: k["x"].as_bool().context("missing field k.x")?,
    };

    Ok(KlineUpdate {
        symbol,
        interval,
        bar,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Interval;

    const SINGLE: &str = r#"{
        "e": "kline", "E": 1700000123456, "s": "BTCUSDT",
        "k": {
            "t": 1700000100000, "T": 1700000399999, "s": "BTCUSDT", "i": "5m",
            "o": "37000.10", "c": "37020.55", "h": "37031.00", "l": "36990.00",
            "v": "12.345", "n": 420, "x": false, "q": "0", "V": "0", "Q": "0"
        }
    }"#;

    #[test]
    fn parses_single_stream_payload() {
        let update = parse_kline_message(SINGLE).unwrap();
        assert_eq!(update.symbol, "BTCUSDT");
        assert_eq!(update.interval, "5m");
        assert_eq!(update.bar.open_time, 1_700_000_100_000);
        assert_eq!(update.bar.close, 37_020.55);
        assert!(!update.bar.is_closed);
    }

    #[test]
    fn parses_combined_stream_envelope() {
        let combined = format!(r#"{{ "stream": "btcusdt@kline_5m", "data": {SINGLE} }}"#);
        let update = parse_kline_message(&combined).unwrap();
        assert_eq!(update.symbol, "BTCUSDT");
        assert_eq!(update.bar.high, 37_031.0);
    }

    #[test]
    fn rejects_payload_without_kline() {
        assert!(parse_kline_message(r#"{ "result": null, "id": 1 }"#).is_err());
        assert!(parse_kline_message("not json").is_err());
    }

    #[test]
    fn stream_url_uses_lowercase_symbol() {
        let source = BinanceSource::new(BinanceClient::new().unwrap());
        let selector = InstrumentSelector::new("ETHUSDT", Interval::OneHour).unwrap();
        assert_eq!(
            source.stream_url(&selector),
            "wss://stream.binance.com:9443/ws/ethusdt@kline_1h"
        );
    }

    #[tokio::test]
    async fn reader_forwards_matching_bars_then_reports_close() {
        let selector = InstrumentSelector::new("BTCUSDT", Interval::FiveMinutes).unwrap();
        let other = SINGLE.replace("\"i\": \"5m\"", "\"i\": \"1m\"");
        let frames = vec![
            Ok(Message::Text(SINGLE.to_string())),
            Ok(Message::Text(other)),
            Ok(Message::Text("garbage".to_string())),
            Ok(Message::Ping(vec![1])),
        ];
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        read_klines(futures_util::stream::iter(frames), selector, tx).await;

        match rx.recv().await {
            Some(FeedEvent::Bar(bar)) => assert_eq!(bar.open_time, 1_700_000_100_000),
            other => panic!("expected bar, got {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(FeedEvent::Closed(_))));
        assert!(rx.recv().await.is_none());
    }
}

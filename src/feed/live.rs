// =============================================================================
// Live Feed — websocket tick adapter
// =============================================================================

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, WebSocketStream, MaybeTlsStream};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::errors::CoreError;
use crate::feed::FeedConnector;
use crate::types::Tick;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket tick source talking to a combined-stream market data endpoint.
/// Credentials, when present, are never logged or serialized.
pub struct LiveFeed {
    endpoint: String,
    api_key: Option<String>,
    symbols: HashSet<String>,
    stream: Option<WsStream>,
}

impl LiveFeed {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            symbols: HashSet::new(),
            stream: None,
        }
    }

    fn stream_url(&self) -> String {
        if self.symbols.is_empty() {
            return self.endpoint.clone();
        }
        let streams: Vec<String> = self
            .symbols
            .iter()
            .map(|s| format!("{}@trade", s.to_lowercase()))
            .collect();
        format!("{}/stream?streams={}", self.endpoint, streams.join("/"))
    }
}

impl std::fmt::Debug for LiveFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveFeed")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("symbols", &self.symbols)
            .finish()
    }
}

/// Parse either a combined-stream envelope (`{"stream": ..., "data": {...}}`)
/// or a direct single-stream payload (`{"s": ..., "p": ..., "q": ...}`).
fn parse_tick_message(text: &str) -> Result<Tick, CoreError> {
    let root: serde_json::Value =
        serde_json::from_str(text).map_err(|e| CoreError::data_quality(format!("malformed tick message: {e}")))?;

    let data = if root.get("data").is_some() { &root["data"] } else { &root };

    let symbol = data["s"]
        .as_str()
        .ok_or_else(|| CoreError::data_quality("tick message missing field s"))?
        .to_uppercase();

    let price = parse_string_f64(&data["p"], "p")?;
    let volume = parse_string_f64(&data["q"], "q")?;

    Ok(Tick {
        symbol,
        price,
        volume,
        timestamp: Utc::now(),
    })
}

/// Upstream feeds send numeric fields as JSON strings; accept plain numbers
/// too for replay fixtures authored by hand.
fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64, CoreError> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| CoreError::data_quality(format!("non-numeric field {name}: {s}"))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| CoreError::data_quality(format!("field {name} is not a valid f64"))),
        _ => Err(CoreError::data_quality(format!("field {name} missing or wrong type"))),
    }
}

#[async_trait]
impl FeedConnector for LiveFeed {
    async fn connect(&mut self) -> Result<(), CoreError> {
        let url = self.stream_url();
        info!(url = %url, "connecting to live tick feed");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .map_err(|e| CoreError::transient(format!("websocket connect failed: {e}")))?;

        self.stream = Some(ws_stream);
        info!("live tick feed connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.stream = None;
        info!("live tick feed disconnected");
    }

    fn subscribe(&mut self, symbol: &str) {
        self.symbols.insert(symbol.to_uppercase());
    }

    fn unsubscribe(&mut self, symbol: &str) {
        self.symbols.remove(&symbol.to_uppercase());
    }

    async fn run(&mut self, sink: mpsc::Sender<Tick>) -> Result<(), CoreError> {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| CoreError::transient("run called before connect"))?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match parse_tick_message(&text) {
                    Ok(tick) => {
                        debug!(symbol = %tick.symbol, price = tick.price, "tick received");
                        if sink.send(tick).await.is_err() {
                            warn!("tick sink closed, stopping feed run loop");
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "dropping malformed tick message");
                    }
                },
                Some(Ok(_)) => {
                    // Ping/Pong/Binary/Close frames — tungstenite replies to
                    // pings automatically, nothing else to do here.
                }
                Some(Err(e)) => {
                    error!(error = %e, "live feed read error");
                    return Err(CoreError::transient(format!("websocket read error: {e}")));
                }
                None => {
                    warn!("live feed stream ended");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_api_key() {
        let feed = LiveFeed::new("wss://example.test", Some("super-secret".to_string()));
        let dbg = format!("{feed:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn parse_tick_message_reads_combined_stream_envelope() {
        let json = r#"{"stream":"btcusdt@trade","data":{"s":"BTCUSDT","p":"37000.50","q":"0.125"}}"#;
        let tick = parse_tick_message(json).expect("should parse");
        assert_eq!(tick.symbol, "BTCUSDT");
        assert!((tick.price - 37000.50).abs() < f64::EPSILON);
        assert!((tick.volume - 0.125).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_tick_message_rejects_non_numeric_price() {
        let json = r#"{"s":"BTCUSDT","p":"not-a-number","q":"0.1"}"#;
        let result = parse_tick_message(json);
        assert!(result.is_err());
    }

    #[test]
    fn stream_url_builds_combined_streams_for_multiple_symbols() {
        let mut feed = LiveFeed::new("wss://example.test", None);
        feed.subscribe("btcusdt");
        feed.subscribe("ethusdt");
        let url = feed.stream_url();
        assert!(url.contains("btcusdt@trade"));
        assert!(url.contains("ethusdt@trade"));
    }
}

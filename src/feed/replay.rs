// =============================================================================
// Replay Feed — deterministic tick playback from a recorded file
// =============================================================================
//
// Mirrors `SimulatedMarketDataFeed`: `connect`/`disconnect` just flip a flag,
// subscription is bookkeeping only (no upstream to subscribe through), and
// `run` plays back whatever ticks were loaded rather than opening a socket.
// Used for backtests and for exercising the rest of the pipeline without a
// live exchange connection.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::clock::ReplayClock;
use crate::errors::CoreError;
use crate::feed::FeedConnector;
use crate::types::Tick;

pub struct ReplayFeed {
    ticks: Vec<Tick>,
    subscribed: HashSet<String>,
    connected: bool,
    clock: Arc<ReplayClock>,
}

impl ReplayFeed {
    pub fn new(ticks: Vec<Tick>) -> Self {
        let start = ticks.first().map(|t| t.timestamp).unwrap_or_else(Utc::now);
        Self {
            ticks,
            subscribed: HashSet::new(),
            connected: false,
            clock: Arc::new(ReplayClock::new(start)),
        }
    }

    /// Parse a replay file of newline-delimited JSON `Tick` records.
    pub fn from_jsonl(content: &str) -> Result<Self, CoreError> {
        let mut ticks = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let tick: Tick = serde_json::from_str(line)
                .map_err(|e| CoreError::data_quality(format!("replay line {}: {e}", lineno + 1)))?;
            ticks.push(tick);
        }
        Ok(Self::new(ticks))
    }

    /// The clock this feed advances to each tick's own timestamp as it
    /// replays. Share this with `CoreContext::with_clock` so the rest of the
    /// pipeline judges freshness against replayed time rather than wall time.
    pub fn clock(&self) -> Arc<ReplayClock> {
        self.clock.clone()
    }
}

#[async_trait]
impl FeedConnector for ReplayFeed {
    async fn connect(&mut self) -> Result<(), CoreError> {
        self.connected = true;
        info!(tick_count = self.ticks.len(), "replay feed connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        info!("replay feed disconnected");
    }

    fn subscribe(&mut self, symbol: &str) {
        self.subscribed.insert(symbol.to_uppercase());
    }

    fn unsubscribe(&mut self, symbol: &str) {
        self.subscribed.remove(&symbol.to_uppercase());
    }

    async fn run(&mut self, sink: mpsc::Sender<Tick>) -> Result<(), CoreError> {
        if !self.connected {
            return Err(CoreError::transient("run called before connect"));
        }

        for tick in self.ticks.drain(..) {
            self.clock.set(tick.timestamp);
            if !self.subscribed.is_empty() && !self.subscribed.contains(&tick.symbol) {
                continue;
            }
            if sink.send(tick).await.is_err() {
                warn!("tick sink closed, stopping replay early");
                return Ok(());
            }
        }

        info!("replay feed exhausted all recorded ticks");
        Ok(())
    }
}

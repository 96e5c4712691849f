// =============================================================================
// Distribution Bus — subscription registry + pub/sub fan-out
// =============================================================================
//
// The registry is a direct port of `SubscriptionManager`'s dual-index
// bookkeeping (symbol -> subscribers, subscriber:symbol -> Subscription).
// Fan-out itself uses one `tokio::broadcast` channel per channel name,
// created lazily on first subscribe and torn down when its last subscriber
// leaves — the channel-naming convention (`tick:<symbol>`,
// `candle_update:<symbol>:<timeframe>`, `candle_complete:<symbol>:<timeframe>`)
// generalizes `MarketDataDistributor`'s Redis channel names.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::types::{Candle, Signal, Subscription, Tick, Timeframe};

const BROADCAST_CAPACITY: usize = 1024;

/// The single named channel every validated `Signal` is published to for
/// hand-off to an external order processor, with at-least-once semantics
/// (a `broadcast` channel, same as every other channel here).
pub const SIGNALS_CHANNEL: &str = "signals";

/// Message published on a channel. Every channel carries exactly one
/// variant, selected by its name prefix.
#[derive(Debug, Clone)]
pub enum Event {
    Tick(Tick),
    CandleUpdate(Candle),
    CandleComplete(Candle),
    Signal(Signal),
}

pub fn tick_channel(symbol: &str) -> String {
    format!("tick:{symbol}")
}

pub fn candle_update_channel(symbol: &str, timeframe: Timeframe) -> String {
    format!("candle_update:{symbol}:{timeframe}")
}

pub fn candle_complete_channel(symbol: &str, timeframe: Timeframe) -> String {
    format!("candle_complete:{symbol}:{timeframe}")
}

/// Dual-index subscription bookkeeping, ported from `SubscriptionManager`.
#[derive(Default)]
struct Registry {
    symbol_subscribers: HashMap<String, HashSet<String>>,
    subscriptions: HashMap<(String, String), Subscription>,
    symbol_exchanges: HashMap<String, String>,
}

impl Registry {
    /// Returns `true` if this call brought `symbol` from zero subscribers to
    /// one — the caller should tell the Feed Connector to subscribe upstream.
    fn subscribe(&mut self, subscriber_id: &str, symbol: &str, timeframes: &[Timeframe], exchange: &str) -> bool {
        let was_empty = !self.symbol_subscribers.contains_key(symbol);

        let key = (subscriber_id.to_string(), symbol.to_string());
        let subscription = self
            .subscriptions
            .entry(key)
            .or_insert_with(|| Subscription::new(subscriber_id, symbol, exchange));

        for &tf in timeframes {
            subscription.timeframes.insert(tf);
        }

        self.symbol_subscribers
            .entry(symbol.to_string())
            .or_default()
            .insert(subscriber_id.to_string());

        self.symbol_exchanges.insert(symbol.to_string(), exchange.to_string());

        was_empty
    }

    /// Returns the set of symbols whose subscriber count dropped to zero as
    /// a result of this call — the caller should tell the Feed Connector to
    /// drop these symbols upstream.
    fn unsubscribe(&mut self, subscriber_id: &str, symbol: Option<&str>, timeframes: Option<&[Timeframe]>) -> Vec<String> {
        let mut emptied = Vec::new();
        match symbol {
            None => {
                let keys: Vec<(String, String)> = self
                    .subscriptions
                    .keys()
                    .filter(|(sid, _)| sid == subscriber_id)
                    .cloned()
                    .collect();
                for key in keys {
                    if let Some(symbol) = self.remove_subscription(&key) {
                        emptied.push(symbol);
                    }
                }
            }
            Some(symbol) => {
                let key = (subscriber_id.to_string(), symbol.to_string());
                if let Some(subscription) = self.subscriptions.get_mut(&key) {
                    match timeframes {
                        None => {
                            if let Some(symbol) = self.remove_subscription(&key) {
                                emptied.push(symbol);
                            }
                        }
                        Some(tfs) => {
                            for tf in tfs {
                                subscription.timeframes.remove(tf);
                            }
                            if subscription.timeframes.is_empty() {
                                if let Some(symbol) = self.remove_subscription(&key) {
                                    emptied.push(symbol);
                                }
                            }
                        }
                    }
                }
            }
        }
        emptied
    }

    /// Removes the subscription at `key`. Returns the symbol if its
    /// subscriber set just became empty.
    fn remove_subscription(&mut self, key: &(String, String)) -> Option<String> {
        let subscription = self.subscriptions.remove(key)?;

        if let Some(subs) = self.symbol_subscribers.get_mut(&subscription.symbol) {
            subs.remove(&subscription.subscriber_id);
            if subs.is_empty() {
                self.symbol_subscribers.remove(&subscription.symbol);
                self.symbol_exchanges.remove(&subscription.symbol);
                return Some(subscription.symbol);
            }
        }
        None
    }

    fn subscribers_for_symbol(&self, symbol: &str) -> HashSet<String> {
        self.symbol_subscribers.get(symbol).cloned().unwrap_or_default()
    }

    fn subscribed_symbols(&self) -> Vec<String> {
        self.symbol_subscribers.keys().cloned().collect()
    }

    fn is_subscribed(&self, subscriber_id: &str, symbol: &str, timeframe: Option<Timeframe>) -> bool {
        let key = (subscriber_id.to_string(), symbol.to_string());
        match self.subscriptions.get(&key) {
            None => false,
            Some(sub) => match timeframe {
                None => true,
                Some(tf) => sub.timeframes.contains(&tf),
            },
        }
    }
}

/// Point-in-time subscription stats, mirroring `SubscriptionManager.get_stats`.
#[derive(Debug, Clone)]
pub struct DistributionStats {
    pub total_subscriptions: usize,
    pub unique_symbols: usize,
    pub unique_subscribers: usize,
}

/// Subscription registry plus lazily-created broadcast channels, one per
/// `(event kind, symbol[, timeframe])` combination.
pub struct DistributionBus {
    registry: RwLock<Registry>,
    channels: RwLock<HashMap<String, broadcast::Sender<Event>>>,
}

impl DistributionBus {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe `subscriber_id` to `symbol`. Returns `true` if this was the
    /// symbol's first subscriber — callers drive the Feed Connector's
    /// `subscribe` upstream call off this signal rather than the bus holding
    /// a handle to the feed itself.
    pub fn subscribe(&self, subscriber_id: &str, symbol: &str, timeframes: &[Timeframe], exchange: &str) -> bool {
        let newly_active = self.registry.write().subscribe(subscriber_id, symbol, timeframes, exchange);
        info!(subscriber_id, symbol, exchange, "subscribed");
        newly_active
    }

    /// Unsubscribe `subscriber_id`. Returns the symbols whose subscriber set
    /// just emptied — callers drive the Feed Connector's `unsubscribe`
    /// upstream call off this signal.
    pub fn unsubscribe(&self, subscriber_id: &str, symbol: Option<&str>, timeframes: Option<&[Timeframe]>) -> Vec<String> {
        let emptied = self.registry.write().unsubscribe(subscriber_id, symbol, timeframes);
        info!(subscriber_id, symbol = symbol.unwrap_or("*"), "unsubscribed");
        emptied
    }

    pub fn subscribers_for_symbol(&self, symbol: &str) -> HashSet<String> {
        self.registry.read().subscribers_for_symbol(symbol)
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.registry.read().subscribed_symbols()
    }

    pub fn is_subscribed(&self, subscriber_id: &str, symbol: &str, timeframe: Option<Timeframe>) -> bool {
        self.registry.read().is_subscribed(subscriber_id, symbol, timeframe)
    }

    pub fn stats(&self) -> DistributionStats {
        let registry = self.registry.read();
        let unique_subscribers: HashSet<&String> =
            registry.subscriptions.keys().map(|(sid, _)| sid).collect();
        DistributionStats {
            total_subscriptions: registry.subscriptions.len(),
            unique_symbols: registry.symbol_subscribers.len(),
            unique_subscribers: unique_subscribers.len(),
        }
    }

    /// Subscribe to the named channel, creating it if this is the first
    /// subscriber. Returns a receiver the caller polls independently.
    pub fn channel(&self, name: &str) -> broadcast::Receiver<Event> {
        let mut channels = self.channels.write();
        channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
            .subscribe()
    }

    fn publish(&self, name: &str, event: Event) {
        let channels = self.channels.read();
        if let Some(sender) = channels.get(name) {
            // No receivers is a normal, silent no-op — not every channel has
            // a live listener at all times.
            let _ = sender.send(event);
        }
        debug!(channel = name, "published");
    }

    pub fn publish_tick(&self, tick: &Tick) {
        self.publish(&tick_channel(&tick.symbol), Event::Tick(tick.clone()));
    }

    pub fn publish_candle_update(&self, candle: &Candle) {
        self.publish(
            &candle_update_channel(&candle.symbol, candle.timeframe),
            Event::CandleUpdate(candle.clone()),
        );
    }

    pub fn publish_candle_complete(&self, candle: &Candle) {
        self.publish(
            &candle_complete_channel(&candle.symbol, candle.timeframe),
            Event::CandleComplete(candle.clone()),
        );
    }

    /// Publish a validated `Signal` to the `signals` channel for hand-off to
    /// an external order processor.
    pub fn publish_signal(&self, signal: &Signal) {
        self.publish(SIGNALS_CHANNEL, Event::Signal(signal.clone()));
    }
}

impl Default for DistributionBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_adds_to_both_indices() {
        let bus = DistributionBus::new();
        bus.subscribe("strat-1", "BTCUSDT", &[Timeframe::M1], "NSE");

        assert!(bus.is_subscribed("strat-1", "BTCUSDT", None));
        assert!(bus.is_subscribed("strat-1", "BTCUSDT", Some(Timeframe::M1)));
        assert!(!bus.is_subscribed("strat-1", "BTCUSDT", Some(Timeframe::M5)));
        assert_eq!(bus.subscribers_for_symbol("BTCUSDT"), HashSet::from(["strat-1".to_string()]));
    }

    #[test]
    fn subscribe_is_idempotent_on_repeated_calls() {
        let bus = DistributionBus::new();
        bus.subscribe("strat-1", "BTCUSDT", &[Timeframe::M1], "NSE");
        bus.subscribe("strat-1", "BTCUSDT", &[Timeframe::M1], "NSE");
        assert_eq!(bus.stats().total_subscriptions, 1);
    }

    #[test]
    fn unsubscribe_specific_symbol_removes_only_that_symbol() {
        let bus = DistributionBus::new();
        bus.subscribe("strat-1", "BTCUSDT", &[Timeframe::M1], "NSE");
        bus.subscribe("strat-1", "ETHUSDT", &[Timeframe::M1], "NSE");

        bus.unsubscribe("strat-1", Some("BTCUSDT"), None);

        assert!(!bus.is_subscribed("strat-1", "BTCUSDT", None));
        assert!(bus.is_subscribed("strat-1", "ETHUSDT", None));
    }

    #[test]
    fn unsubscribe_all_removes_every_subscription_for_subscriber() {
        let bus = DistributionBus::new();
        bus.subscribe("strat-1", "BTCUSDT", &[Timeframe::M1], "NSE");
        bus.subscribe("strat-1", "ETHUSDT", &[Timeframe::M1], "NSE");

        bus.unsubscribe("strat-1", None, None);

        assert!(bus.subscribed_symbols().is_empty());
    }

    #[test]
    fn unsubscribe_one_timeframe_keeps_subscription_alive_if_others_remain() {
        let bus = DistributionBus::new();
        bus.subscribe("strat-1", "BTCUSDT", &[Timeframe::M1, Timeframe::M5], "NSE");

        bus.unsubscribe("strat-1", Some("BTCUSDT"), Some(&[Timeframe::M1]));

        assert!(bus.is_subscribed("strat-1", "BTCUSDT", None));
        assert!(bus.is_subscribed("strat-1", "BTCUSDT", Some(Timeframe::M5)));
        assert!(!bus.is_subscribed("strat-1", "BTCUSDT", Some(Timeframe::M1)));
    }

    #[test]
    fn unsubscribe_last_timeframe_removes_whole_subscription() {
        let bus = DistributionBus::new();
        bus.subscribe("strat-1", "BTCUSDT", &[Timeframe::M1], "NSE");

        bus.unsubscribe("strat-1", Some("BTCUSDT"), Some(&[Timeframe::M1]));

        assert!(!bus.is_subscribed("strat-1", "BTCUSDT", None));
        assert!(bus.subscribed_symbols().is_empty());
    }

    #[tokio::test]
    async fn publish_tick_reaches_channel_subscriber() {
        let bus = DistributionBus::new();
        let mut rx = bus.channel(&tick_channel("BTCUSDT"));

        bus.publish_tick(&Tick {
            symbol: "BTCUSDT".to_string(),
            price: 100.0,
            volume: 1.0,
            timestamp: chrono::Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::Tick(t) if t.symbol == "BTCUSDT"));
    }

    #[tokio::test]
    async fn publish_signal_reaches_signals_channel_subscriber() {
        let bus = DistributionBus::new();
        let mut rx = bus.channel(SIGNALS_CHANNEL);

        bus.publish_signal(&Signal {
            signal_type: crate::types::SignalType::Entry,
            direction: crate::types::Direction::Long,
            symbol: "BTCUSDT".to_string(),
            quantity: 1.0,
            order_type: crate::types::OrderType::Market,
            price: None,
            stop_loss: None,
            take_profit: None,
            trailing_stop_pct: None,
            reason: "test".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::Signal(s) if s.symbol == "BTCUSDT"));
    }

    #[test]
    fn publish_with_no_subscribers_is_a_silent_no_op() {
        let bus = DistributionBus::new();
        bus.publish_tick(&Tick {
            symbol: "BTCUSDT".to_string(),
            price: 100.0,
            volume: 1.0,
            timestamp: chrono::Utc::now(),
        });
    }

    #[test]
    fn first_subscriber_reports_newly_active_symbol() {
        let bus = DistributionBus::new();
        assert!(bus.subscribe("strat-1", "BTCUSDT", &[Timeframe::M1], "NSE"));
        assert!(!bus.subscribe("strat-2", "BTCUSDT", &[Timeframe::M1], "NSE"));
    }

    #[test]
    fn unsubscribe_reports_emptied_symbol_only_when_last_subscriber_leaves() {
        let bus = DistributionBus::new();
        bus.subscribe("strat-1", "BTCUSDT", &[Timeframe::M1], "NSE");
        bus.subscribe("strat-2", "BTCUSDT", &[Timeframe::M1], "NSE");

        let emptied = bus.unsubscribe("strat-1", Some("BTCUSDT"), None);
        assert!(emptied.is_empty());

        let emptied = bus.unsubscribe("strat-2", Some("BTCUSDT"), None);
        assert_eq!(emptied, vec!["BTCUSDT".to_string()]);
    }
}

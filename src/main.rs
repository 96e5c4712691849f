// =============================================================================
// market-core — Main Entry Point
// =============================================================================
//
// Wires together the Feed Connector, Candle Aggregator, Distribution Bus,
// Multi-Timeframe Assembler, Strategy Scheduler and Risk Gate into one event
// loop: every tick received from the feed is folded into every timeframe's
// candle state, published on the distribution bus, and routed to whichever
// strategies are subscribed to that symbol.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod assembler;
mod candle;
mod clock;
mod config;
mod context;
mod distribution;
mod errors;
mod feed;
mod indicators;
mod plugins;
mod risk;
mod strategy;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::assembler::IndicatorRequest;
use crate::clock::{Clock, SystemClock};
use crate::config::CoreConfig;
use crate::context::CoreContext;
use crate::feed::reconnect::run_with_reconnect;
use crate::feed::{FeedConnector, LiveFeed, ReplayFeed};
use crate::strategy::manifest::{discover_plugins, PluginManifest};
use crate::strategy::registry::PluginRegistry;
use crate::types::Timeframe;

const CONFIG_PATH: &str = "config.json";

/// Build the in-binary plugin registry: every concrete `StrategyPlugin` this
/// build ships is registered here by name, then cross-checked against the
/// manifests discovered under `config.scheduler.plugin_dir` so a plugin with
/// no manifest (or a manifest with no registered constructor) is logged
/// rather than silently dropped.
fn build_registry(config: &CoreConfig) -> PluginRegistry {
    let discovered = discover_plugins(std::path::Path::new(&config.scheduler.plugin_dir));
    let mut by_name: BTreeMap<String, PluginManifest> =
        discovered.into_iter().map(|m| (m.name.clone(), m)).collect();

    let mut registry = PluginRegistry::new();

    if let Some(manifest) = by_name.remove("macd_cross") {
        registry.register(manifest, || Box::new(plugins::macd_cross::MacdCrossPlugin::new()));
    } else {
        warn!("no manifest found for built-in plugin 'macd_cross', registering without one is not supported");
    }

    for (name, _) in by_name {
        warn!(plugin = %name, "manifest discovered with no matching in-binary constructor, ignoring");
    }

    registry
}

/// Construct the configured Feed Connector together with the `Clock` the
/// rest of the pipeline should read "now" from: `"replay"` plays back a
/// recorded tick file through a `ReplayClock` the feed drives to each tick's
/// own timestamp, anything else (default `"live"`) talks to the real
/// exchange endpoint named by `MARKET_FEED_ENDPOINT` under a `SystemClock`.
fn build_feed(config: &CoreConfig) -> anyhow::Result<(Box<dyn FeedConnector>, Arc<dyn Clock>)> {
    if config.feed.kind == "replay" {
        let path = config
            .feed
            .replay_file
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("feed.kind is 'replay' but no replay_file is configured"))?;
        let content = std::fs::read_to_string(path)?;
        let mut feed = ReplayFeed::from_jsonl(&content)?;
        for symbol in &config.feed.symbols {
            feed.subscribe(symbol);
        }
        let clock: Arc<dyn Clock> = feed.clock();
        return Ok((Box::new(feed), clock));
    }

    let endpoint = std::env::var("MARKET_FEED_ENDPOINT")
        .unwrap_or_else(|_| "wss://stream.binance.com:9443".to_string());
    let api_key = std::env::var("MARKET_FEED_API_KEY").ok();
    let mut feed = LiveFeed::new(endpoint, api_key);
    for symbol in &config.feed.symbols {
        feed.subscribe(symbol);
    }
    Ok((Box::new(feed), Arc::new(SystemClock)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("market-core starting up");

    let config = CoreConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load {}, using defaults", CONFIG_PATH);
        CoreConfig::default()
    });

    info!(symbols = ?config.feed.symbols, feed_kind = %config.feed.kind, "configuration ready");

    let (feed, clock) = build_feed(&config)?;
    let ctx = Arc::new(CoreContext::with_clock(config.clone(), clock));

    let registry = build_registry(&config);
    ctx.scheduler.reload_plugins(registry);

    match ctx.scheduler.rehydrate() {
        Ok(n) => info!(restarted = n, "rehydrated previously active strategies"),
        Err(e) => error!(error = %e, "failed to rehydrate strategy state"),
    }

    for symbol in &config.feed.symbols {
        ctx.distribution_bus.subscribe("event-loop", symbol, &Timeframe::ALL, "default");
    }

    let (tick_tx, mut tick_rx) = tokio::sync::mpsc::channel(config.feed.tick_buffer_size);

    let reconnect_interval = std::time::Duration::from_secs(config.feed.reconnect_interval_secs);
    let max_attempts = config.feed.reconnect_max_attempts;
    let feed_task = tokio::spawn(async move {
        if let Err(e) = run_with_reconnect(feed, tick_tx, max_attempts, reconnect_interval).await {
            error!(error = %e, "feed connector exited");
        }
    });

    let indicator_requests = vec![
        IndicatorRequest::Sma { name: "sma_20".into(), period: 20 },
        IndicatorRequest::Ema { name: "ema_20".into(), period: 20 },
        IndicatorRequest::Rsi { name: "rsi_14".into(), period: 14 },
    ];

    let event_loop_ctx = ctx.clone();
    let event_loop = tokio::spawn(async move {
        while let Some(tick) = tick_rx.recv().await {
            event_loop_ctx.distribution_bus.publish_tick(&tick);

            let events = event_loop_ctx.candle_aggregator.on_tick(&tick);
            for (timeframe, event) in events {
                match event {
                    candle::CandleEvent::Updated(candle) => {
                        event_loop_ctx.distribution_bus.publish_candle_update(&candle);
                        dispatch_tick(&event_loop_ctx, &tick.symbol, &indicator_requests).await;
                    }
                    candle::CandleEvent::Completed { completed, started } => {
                        event_loop_ctx.distribution_bus.publish_candle_complete(&completed);
                        event_loop_ctx.distribution_bus.publish_candle_update(&started);
                        event_loop_ctx.indicator_engine.invalidate(&tick.symbol, timeframe);
                        dispatch_candle_complete(&event_loop_ctx, &tick.symbol, timeframe, &completed, &indicator_requests)
                            .await;
                    }
                }
            }
        }
        info!("tick channel closed, event loop exiting");
    });

    // Every validated `Signal` a strategy emits is published onto the
    // `signals` channel inside `dispatch_tick`/`dispatch_candle_complete` for
    // an external order processor to consume — that processor itself is the
    // out-of-scope collaborator, not the hand-off.

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = feed_task => {
            if let Err(e) = result {
                error!(error = %e, "feed task panicked");
            }
        }
        result = event_loop => {
            if let Err(e) = result {
                error!(error = %e, "event loop task panicked");
            }
        }
    }

    info!("market-core shutting down (strategy state already persisted per-callback)");
    Ok(())
}

async fn dispatch_tick(ctx: &CoreContext, symbol: &str, indicator_requests: &[IndicatorRequest]) {
    let data = ctx
        .assembler()
        .get_data_with_indicators(symbol, &Timeframe::ALL, indicator_requests);

    if !ctx.assembler().ensure_consistency(&data) {
        return;
    }

    for strategy_id in ctx.scheduler.strategies_for_symbol(symbol) {
        match ctx.scheduler.execute_on_tick(&strategy_id, &data).await {
            Ok(Some(signal)) => {
                info!(strategy_id = %strategy_id, symbol = %signal.symbol, reason = %signal.reason, "signal emitted");
                ctx.distribution_bus.publish_signal(&signal);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(strategy_id = %strategy_id, error = %e, "strategy tick callback failed");
            }
        }
    }
}

async fn dispatch_candle_complete(
    ctx: &CoreContext,
    symbol: &str,
    timeframe: Timeframe,
    candle: &types::Candle,
    indicator_requests: &[IndicatorRequest],
) {
    let data = ctx
        .assembler()
        .get_data_with_indicators(symbol, &Timeframe::ALL, indicator_requests);

    for strategy_id in ctx.scheduler.strategies_for_symbol(symbol) {
        match ctx
            .scheduler
            .execute_on_candle_complete(&strategy_id, timeframe, candle, &data)
            .await
        {
            Ok(Some(signal)) => {
                info!(strategy_id = %strategy_id, symbol = %signal.symbol, reason = %signal.reason, "signal emitted");
                ctx.distribution_bus.publish_signal(&signal);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(strategy_id = %strategy_id, error = %e, "strategy candle-complete callback failed");
            }
        }
    }
}

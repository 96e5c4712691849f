// =============================================================================
// Reconnect loop — bounded-attempt, fixed-interval retry wrapper
// =============================================================================
//
// Mirrors `AngelOneMarketDataFeed._reconnect_loop`: the first attempt fires
// immediately, every attempt after that waits `interval` before retrying, and
// the loop gives up after `max_attempts` with a fatal error rather than
// retrying forever.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::errors::CoreError;
use crate::feed::FeedConnector;
use crate::types::Tick;

/// Drive `feed` until it is told to stop, reconnecting on every transient
/// failure up to `max_attempts` times per disconnect episode. The attempt
/// counter resets after any connection that stays up long enough to
/// successfully run (i.e. `run` returning at all, clean or not, counts as a
/// completed episode and the next reconnect episode starts fresh).
pub async fn run_with_reconnect(
    mut feed: Box<dyn FeedConnector>,
    sink: mpsc::Sender<Tick>,
    max_attempts: u32,
    interval: Duration,
) -> Result<(), CoreError> {
    loop {
        let mut attempt = 0u32;
        let mut connected = false;

        while attempt < max_attempts {
            attempt += 1;
            info!(attempt, max_attempts, "feed connection attempt");

            match feed.connect().await {
                Ok(()) => {
                    connected = true;
                    break;
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "feed connect failed");
                    if !e.is_retryable() {
                        return Err(e);
                    }
                }
            }

            if attempt < max_attempts {
                let wait = if attempt > 1 { interval } else { Duration::ZERO };
                tokio::time::sleep(wait).await;
            }
        }

        if !connected {
            error!(max_attempts, "failed to reconnect feed after maximum attempts");
            return Err(CoreError::fatal("feed exhausted reconnect attempts"));
        }

        match feed.run(sink.clone()).await {
            Ok(()) => {
                info!("feed stream ended cleanly, reconnecting");
            }
            Err(e) => {
                warn!(error = %e, "feed stream ended with error, reconnecting");
                if !e.is_retryable() {
                    return Err(e);
                }
            }
        }

        feed.disconnect().await;
    }
}

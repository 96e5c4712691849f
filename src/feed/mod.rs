// =============================================================================
// Feed Connector — upstream tick sourcing and reconnection
// =============================================================================

pub mod live;
pub mod reconnect;
pub mod replay;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::CoreError;
use crate::types::Tick;

pub use live::LiveFeed;
pub use replay::ReplayFeed;

/// Uniform interface a tick source implements, whether it talks to a real
/// exchange over a websocket or replays a recorded file.
///
/// Implementations push ticks onto `sink` rather than returning a stream, so
/// the reconnect loop in [`reconnect`] can own the retry policy without
/// needing to know how to resume a partially-consumed stream.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Establish the upstream connection. Returns once connected; does not
    /// block for the lifetime of the stream.
    async fn connect(&mut self) -> Result<(), CoreError>;

    /// Tear down the upstream connection, if any.
    async fn disconnect(&mut self);

    /// Add a symbol to the active subscription set. Adapters that subscribe
    /// per-connection (rather than per-stream) may need to reconnect to pick
    /// up a new symbol; callers should treat this as best-effort until the
    /// next successful `connect`.
    fn subscribe(&mut self, symbol: &str);

    /// Remove a symbol from the active subscription set.
    fn unsubscribe(&mut self, symbol: &str);

    /// Run the connected stream to completion, forwarding every tick to
    /// `sink`. Returns `Ok(())` on a clean upstream close, `Err` on a read
    /// error or disconnect — both are treated as reconnect-worthy by the
    /// caller.
    async fn run(&mut self, sink: mpsc::Sender<Tick>) -> Result<(), CoreError>;
}

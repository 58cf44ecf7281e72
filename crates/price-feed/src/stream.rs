//! Streaming price feed over a reconnecting socket
//!
//! Keyed by feed ids. Subscribes on every open, decodes scaled prices
//! (`mantissa * 10^expo`) and mirrors socket status into the feed state.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use livefeed_core::{
    now_ms, ConnectionStatus, FeedError, FeedResult, FeedSnapshot, PriceQuote, PriceUpdate,
    SocketConfig, Symbol,
};

use crate::feed::dedup;
use crate::listener::{notify, PriceListener};
use crate::socket::{ReconnectingSocket, SocketHandler, SocketSender};
use crate::state::FeedState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    PriceUpdate { price_feed: PriceFeedFrame },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct PriceFeedFrame {
    id: String,
    price: ScaledPrice,
}

#[derive(Debug, Deserialize)]
struct ScaledPrice {
    #[serde(deserialize_with = "integer_or_string")]
    price: i64,
    expo: i32,
    #[serde(default)]
    publish_time: i64,
}

fn integer_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// A decoded price frame
#[derive(Debug, Clone, PartialEq)]
pub struct StreamQuote {
    pub feed_id: String,
    pub quote: PriceQuote,
    pub publish_time: i64,
}

/// Decode one inbound frame. `Ok(None)` for frames that carry no price.
pub fn decode_frame(text: &str) -> FeedResult<Option<StreamQuote>> {
    match serde_json::from_str::<InboundFrame>(text)? {
        InboundFrame::PriceUpdate { price_feed } => {
            let quote = PriceQuote::from_scaled(price_feed.price.price, price_feed.price.expo)?;
            Ok(Some(StreamQuote {
                feed_id: price_feed.id,
                quote,
                publish_time: price_feed.price.publish_time,
            }))
        }
        InboundFrame::Other => Ok(None),
    }
}

/// Feed ids compare without `0x` prefix and case
pub fn normalize_id(id: &str) -> String {
    id.trim_start_matches("0x").to_ascii_lowercase()
}

fn subscription_frame(kind: &str, ids: &[Symbol]) -> String {
    serde_json::json!({
        "type": kind,
        "ids": ids.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
    })
    .to_string()
}

struct StreamHandler {
    state: Arc<FeedState>,
    ids: Arc<RwLock<Vec<Symbol>>>,
    listener: Option<Arc<dyn PriceListener>>,
    updates_tx: broadcast::Sender<PriceUpdate>,
    generation: u64,
}

impl StreamHandler {
    fn tracked(&self, feed_id: &str) -> Option<Symbol> {
        let wanted = normalize_id(feed_id);
        self.ids
            .read()
            .iter()
            .find(|id| normalize_id(id.as_str()) == wanted)
            .cloned()
    }
}

impl SocketHandler for StreamHandler {
    fn on_open(&self, sender: &SocketSender) {
        let ids = self.ids.read().clone();
        debug!(ids = ids.len(), "subscribing to price feeds");
        if let Err(e) = sender.send(subscription_frame("subscribe", &ids)) {
            warn!(error = %e, "subscribe failed");
        }
    }

    fn on_message(&self, text: &str) {
        let decoded = match decode_frame(text) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "undecodable price frame");
                return;
            }
        };

        let Some(symbol) = self.tracked(&decoded.feed_id) else {
            debug!(feed_id = %decoded.feed_id, "ignoring untracked feed");
            return;
        };

        let update = PriceUpdate::from_quote(symbol, decoded.quote, now_ms());
        self.state.apply_and_notify(self.generation, update, |stored| {
            notify(self.listener.as_deref(), stored);
            let _ = self.updates_tx.send(stored.clone());
        });
    }

    fn on_error(&self, error: &FeedError) {
        self.state.fail(self.generation, error.to_string());
    }

    fn on_status(&self, status: ConnectionStatus) {
        // Error carries a message and is recorded by on_error
        if status != ConnectionStatus::Error {
            self.state.set_status(self.generation, status);
        }
    }
}

struct Active {
    socket: ReconnectingSocket,
    generation: u64,
}

/// Price feed driven by a streaming subscription
pub struct StreamingPriceFeed {
    config: SocketConfig,
    state: Arc<FeedState>,
    ids: Arc<RwLock<Vec<Symbol>>>,
    listener: Option<Arc<dyn PriceListener>>,
    updates_tx: broadcast::Sender<PriceUpdate>,
    active: Mutex<Option<Active>>,
}

impl StreamingPriceFeed {
    /// `broadcast_capacity` bounds the update channel behind `subscribe`
    pub fn new(config: SocketConfig, broadcast_capacity: usize) -> FeedResult<Self> {
        config.validate()?;
        if broadcast_capacity == 0 {
            return Err(FeedError::InvalidConfig(
                "broadcast_capacity must be positive".to_string(),
            ));
        }
        let (updates_tx, _) = broadcast::channel(broadcast_capacity);

        Ok(Self {
            config,
            state: Arc::new(FeedState::new()),
            ids: Arc::new(RwLock::new(Vec::new())),
            listener: None,
            updates_tx,
            active: Mutex::new(None),
        })
    }

    pub fn with_listener(mut self, listener: impl PriceListener + 'static) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Subscribe to `ids` over a fresh connection. An empty set closes the
    /// feed. Must be called from within a tokio runtime.
    pub fn start(&self, ids: Vec<Symbol>) -> FeedResult<()> {
        let ids = dedup(ids);
        if ids.is_empty() {
            self.stop();
            return Ok(());
        }

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            previous.socket.disconnect();
        }

        info!(url = %self.config.url, ids = ids.len(), "Starting streaming feed");
        *self.ids.write() = ids;

        let generation = self.state.activate();
        let handler = StreamHandler {
            state: Arc::clone(&self.state),
            ids: Arc::clone(&self.ids),
            listener: self.listener.clone(),
            updates_tx: self.updates_tx.clone(),
            generation,
        };

        let socket = ReconnectingSocket::new(self.config.clone(), Arc::new(handler))?;
        socket.connect();
        *active = Some(Active { socket, generation });
        Ok(())
    }

    /// Replace the tracked ids. Additions and removals are sent as
    /// subscribe/unsubscribe frames when connected. Removed ids are purged
    /// immediately.
    pub fn set_symbols(&self, ids: Vec<Symbol>) -> FeedResult<()> {
        let ids = dedup(ids);
        if ids.is_empty() {
            self.stop();
            return Ok(());
        }

        if self.active.lock().is_none() {
            return self.start(ids);
        }

        let active = self.active.lock();
        let Some(current) = active.as_ref() else {
            return Ok(());
        };

        let (added, removed) = {
            let mut tracked = self.ids.write();
            let added: Vec<Symbol> = ids.iter().filter(|id| !tracked.contains(id)).cloned().collect();
            let removed: Vec<Symbol> = tracked.iter().filter(|id| !ids.contains(id)).cloned().collect();
            *tracked = ids;
            (added, removed)
        };

        self.state.remove_symbols(current.generation, &removed);

        for (kind, batch) in [("subscribe", &added), ("unsubscribe", &removed)] {
            if batch.is_empty() {
                continue;
            }
            // Not connected yet: on_open subscribes the full set
            if let Err(e) = current.socket.send(subscription_frame(kind, batch)) {
                debug!(error = %e, kind, "subscription change deferred");
            }
        }
        Ok(())
    }

    /// Close the subscription. Idempotent.
    pub fn stop(&self) {
        let previous = self.active.lock().take();
        self.state.deactivate();
        if let Some(previous) = previous {
            previous.socket.disconnect();
            info!(url = %self.config.url, "Stopping streaming feed");
        }
    }

    /// Reset the reconnect counter and force a fresh connection
    pub fn reconnect(&self) {
        if let Some(active) = self.active.lock().as_ref() {
            active.socket.reconnect();
        }
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.active
            .lock()
            .as_ref()
            .map(|a| a.socket.reconnect_attempts())
            .unwrap_or(0)
    }

    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.state.snapshot()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn price(&self, id: &Symbol) -> Option<PriceUpdate> {
        self.state.price(id)
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.ids.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PriceUpdate> {
        self.updates_tx.subscribe()
    }
}

impl Drop for StreamingPriceFeed {
    fn drop(&mut self) {
        if self.active.get_mut().take().is_some() {
            self.state.deactivate();
        }
    }
}

//! Polling price feed
//!
//! One spawned task per active feed. The task ticks on a fixed interval
//! (first tick immediately) and runs one cycle per tick: purge symbols
//! that left the set, validate the transport, then fetch every symbol
//! concurrently and merge results in the order they resolve.

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use livefeed_core::{
    now_ms, ConnectionStatus, FeedConfig, FeedError, FeedResult, FeedSnapshot, PriceUpdate, Symbol,
};

use crate::listener::{notify, PriceListener};
use crate::source::PriceSource;
use crate::state::FeedState;

/// Counts for the per-cycle debug line
#[derive(Debug, Clone, Default)]
pub(crate) struct CycleOutcome {
    updated: usize,
    failed: usize,
    purged: usize,
}

/// Everything a cycle needs, shared between the feed handle and its task
#[derive(Clone)]
struct CycleContext {
    source: Arc<dyn PriceSource>,
    state: Arc<FeedState>,
    symbols: Arc<RwLock<Vec<Symbol>>>,
    listener: Option<Arc<dyn PriceListener>>,
    updates_tx: broadcast::Sender<PriceUpdate>,
    request_timeout: Duration,
}

impl CycleContext {
    async fn run(self, generation: u64, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if !self.state.is_current(generation) {
                debug!(source = self.source.name(), "feed generation superseded");
                break;
            }

            let outcome = self.run_cycle(generation).await;
            debug!(
                updated = outcome.updated,
                failed = outcome.failed,
                purged = outcome.purged,
                "cycle complete"
            );
        }
    }

    async fn run_cycle(&self, generation: u64) -> CycleOutcome {
        let symbols = self.symbols.read().clone();
        let mut outcome = CycleOutcome {
            purged: self.state.retain_symbols(generation, &symbols),
            ..Default::default()
        };

        if let Err(e) = self.source.check().await {
            error!(source = self.source.name(), error = %e, "price source unavailable");
            self.state.fail(generation, e.to_string());
            outcome.failed = symbols.len();
            return outcome;
        }

        let mut pending: FuturesUnordered<_> = symbols
            .into_iter()
            .map(|symbol| {
                let source = Arc::clone(&self.source);
                let timeout = self.request_timeout;
                async move {
                    let result = match tokio::time::timeout(timeout, source.fetch_price(&symbol)).await {
                        Ok(result) => result.and_then(|quote| quote.validated()),
                        Err(_) => Err(FeedError::Timeout),
                    };
                    (symbol, result)
                }
            })
            .collect();

        let mut transport_error = None;

        while let Some((symbol, result)) = pending.next().await {
            match result {
                Ok(quote) => {
                    let update = PriceUpdate::from_quote(symbol, quote, now_ms());
                    let applied = self.state.apply_and_notify(generation, update, |stored| {
                        notify(self.listener.as_deref(), stored);
                        // No receivers is fine
                        let _ = self.updates_tx.send(stored.clone());
                    });
                    if applied.is_none() {
                        debug!("feed torn down, dropping in-flight responses");
                        return outcome;
                    }
                    outcome.updated += 1;
                }
                Err(e) => {
                    warn!(%symbol, error = %e, "price fetch failed");
                    outcome.failed += 1;
                    if e.is_transport() && transport_error.is_none() {
                        transport_error = Some(e);
                    }
                }
            }
        }

        if outcome.updated == 0 {
            if let Some(e) = &transport_error {
                error!(source = self.source.name(), error = %e, "every symbol failed at the transport");
                self.state.fail(generation, e.to_string());
            }
        }
        outcome
    }
}

/// Continuously refreshed symbol -> latest price mapping
pub struct LivePriceFeed {
    config: FeedConfig,
    ctx: CycleContext,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LivePriceFeed {
    pub fn new(source: Arc<dyn PriceSource>, config: FeedConfig) -> FeedResult<Self> {
        config.validate()?;
        let (updates_tx, _) = broadcast::channel(config.broadcast_capacity);

        Ok(Self {
            ctx: CycleContext {
                source,
                state: Arc::new(FeedState::new()),
                symbols: Arc::new(RwLock::new(Vec::new())),
                listener: None,
                updates_tx,
                request_timeout: config.request_timeout(),
            },
            config,
            handle: Mutex::new(None),
        })
    }

    /// Register the per-update listener. Builder style, so it is set before
    /// the feed is ever started.
    pub fn with_listener(mut self, listener: impl PriceListener + 'static) -> Self {
        self.ctx.listener = Some(Arc::new(listener));
        self
    }

    /// Activate the feed for `symbols`. Any previous run is replaced.
    /// An empty set leaves the feed closed without touching the network.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, symbols: Vec<Symbol>) {
        let symbols = dedup(symbols);
        if symbols.is_empty() {
            debug!("empty symbol set, feed stays closed");
            self.stop();
            return;
        }

        let mut handle = self.handle.lock();
        if let Some(previous) = handle.take() {
            previous.abort();
        }

        info!(
            source = self.ctx.source.name(),
            symbols = symbols.len(),
            interval_ms = self.config.update_interval_ms,
            "Starting price feed"
        );
        *self.ctx.symbols.write() = symbols;

        let generation = self.ctx.state.activate();
        let ctx = self.ctx.clone();
        let interval = self.config.update_interval();
        *handle = Some(tokio::spawn(ctx.run(generation, interval)));
    }

    /// Replace the tracked set. Takes effect on the next cycle. Entries for
    /// removed symbols stay readable until that cycle purges them.
    pub fn set_symbols(&self, symbols: Vec<Symbol>) {
        let symbols = dedup(symbols);
        if symbols.is_empty() {
            self.stop();
        } else if self.is_running() {
            debug!(symbols = symbols.len(), "symbol set changed");
            *self.ctx.symbols.write() = symbols;
        } else {
            self.start(symbols);
        }
    }

    /// Cancel the timer and in-flight requests and close. Safe to call
    /// any number of times.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            info!(source = self.ctx.source.name(), "Stopping price feed");
        }
        self.ctx.state.deactivate();
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Get shared state reference
    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.ctx.state)
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.ctx.state.snapshot()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.ctx.state.status()
    }

    pub fn price(&self, symbol: &Symbol) -> Option<PriceUpdate> {
        self.ctx.state.price(symbol)
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.ctx.symbols.read().clone()
    }

    /// Receive every applied update
    pub fn subscribe(&self) -> broadcast::Receiver<PriceUpdate> {
        self.ctx.updates_tx.subscribe()
    }
}

impl Drop for LivePriceFeed {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
            self.ctx.state.deactivate();
        }
    }
}

pub(crate) fn dedup(symbols: Vec<Symbol>) -> Vec<Symbol> {
    let mut unique = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        if !symbol.as_str().is_empty() && !unique.contains(&symbol) {
            unique.push(symbol);
        }
    }
    unique
}

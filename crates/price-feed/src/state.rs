//! Shared feed state
//!
//! Prices live in a DashMap so readers never block the feed. Every write
//! goes through the generation gate: a writer holds the generation it was
//! started under, and once the feed is torn down (or re-activated) that
//! generation is stale and the write is dropped.
//!
//! Notification of an applied update runs under the dispatch lock, which
//! `deactivate` also takes: once `deactivate` returns no listener call is
//! in progress and none can start for the old generation. The lock is
//! reentrant so a listener may tear its own feed down.

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicU64, Ordering};

use livefeed_core::{ConnectionStatus, FeedSnapshot, PriceUpdate, Symbol};

/// Status, last update and error, guarded together with the generation
#[derive(Debug, Default)]
struct Gate {
    generation: u64,
    status: ConnectionStatus,
    last_update: Option<PriceUpdate>,
    error: Option<String>,
}

/// In-memory state of one feed
#[derive(Debug, Default)]
pub struct FeedState {
    prices: DashMap<Symbol, PriceUpdate>,
    gate: Mutex<Gate>,
    dispatch: ReentrantMutex<()>,
    update_count: AtomicU64,
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation: status `Connecting`, error cleared.
    /// Known prices are kept.
    pub fn activate(&self) -> u64 {
        let mut gate = self.gate.lock();
        gate.generation += 1;
        gate.status = ConnectionStatus::Connecting;
        gate.error = None;
        gate.generation
    }

    /// Invalidate the current generation and close. Idempotent.
    pub fn deactivate(&self) {
        let _dispatch = self.dispatch.lock();
        let mut gate = self.gate.lock();
        gate.generation += 1;
        gate.status = ConnectionStatus::Closed;
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.gate.lock().generation == generation
    }

    /// Set the status if `generation` is still current
    pub fn set_status(&self, generation: u64, status: ConnectionStatus) -> bool {
        let mut gate = self.gate.lock();
        if gate.generation != generation {
            return false;
        }
        gate.status = status;
        true
    }

    /// Record a feed-level failure: status `Error`, message stored.
    /// Prices are left untouched.
    pub fn fail(&self, generation: u64, message: impl Into<String>) -> bool {
        let mut gate = self.gate.lock();
        if gate.generation != generation {
            return false;
        }
        gate.status = ConnectionStatus::Error;
        gate.error = Some(message.into());
        true
    }

    /// Merge an update. On success the status becomes `Open`, the error is
    /// cleared and the stored update is returned.
    ///
    /// The timestamp is clamped so that it never goes backwards for a symbol.
    pub fn apply(&self, generation: u64, mut update: PriceUpdate) -> Option<PriceUpdate> {
        let mut gate = self.gate.lock();
        if gate.generation != generation {
            return None;
        }

        if let Some(previous) = self.prices.get(&update.symbol) {
            update.timestamp = update.timestamp.max(previous.timestamp);
        }

        self.prices.insert(update.symbol.clone(), update.clone());
        gate.last_update = Some(update.clone());
        gate.status = ConnectionStatus::Open;
        gate.error = None;
        self.update_count.fetch_add(1, Ordering::Relaxed);

        Some(update)
    }

    /// Merge an update and run `dispatch` with the stored value before any
    /// teardown can complete.
    pub fn apply_and_notify<F>(&self, generation: u64, update: PriceUpdate, dispatch: F) -> Option<PriceUpdate>
    where
        F: FnOnce(&PriceUpdate),
    {
        let _dispatch = self.dispatch.lock();
        let stored = self.apply(generation, update)?;
        dispatch(&stored);
        Some(stored)
    }

    /// Drop every entry whose symbol is not in `symbols`. Returns how many
    /// entries were purged.
    pub fn retain_symbols(&self, generation: u64, symbols: &[Symbol]) -> usize {
        let gate = self.gate.lock();
        if gate.generation != generation {
            return 0;
        }

        let before = self.prices.len();
        self.prices.retain(|symbol, _| symbols.contains(symbol));
        before - self.prices.len()
    }

    /// Remove specific symbols
    pub fn remove_symbols(&self, generation: u64, symbols: &[Symbol]) -> usize {
        let gate = self.gate.lock();
        if gate.generation != generation {
            return 0;
        }

        symbols
            .iter()
            .filter(|symbol| self.prices.remove(*symbol).is_some())
            .count()
    }

    pub fn price(&self, symbol: &Symbol) -> Option<PriceUpdate> {
        self.prices.get(symbol).map(|r| r.value().clone())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.gate.lock().status
    }

    pub fn error(&self) -> Option<String> {
        self.gate.lock().error.clone()
    }

    pub fn last_update(&self) -> Option<PriceUpdate> {
        self.gate.lock().last_update.clone()
    }

    /// Consistent copy of prices, status, last update and error
    pub fn snapshot(&self) -> FeedSnapshot {
        let gate = self.gate.lock();
        let prices = self
            .prices
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        FeedSnapshot {
            prices,
            connection_status: gate.status,
            last_update: gate.last_update.clone(),
            error: gate.error.clone(),
        }
    }

    pub fn stats(&self) -> FeedStateStats {
        let gate = self.gate.lock();
        FeedStateStats {
            price_count: self.prices.len(),
            update_count: self.update_count.load(Ordering::Relaxed),
            status: gate.status,
            last_update_ms: gate.last_update.as_ref().map(|u| u.timestamp),
        }
    }
}

/// Statistics about feed state
#[derive(Debug, Clone)]
pub struct FeedStateStats {
    pub price_count: usize,
    pub update_count: u64,
    pub status: ConnectionStatus,
    pub last_update_ms: Option<i64>,
}

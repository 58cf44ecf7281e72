//! Synchronous per-update notification

use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

use livefeed_core::PriceUpdate;

/// Receives every price update, synchronously, within the cycle or frame
/// that produced it. Panics are the listener's own problem: they are
/// caught and logged and the feed keeps running.
pub trait PriceListener: Send + Sync {
    fn on_price(&self, update: &PriceUpdate);
}

impl<F> PriceListener for F
where
    F: Fn(&PriceUpdate) + Send + Sync,
{
    fn on_price(&self, update: &PriceUpdate) {
        self(update)
    }
}

pub(crate) fn notify(listener: Option<&dyn PriceListener>, update: &PriceUpdate) {
    let Some(listener) = listener else {
        return;
    };

    if catch_unwind(AssertUnwindSafe(|| listener.on_price(update))).is_err() {
        error!(symbol = %update.symbol, "price listener panicked");
    }
}

//! Live price feed
//!
//! Features:
//! - Fixed-interval polling with partial-failure isolation
//! - Generation-gated state: nothing mutates after teardown
//! - Reconnecting WebSocket with bounded attempts
//! - Streaming subscriptions keyed by feed id

pub mod feed;
pub mod listener;
pub mod socket;
pub mod source;
pub mod state;
pub mod stream;

pub use feed::LivePriceFeed;
pub use listener::PriceListener;
pub use socket::{ReconnectingSocket, SocketHandler, SocketSender};
pub use source::{HttpPriceSource, PriceSource};
pub use state::FeedState;
pub use stream::StreamingPriceFeed;

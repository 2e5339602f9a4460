//! Exchange gateway for hedge trade execution.
//!
//! The core treats the venue as an unreliable, rate-limited, non-transactional
//! remote service reachable through four operations: submit order, fetch
//! account state, list open orders, cancel all open orders. Venue payloads
//! (including historical field-name aliases) are normalized into one canonical
//! schema here, strictly at the boundary.
//!
//! ## Binance
//! Signed REST adapter for USDⓈ-M futures, one credential pair per account.
//!
//! ## Mock
//! In-memory simulated gateway for paper trading and tests.

mod binance;
pub mod mock;
mod traits;
mod types;

pub use binance::BinanceGateway;
pub use mock::MockGateway;
pub use traits::ExchangeGateway;
pub use types::*;

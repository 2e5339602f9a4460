//! Venue-agnostic gateway trait.
//!
//! The orchestrator and planner only ever see this seam; swapping the signed
//! REST adapter for the in-memory mock changes nothing above it.

use async_trait::async_trait;

use crate::account::Credentials;
use crate::exchange::types::{AccountState, OpenOrder, OrderAck, OrderRequest};

/// The four operations the core needs from a futures venue.
///
/// Every call is remote, rate-limited, and non-transactional; multi-leg
/// atomicity does not exist and callers must not assume it.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Fetch balance and positions for one account.
    ///
    /// Returns `None` on transport failure: absence means "no data yet",
    /// never "zero balance". Callers must not size trades against it.
    async fn fetch_account_state(&self, creds: &Credentials) -> Option<AccountState>;

    /// Submit one order. Fails with the venue's rejection message.
    async fn submit_order(&self, creds: &Credentials, order: &OrderRequest)
        -> anyhow::Result<OrderAck>;

    /// List resting open orders for a symbol (TP/SL trigger read-back only;
    /// never drives orchestration decisions).
    async fn list_open_orders(
        &self,
        creds: &Credentials,
        symbol: &str,
    ) -> anyhow::Result<Vec<OpenOrder>>;

    /// Cancel every open order for a symbol on one account.
    async fn cancel_all_open_orders(&self, creds: &Credentials, symbol: &str)
        -> anyhow::Result<()>;

    /// Set the leverage used for a symbol on one account.
    ///
    /// Venues answer with an error when the value is already set; adapters
    /// tolerate that case.
    async fn set_leverage(&self, creds: &Credentials, symbol: &str, leverage: u32)
        -> anyhow::Result<()>;
}

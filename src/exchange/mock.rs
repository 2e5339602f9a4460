//! Mock gateway for paper trading and tests.
//!
//! Simulates independent accounts keyed by API key: market orders move
//! positions, protective triggers rest as open orders, and per-account
//! failures can be scripted to exercise partial-failure paths.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::account::Credentials;
use crate::exchange::traits::ExchangeGateway;
use crate::exchange::types::{
    AccountState, LivePosition, OpenOrder, OrderAck, OrderRequest, OrderSide, OrderType,
};

/// Simulated state for one account.
#[derive(Debug, Clone)]
struct MockAccount {
    available_balance: Decimal,
    leverage: u32,
    /// Signed position size per symbol.
    positions: HashMap<String, LivePosition>,
    /// Resting trigger orders per symbol.
    open_orders: HashMap<String, Vec<OpenOrder>>,
}

/// In-memory gateway that simulates venue behavior per account.
#[derive(Clone, Default)]
pub struct MockGateway {
    accounts: Arc<RwLock<HashMap<String, MockAccount>>>,
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
    /// API keys whose market entries are rejected (scripted failures).
    failing_entries: Arc<RwLock<HashSet<String>>>,
    /// API keys whose TP/SL trigger submissions are rejected.
    failing_triggers: Arc<RwLock<HashSet<String>>>,
    /// API keys whose state fetch reports "unavailable".
    unavailable: Arc<RwLock<HashSet<String>>>,
    /// Every submitted order, for assertions: (api_key, request).
    submissions: Arc<RwLock<Vec<(String, OrderRequest)>>>,
    /// Every cancel-all call: (api_key, symbol).
    cancellations: Arc<RwLock<Vec<(String, String)>>>,
    order_id_counter: Arc<AtomicI64>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a simulated account with a starting balance and leverage.
    pub async fn register_account(&self, creds: &Credentials, balance: Decimal, leverage: u32) {
        self.accounts.write().await.insert(
            creds.api_key.clone(),
            MockAccount {
                available_balance: balance,
                leverage,
                positions: HashMap::new(),
                open_orders: HashMap::new(),
            },
        );
    }

    /// Set the simulated mark price used to fill market orders.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    /// Script a venue rejection for this account's market entries.
    pub async fn fail_entries_for(&self, creds: &Credentials) {
        self.failing_entries
            .write()
            .await
            .insert(creds.api_key.clone());
    }

    /// Script a venue rejection for this account's trigger orders only.
    pub async fn fail_triggers_for(&self, creds: &Credentials) {
        self.failing_triggers
            .write()
            .await
            .insert(creds.api_key.clone());
    }

    /// Script transport failure for this account's state fetches.
    pub async fn mark_unavailable(&self, creds: &Credentials) {
        self.unavailable.write().await.insert(creds.api_key.clone());
    }

    /// Directly seed a position (for reconciliation scenarios).
    pub async fn seed_position(&self, creds: &Credentials, position: LivePosition) {
        let mut accounts = self.accounts.write().await;
        if let Some(account) = accounts.get_mut(&creds.api_key) {
            account
                .positions
                .insert(position.symbol.clone(), position);
        }
    }

    /// Current signed position size for an account/symbol.
    pub async fn position_size(&self, creds: &Credentials, symbol: &str) -> Decimal {
        self.accounts
            .read()
            .await
            .get(&creds.api_key)
            .and_then(|a| a.positions.get(symbol))
            .map(|p| p.signed_size)
            .unwrap_or(Decimal::ZERO)
    }

    /// All orders submitted so far for one account.
    pub async fn submissions_for(&self, creds: &Credentials) -> Vec<OrderRequest> {
        self.submissions
            .read()
            .await
            .iter()
            .filter(|(key, _)| key == &creds.api_key)
            .map(|(_, req)| req.clone())
            .collect()
    }

    /// Cancel-all calls observed so far.
    pub async fn cancellations(&self) -> Vec<(String, String)> {
        self.cancellations.read().await.clone()
    }

    fn next_order_id(&self) -> i64 {
        self.order_id_counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn fetch_account_state(&self, creds: &Credentials) -> Option<AccountState> {
        if self.unavailable.read().await.contains(&creds.api_key) {
            return None;
        }

        let accounts = self.accounts.read().await;
        let account = accounts.get(&creds.api_key)?;
        let prices = self.prices.read().await;

        // Like the real venue, report an entry for every known symbol so
        // configured leverage is visible even while flat.
        let mut positions: Vec<LivePosition> = Vec::new();
        for symbol in prices.keys() {
            match account.positions.get(symbol) {
                Some(p) => positions.push(p.clone()),
                None => positions.push(LivePosition {
                    symbol: symbol.clone(),
                    signed_size: Decimal::ZERO,
                    leverage: account.leverage,
                    entry_price: Decimal::ZERO,
                    update_time: 0,
                    side: None,
                    take_profit_price: None,
                    stop_loss_price: None,
                }),
            }
        }
        for (symbol, p) in &account.positions {
            if !prices.contains_key(symbol) {
                positions.push(p.clone());
            }
        }

        Some(AccountState {
            available_balance: account.available_balance,
            positions,
        })
    }

    async fn submit_order(&self, creds: &Credentials, order: &OrderRequest) -> Result<OrderAck> {
        self.submissions
            .write()
            .await
            .push((creds.api_key.clone(), order.clone()));

        if order.order_type == OrderType::Market
            && self.failing_entries.read().await.contains(&creds.api_key)
        {
            bail!("Margin is insufficient.");
        }
        if order.order_type != OrderType::Market
            && self.failing_triggers.read().await.contains(&creds.api_key)
        {
            bail!("Order would immediately trigger.");
        }

        let mut accounts = self.accounts.write().await;
        let account = match accounts.get_mut(&creds.api_key) {
            Some(account) => account,
            None => bail!("Invalid API-key, IP, or permissions for action."),
        };

        match order.order_type {
            OrderType::Market => {
                let price = self
                    .prices
                    .read()
                    .await
                    .get(&order.symbol)
                    .copied()
                    .unwrap_or(Decimal::ONE);
                let quantity = order.quantity.unwrap_or(Decimal::ZERO);
                let delta = match order.side {
                    OrderSide::Buy => quantity,
                    OrderSide::Sell => -quantity,
                };

                let leverage = account.leverage;
                let position = account
                    .positions
                    .entry(order.symbol.clone())
                    .or_insert_with(|| LivePosition {
                        symbol: order.symbol.clone(),
                        signed_size: Decimal::ZERO,
                        leverage,
                        entry_price: Decimal::ZERO,
                        update_time: 0,
                        side: None,
                        take_profit_price: None,
                        stop_loss_price: None,
                    });
                position.signed_size += delta;
                position.entry_price = price;
                position.update_time = Utc::now().timestamp_millis();

                debug!(
                    symbol = %order.symbol,
                    side = ?order.side,
                    %quantity,
                    signed_size = %position.signed_size,
                    "Mock market order filled"
                );
            }
            OrderType::TakeProfitMarket | OrderType::StopMarket => {
                account
                    .open_orders
                    .entry(order.symbol.clone())
                    .or_default()
                    .push(OpenOrder {
                        order_type: order.order_type,
                        side: order.side,
                        stop_price: order.stop_price,
                        price: None,
                    });
            }
        }

        Ok(OrderAck {
            order_id: self.next_order_id(),
            symbol: order.symbol.clone(),
        })
    }

    async fn list_open_orders(
        &self,
        creds: &Credentials,
        symbol: &str,
    ) -> Result<Vec<OpenOrder>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .get(&creds.api_key)
            .and_then(|a| a.open_orders.get(symbol))
            .cloned()
            .unwrap_or_default())
    }

    async fn cancel_all_open_orders(&self, creds: &Credentials, symbol: &str) -> Result<()> {
        self.cancellations
            .write()
            .await
            .push((creds.api_key.clone(), symbol.to_string()));

        let mut accounts = self.accounts.write().await;
        if let Some(account) = accounts.get_mut(&creds.api_key) {
            account.open_orders.remove(symbol);
        }
        info!(%symbol, "Mock cancel all open orders");
        Ok(())
    }

    async fn set_leverage(&self, creds: &Credentials, _symbol: &str, leverage: u32) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if let Some(account) = accounts.get_mut(&creds.api_key) {
            account.leverage = leverage;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn creds(key: &str) -> Credentials {
        Credentials {
            api_key: key.to_string(),
            api_secret: "secret".to_string(),
        }
    }

    async fn gateway_with_account(key: &str) -> MockGateway {
        let gateway = MockGateway::new();
        gateway
            .register_account(&creds(key), dec!(10000), 10)
            .await;
        gateway.set_price("BTCUSDT", dec!(50000)).await;
        gateway
    }

    #[tokio::test]
    async fn test_market_order_moves_position() {
        let gateway = gateway_with_account("a").await;
        let order = OrderRequest::market("BTCUSDT", OrderSide::Sell, dec!(0.5));
        gateway.submit_order(&creds("a"), &order).await.unwrap();

        assert_eq!(gateway.position_size(&creds("a"), "BTCUSDT").await, dec!(-0.5));
    }

    #[tokio::test]
    async fn test_reduce_only_flattens() {
        let gateway = gateway_with_account("a").await;
        let open = OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(1.0));
        gateway.submit_order(&creds("a"), &open).await.unwrap();

        let close = OrderRequest::reduce_only_market("BTCUSDT", OrderSide::Sell, dec!(1.0));
        gateway.submit_order(&creds("a"), &close).await.unwrap();

        assert_eq!(gateway.position_size(&creds("a"), "BTCUSDT").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_triggers_rest_and_cancel_clears() {
        let gateway = gateway_with_account("a").await;
        let trigger = OrderRequest::protective_trigger(
            "BTCUSDT",
            OrderSide::Buy,
            OrderType::TakeProfitMarket,
            dec!(52500),
        );
        gateway.submit_order(&creds("a"), &trigger).await.unwrap();

        let resting = gateway.list_open_orders(&creds("a"), "BTCUSDT").await.unwrap();
        assert_eq!(resting.len(), 1);
        assert_eq!(resting[0].stop_price, Some(dec!(52500)));

        gateway
            .cancel_all_open_orders(&creds("a"), "BTCUSDT")
            .await
            .unwrap();
        assert!(gateway
            .list_open_orders(&creds("a"), "BTCUSDT")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_scripted_entry_failure() {
        let gateway = gateway_with_account("a").await;
        gateway.fail_entries_for(&creds("a")).await;

        let order = OrderRequest::market("BTCUSDT", OrderSide::Buy, dec!(0.1));
        let err = gateway.submit_order(&creds("a"), &order).await.unwrap_err();
        assert!(err.to_string().contains("Margin is insufficient."));
        assert_eq!(gateway.position_size(&creds("a"), "BTCUSDT").await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unavailable_account_reports_none() {
        let gateway = gateway_with_account("a").await;
        gateway.mark_unavailable(&creds("a")).await;
        assert!(gateway.fetch_account_state(&creds("a")).await.is_none());
    }

    #[tokio::test]
    async fn test_flat_account_still_reports_leverage() {
        let gateway = gateway_with_account("a").await;
        let state = gateway.fetch_account_state(&creds("a")).await.unwrap();
        assert_eq!(state.leverage_for("BTCUSDT"), Some(10));
        assert_eq!(state.position("BTCUSDT").unwrap().signed_size, Decimal::ZERO);
    }
}

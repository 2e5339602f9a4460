//! Binance USDⓈ-M futures REST adapter.
//!
//! Holds one shared HTTP client; every call signs with the credentials of the
//! account it acts for, so a single adapter serves all configured accounts.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::account::Credentials;
use crate::exchange::traits::ExchangeGateway;
use crate::exchange::types::{
    AccountState, LivePosition, OpenOrder, OrderAck, OrderRequest, OrderSide, OrderType,
    PositionSide,
};

const FUTURES_BASE_URL: &str = "https://fapi.binance.com";
const FUTURES_TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Signed REST gateway to Binance futures.
pub struct BinanceGateway {
    http: Client,
    base_url: String,
}

impl BinanceGateway {
    /// Create a new gateway against production or testnet.
    pub fn new(testnet: bool) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = if testnet {
            FUTURES_TESTNET_URL.to_string()
        } else {
            FUTURES_BASE_URL.to_string()
        };

        Ok(Self { http, base_url })
    }

    /// Create a gateway against an arbitrary base URL (integration tests).
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(creds: &Credentials, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(creds.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Get current timestamp in milliseconds.
    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as u64
    }

    fn signed_url(&self, creds: &Credentials, path: &str, query: &str) -> String {
        let signature = Self::sign(creds, query);
        format!("{}{}?{}&signature={}", self.base_url, path, query, signature)
    }

    /// Parse a response, surfacing the venue's rejection message on error.
    async fn venue_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = serde_json::from_str::<RawVenueError>(&body)
                .map(|e| e.msg)
                .unwrap_or(body);
            return Err(anyhow!("{} rejected ({}): {}", what, status, msg));
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    #[instrument(skip(self, creds))]
    async fn fetch_account_state(&self, creds: &Credentials) -> Option<AccountState> {
        let query = format!("timestamp={}", Self::timestamp());
        let url = self.signed_url(creds, "/fapi/v2/account", &query);

        let response = match self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // Absence means "no data yet", never "zero balance".
                warn!("Account state fetch failed: {}", e);
                return None;
            }
        };

        match Self::venue_json::<RawAccount>(response, "account state").await {
            Ok(raw) => Some(raw.into()),
            Err(e) => {
                warn!("Account state unavailable: {}", e);
                None
            }
        }
    }

    #[instrument(skip(self, creds), fields(symbol = %order.symbol))]
    async fn submit_order(
        &self,
        creds: &Credentials,
        order: &OrderRequest,
    ) -> Result<OrderAck> {
        let mut params = vec![
            ("symbol".to_string(), order.symbol.clone()),
            ("side".to_string(), side_param(order.side).to_string()),
            ("type".to_string(), type_param(order.order_type).to_string()),
            ("timestamp".to_string(), Self::timestamp().to_string()),
        ];

        if let Some(qty) = &order.quantity {
            params.push(("quantity".to_string(), qty.to_string()));
        }

        if let Some(stop_price) = &order.stop_price {
            params.push(("stopPrice".to_string(), stop_price.to_string()));
        }

        if let Some(reduce_only) = order.reduce_only {
            params.push(("reduceOnly".to_string(), reduce_only.to_string()));
        }

        if let Some(close_position) = order.close_position {
            params.push(("closePosition".to_string(), close_position.to_string()));
        }

        let query_string: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let url = self.signed_url(creds, "/fapi/v1/order", &query_string);

        debug!("Placing futures order: {:?}", order);

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await
            .context("Failed to place futures order")?;

        let raw: RawOrderAck = Self::venue_json(response, "order").await?;
        Ok(OrderAck {
            order_id: raw.order_id,
            symbol: raw.symbol,
        })
    }

    #[instrument(skip(self, creds))]
    async fn list_open_orders(
        &self,
        creds: &Credentials,
        symbol: &str,
    ) -> Result<Vec<OpenOrder>> {
        let query = format!("symbol={}&timestamp={}", symbol, Self::timestamp());
        let url = self.signed_url(creds, "/fapi/v1/openOrders", &query);

        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await
            .context("Failed to fetch open orders")?;

        let raw: Vec<RawOpenOrder> = Self::venue_json(response, "open orders").await?;
        Ok(raw.into_iter().filter_map(RawOpenOrder::normalize).collect())
    }

    #[instrument(skip(self, creds))]
    async fn cancel_all_open_orders(&self, creds: &Credentials, symbol: &str) -> Result<()> {
        let query = format!("symbol={}&timestamp={}", symbol, Self::timestamp());
        let url = self.signed_url(creds, "/fapi/v1/allOpenOrders", &query);

        let response = self
            .http
            .delete(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await
            .context("Failed to cancel open orders")?;

        let _: serde_json::Value = Self::venue_json(response, "cancel all").await?;
        Ok(())
    }

    #[instrument(skip(self, creds))]
    async fn set_leverage(&self, creds: &Credentials, symbol: &str, leverage: u32) -> Result<()> {
        let query = format!(
            "symbol={}&leverage={}&timestamp={}",
            symbol,
            leverage,
            Self::timestamp()
        );
        let url = self.signed_url(creds, "/fapi/v1/leverage", &query);

        // The endpoint answers with an error when leverage is already set;
        // that case is not a failure.
        let _ = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await;

        Ok(())
    }
}

fn side_param(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

fn type_param(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        OrderType::StopMarket => "STOP_MARKET",
    }
}

// ==================== Raw venue payloads ====================
//
// All historical field-name aliases are absorbed here; nothing above this
// module ever sees a venue field name.

#[derive(Debug, Deserialize)]
struct RawVenueError {
    #[allow(dead_code)]
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccount {
    #[serde(with = "rust_decimal::serde::str")]
    available_balance: Decimal,
    #[serde(default)]
    positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPosition {
    symbol: String,
    #[serde(alias = "positionAmount", with = "rust_decimal::serde::str")]
    position_amt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    leverage: Decimal,
    #[serde(default, alias = "updatedTime")]
    update_time: i64,
    #[serde(default)]
    position_side: Option<PositionSide>,
}

impl From<RawAccount> for AccountState {
    fn from(raw: RawAccount) -> Self {
        AccountState {
            available_balance: raw.available_balance,
            positions: raw
                .positions
                .into_iter()
                .map(|p| LivePosition {
                    symbol: p.symbol,
                    signed_size: p.position_amt,
                    leverage: p.leverage.to_u32().unwrap_or(1),
                    entry_price: p.entry_price,
                    update_time: p.update_time,
                    side: p.position_side,
                    take_profit_price: None,
                    stop_loss_price: None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrderAck {
    order_id: i64,
    symbol: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOpenOrder {
    #[serde(rename = "type")]
    order_type: String,
    side: OrderSide,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    stop_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    price: Option<Decimal>,
}

impl RawOpenOrder {
    /// Keep only order types the canonical schema knows about.
    fn normalize(self) -> Option<OpenOrder> {
        let order_type = match self.order_type.as_str() {
            "MARKET" => OrderType::Market,
            "TAKE_PROFIT_MARKET" => OrderType::TakeProfitMarket,
            "STOP_MARKET" => OrderType::StopMarket,
            _ => return None,
        };
        Some(OpenOrder {
            order_type,
            side: self.side,
            stop_price: self.stop_price.filter(|p| *p > Decimal::ZERO),
            price: self.price.filter(|p| *p > Decimal::ZERO),
        })
    }
}

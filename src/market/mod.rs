//! Live price book, mark-price feed, and per-symbol precision table.
//!
//! The feed refreshes prices out-of-band; every consumer goes through
//! [`PriceBook`]. A symbol with no price yet makes sizing and opening fail
//! with `PriceUnavailable`; the book never invents a value.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const FUTURES_WS_URL: &str = "wss://fstream.binance.com";
const FUTURES_TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";

/// Decimal precision for one symbol, quantity and price separately.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SymbolPrecision {
    pub quantity: u32,
    pub price: u32,
}

impl Default for SymbolPrecision {
    fn default() -> Self {
        Self {
            quantity: 3,
            price: 2,
        }
    }
}

/// Static per-symbol precision table.
///
/// Quantities and prices are truncated to these scales before submission so
/// the venue never rejects an order for excess precision.
#[derive(Debug, Clone, Default)]
pub struct PrecisionTable {
    symbols: HashMap<String, SymbolPrecision>,
}

impl PrecisionTable {
    pub fn new(symbols: HashMap<String, SymbolPrecision>) -> Self {
        Self { symbols }
    }

    /// Precision for a symbol, falling back to conservative defaults.
    pub fn get(&self, symbol: &str) -> SymbolPrecision {
        self.symbols.get(symbol).copied().unwrap_or_default()
    }
}

/// Shared symbol-keyed last-price lookup.
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known price for a symbol, if any has arrived.
    pub async fn get(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().await.get(symbol).copied()
    }

    /// Record a fresh price.
    pub async fn set(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    /// Number of symbols with a known price.
    pub async fn len(&self) -> usize {
        self.prices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.prices.read().await.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MarkPriceUpdate {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    mark_price: String,
}

/// Mark-price WebSocket feed keeping a [`PriceBook`] current.
pub struct PriceFeed {
    base_url: String,
}

impl PriceFeed {
    pub fn new(testnet: bool) -> Self {
        let base_url = if testnet {
            FUTURES_TESTNET_WS_URL.to_string()
        } else {
            FUTURES_WS_URL.to_string()
        };
        Self { base_url }
    }

    /// Connect and stream mark prices into the book until the connection
    /// drops. Callers wrap this in [`PriceFeed::run_forever`] for retry.
    pub async fn stream_into(&self, book: &PriceBook) -> Result<()> {
        let url = format!("{}/ws/!markPrice@arr@1s", self.base_url);
        info!("Connecting to mark price stream: {}", url);

        let (ws_stream, _) = connect_async(&url)
            .await
            .context("Failed to connect to mark price stream")?;
        let (_write, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Ok(updates) = serde_json::from_str::<Vec<MarkPriceUpdate>>(&text) {
                        for update in updates {
                            if let Ok(price) = Decimal::from_str(&update.mark_price) {
                                book.set(&update.symbol, price).await;
                            }
                        }
                    }
                }
                Ok(Message::Ping(_)) => {
                    debug!("Received ping, pong handled by tungstenite");
                }
                Ok(Message::Close(_)) => {
                    info!("Mark price stream closed by server");
                    return Ok(());
                }
                Err(e) => {
                    warn!("Mark price stream error: {}", e);
                    return Err(e.into());
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Stream prices forever, reconnecting with a fixed backoff.
    pub async fn run_forever(self, book: PriceBook) {
        loop {
            if let Err(e) = self.stream_into(&book).await {
                warn!("Price feed disconnected: {}", e);
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_price_book_set_get() {
        let book = PriceBook::new();
        assert_eq!(book.get("BTCUSDT").await, None);

        book.set("BTCUSDT", dec!(50000)).await;
        assert_eq!(book.get("BTCUSDT").await, Some(dec!(50000)));

        book.set("BTCUSDT", dec!(50100)).await;
        assert_eq!(book.get("BTCUSDT").await, Some(dec!(50100)));
    }

    #[tokio::test]
    async fn test_price_book_shared_across_clones() {
        let book = PriceBook::new();
        let clone = book.clone();
        clone.set("ETHUSDT", dec!(3000)).await;
        assert_eq!(book.get("ETHUSDT").await, Some(dec!(3000)));
    }

    #[test]
    fn test_precision_table_fallback() {
        let mut symbols = HashMap::new();
        symbols.insert(
            "BTCUSDT".to_string(),
            SymbolPrecision {
                quantity: 3,
                price: 1,
            },
        );
        let table = PrecisionTable::new(symbols);

        assert_eq!(table.get("BTCUSDT").price, 1);
        // Unknown symbol falls back to the default scale
        assert_eq!(table.get("DOGEUSDT").quantity, 3);
        assert_eq!(table.get("DOGEUSDT").price, 2);
    }

    #[test]
    fn test_mark_price_update_parses_stream_payload() {
        let payload = r#"[{"e":"markPriceUpdate","s":"BTCUSDT","p":"50123.45000000","r":"0.0001","T":1700000000000}]"#;
        let updates: Vec<MarkPriceUpdate> = serde_json::from_str(payload).unwrap();
        assert_eq!(updates[0].symbol, "BTCUSDT");
        assert_eq!(
            Decimal::from_str(&updates[0].mark_price).unwrap(),
            dec!(50123.45)
        );
    }
}

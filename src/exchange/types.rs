//! Canonical internal schema for exchange entities.
//!
//! One schema per entity; venue adapters translate their wire formats (and
//! any legacy field aliases) into these types and nothing else leaks through.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The opposing side, used for hedge legs and protective triggers.
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    TakeProfitMarket,
    StopMarket,
}

/// Position side tag (hedge-mode venues report an explicit long/short).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Both,
    Long,
    Short,
}

/// A single order submission.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Base-asset quantity; absent for close-position trigger orders.
    pub quantity: Option<Decimal>,
    /// Trigger price for `TakeProfitMarket` / `StopMarket`.
    pub stop_price: Option<Decimal>,
    /// Only ever decrease an existing position.
    pub reduce_only: Option<bool>,
    /// Flatten the whole position when the trigger fires.
    pub close_position: Option<bool>,
}

impl OrderRequest {
    /// A plain market entry order.
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: Some(quantity),
            stop_price: None,
            reduce_only: None,
            close_position: None,
        }
    }

    /// A reduce-only market order sized to flatten an existing position.
    pub fn reduce_only_market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            reduce_only: Some(true),
            ..Self::market(symbol, side, quantity)
        }
    }

    /// A full-position protective trigger (TP or SL) on the opposite side.
    pub fn protective_trigger(
        symbol: &str,
        entry_side: OrderSide,
        order_type: OrderType,
        stop_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: entry_side.opposite(),
            order_type,
            quantity: None,
            stop_price: Some(stop_price),
            reduce_only: None,
            close_position: Some(true),
        }
    }
}

/// Acknowledgement for a submitted order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: i64,
    pub symbol: String,
}

/// A live futures position, rebuilt on every poll and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivePosition {
    pub symbol: String,
    /// Positive = long, negative = short.
    pub signed_size: Decimal,
    pub leverage: u32,
    pub entry_price: Decimal,
    /// Venue-reported last update, milliseconds since epoch.
    pub update_time: i64,
    /// Explicit long/short tag when the venue runs in hedge mode.
    pub side: Option<PositionSide>,
    pub take_profit_price: Option<Decimal>,
    pub stop_loss_price: Option<Decimal>,
}

impl LivePosition {
    /// Whether any exposure exists.
    pub fn is_open(&self) -> bool {
        self.signed_size != Decimal::ZERO
    }

    /// Side of the market order that would flatten this position.
    ///
    /// Prefers the explicit side tag; falls back to the sign of the size.
    pub fn flattening_side(&self) -> OrderSide {
        match self.side {
            Some(PositionSide::Long) => OrderSide::Sell,
            Some(PositionSide::Short) => OrderSide::Buy,
            _ if self.signed_size > Decimal::ZERO => OrderSide::Sell,
            _ => OrderSide::Buy,
        }
    }
}

/// Point-in-time snapshot of one account, rebuilt on every poll.
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub available_balance: Decimal,
    pub positions: Vec<LivePosition>,
}

impl AccountState {
    /// The account's position for a symbol, open or not.
    pub fn position(&self, symbol: &str) -> Option<&LivePosition> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    /// Leverage configured for a symbol, if the venue reported it.
    pub fn leverage_for(&self, symbol: &str) -> Option<u32> {
        self.position(symbol).map(|p| p.leverage)
    }
}

/// A resting open order, read back only to display TP/SL triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_type: OrderType,
    pub side: OrderSide,
    pub stop_price: Option<Decimal>,
    pub price: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_opposite_side() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_protective_trigger_is_opposite_full_close() {
        let req = OrderRequest::protective_trigger(
            "BTCUSDT",
            OrderSide::Buy,
            OrderType::TakeProfitMarket,
            dec!(52500),
        );
        assert_eq!(req.side, OrderSide::Sell);
        assert_eq!(req.close_position, Some(true));
        assert_eq!(req.quantity, None);
        assert_eq!(req.stop_price, Some(dec!(52500)));
    }

    #[test]
    fn test_flattening_side_prefers_explicit_tag() {
        let pos = LivePosition {
            symbol: "BTCUSDT".to_string(),
            signed_size: dec!(2),
            leverage: 10,
            entry_price: dec!(50000),
            update_time: 0,
            side: Some(PositionSide::Short),
            take_profit_price: None,
            stop_loss_price: None,
        };
        // Tag says short even though the sign disagrees; the tag wins.
        assert_eq!(pos.flattening_side(), OrderSide::Buy);
    }

    #[test]
    fn test_flattening_side_from_sign() {
        let mut pos = LivePosition {
            symbol: "BTCUSDT".to_string(),
            signed_size: dec!(-1.5),
            leverage: 10,
            entry_price: dec!(50000),
            update_time: 0,
            side: Some(PositionSide::Both),
            take_profit_price: None,
            stop_loss_price: None,
        };
        assert_eq!(pos.flattening_side(), OrderSide::Buy);
        pos.signed_size = dec!(1.5);
        assert_eq!(pos.flattening_side(), OrderSide::Sell);
    }
}

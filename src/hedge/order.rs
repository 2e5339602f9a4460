//! Hedge order model and lifecycle.
//!
//! A hedge order pairs one primary leg with one or two opposing hedge legs on
//! the same symbol. Orders are created as drafts, become `Open` only after an
//! opening attempt lands every leg, and `Closed` only after a closing attempt
//! flattens every account. Failed attempts never move the status.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use crate::error::HedgeError;

/// TP/SL percentages at or below this are rejected; they are expressed
/// relative to margin-adjusted price movement and anything tighter would sit
/// inside ordinary noise.
pub const MIN_PROTECTION_PCT: u32 = 20;

/// Lifecycle status of a hedge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HedgeStatus {
    Draft,
    Open,
    Closed,
}

impl fmt::Display for HedgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HedgeStatus::Draft => write!(f, "draft"),
            HedgeStatus::Open => write!(f, "open"),
            HedgeStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for HedgeStatus {
    type Err = HedgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(HedgeStatus::Draft),
            "open" => Ok(HedgeStatus::Open),
            "closed" => Ok(HedgeStatus::Closed),
            other => Err(HedgeError::InvalidInput(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

/// One multi-account hedge trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeOrder {
    pub id: u64,
    pub symbol: String,
    pub primary_account: String,
    /// One or two opposing hedge accounts, in leg order.
    pub hedge_accounts: Vec<String>,
    /// Base-asset size of the primary leg.
    pub amount: Decimal,
    /// Take-profit distance as a percentage of entry price.
    pub take_profit_pct: Decimal,
    /// Stop-loss distance as a percentage of entry price.
    pub stop_loss_pct: Decimal,
    pub status: HedgeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HedgeOrder {
    /// Create a new draft order, enforcing every invariant.
    pub fn draft(
        symbol: &str,
        primary_account: &str,
        hedge_accounts: Vec<String>,
        amount: Decimal,
        take_profit_pct: Decimal,
        stop_loss_pct: Decimal,
    ) -> Result<Self, HedgeError> {
        let now = Utc::now();
        let order = Self {
            id: 0,
            symbol: symbol.to_string(),
            primary_account: primary_account.to_string(),
            hedge_accounts,
            amount,
            take_profit_pct,
            stop_loss_pct,
            status: HedgeStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        order.validate()?;
        Ok(order)
    }

    /// Check the structural invariants.
    pub fn validate(&self) -> Result<(), HedgeError> {
        if self.symbol.is_empty() {
            return Err(HedgeError::InvalidInput("symbol must not be empty".into()));
        }
        if self.amount <= Decimal::ZERO {
            return Err(HedgeError::InvalidInput("amount must be positive".into()));
        }
        if self.hedge_accounts.is_empty() || self.hedge_accounts.len() > 2 {
            return Err(HedgeError::InvalidInput(
                "between 1 and 2 hedge accounts are required".into(),
            ));
        }
        if self
            .hedge_accounts
            .iter()
            .any(|h| h == &self.primary_account)
        {
            return Err(HedgeError::InvalidInput(format!(
                "primary account {} cannot also hedge",
                self.primary_account
            )));
        }
        let unique: HashSet<&String> = self.hedge_accounts.iter().collect();
        if unique.len() != self.hedge_accounts.len() {
            return Err(HedgeError::InvalidInput(
                "hedge accounts must be distinct".into(),
            ));
        }
        let min = Decimal::from(MIN_PROTECTION_PCT);
        if self.take_profit_pct <= min {
            return Err(HedgeError::InvalidInput(format!(
                "take_profit_pct must exceed {MIN_PROTECTION_PCT}"
            )));
        }
        if self.stop_loss_pct <= min {
            return Err(HedgeError::InvalidInput(format!(
                "stop_loss_pct must exceed {MIN_PROTECTION_PCT}"
            )));
        }
        Ok(())
    }

    /// All participating account names: primary first, then hedges in order.
    pub fn participants(&self) -> Vec<&str> {
        std::iter::once(self.primary_account.as_str())
            .chain(self.hedge_accounts.iter().map(String::as_str))
            .collect()
    }

    /// Whether edits are permitted: only while no live position exists.
    pub fn is_editable(&self, any_leg_open: bool) -> bool {
        self.status != HedgeStatus::Open && !any_leg_open
    }

    /// Move to a new status, stamping `updated_at`.
    pub fn transition(&mut self, status: HedgeStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Storage abstraction for hedge orders.
///
/// The core is agnostic to the medium; drafts survive restarts through
/// whichever implementation the binary wires in.
pub trait HedgeOrderStore: Send + Sync {
    /// Insert a new order, assigning and returning its id.
    fn insert(&self, order: &mut HedgeOrder) -> anyhow::Result<u64>;
    fn get(&self, id: u64) -> anyhow::Result<Option<HedgeOrder>>;
    fn update(&self, order: &HedgeOrder) -> anyhow::Result<()>;
    fn list(&self) -> anyhow::Result<Vec<HedgeOrder>>;
    fn delete(&self, id: u64) -> anyhow::Result<()>;
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryOrderStore {
    orders: Mutex<Vec<HedgeOrder>>,
    next_id: Mutex<u64>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HedgeOrderStore for MemoryOrderStore {
    fn insert(&self, order: &mut HedgeOrder) -> anyhow::Result<u64> {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        order.id = *next_id;
        self.orders.lock().unwrap().push(order.clone());
        Ok(order.id)
    }

    fn get(&self, id: u64) -> anyhow::Result<Option<HedgeOrder>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.id == id)
            .cloned())
    }

    fn update(&self, order: &HedgeOrder) -> anyhow::Result<()> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(existing) = orders.iter_mut().find(|o| o.id == order.id) {
            *existing = order.clone();
        }
        Ok(())
    }

    fn list(&self) -> anyhow::Result<Vec<HedgeOrder>> {
        Ok(self.orders.lock().unwrap().clone())
    }

    fn delete(&self, id: u64) -> anyhow::Result<()> {
        self.orders.lock().unwrap().retain(|o| o.id != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn valid_draft() -> HedgeOrder {
        HedgeOrder::draft(
            "BTCUSDT",
            "alpha",
            vec!["bravo".to_string()],
            dec!(0.01),
            dec!(60),
            dec!(60),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_draft_passes() {
        let order = valid_draft();
        assert_eq!(order.status, HedgeStatus::Draft);
        assert_eq!(order.participants(), vec!["alpha", "bravo"]);
    }

    #[test]
    fn test_primary_cannot_hedge_itself() {
        let err = HedgeOrder::draft(
            "BTCUSDT",
            "alpha",
            vec!["alpha".to_string()],
            dec!(0.01),
            dec!(60),
            dec!(60),
        )
        .unwrap_err();
        assert!(matches!(err, HedgeError::InvalidInput(_)));
    }

    #[test]
    fn test_duplicate_hedges_rejected() {
        let err = HedgeOrder::draft(
            "BTCUSDT",
            "alpha",
            vec!["bravo".to_string(), "bravo".to_string()],
            dec!(0.01),
            dec!(60),
            dec!(60),
        )
        .unwrap_err();
        assert!(matches!(err, HedgeError::InvalidInput(_)));
    }

    #[test]
    fn test_three_hedges_rejected() {
        let err = HedgeOrder::draft(
            "BTCUSDT",
            "alpha",
            vec!["b".to_string(), "c".to_string(), "d".to_string()],
            dec!(0.01),
            dec!(60),
            dec!(60),
        )
        .unwrap_err();
        assert!(matches!(err, HedgeError::InvalidInput(_)));
    }

    #[test]
    fn test_protection_bounds_are_strict() {
        // Exactly 20 is rejected; just above passes.
        assert!(HedgeOrder::draft(
            "BTCUSDT",
            "alpha",
            vec!["bravo".to_string()],
            dec!(0.01),
            dec!(20),
            dec!(60),
        )
        .is_err());
        assert!(HedgeOrder::draft(
            "BTCUSDT",
            "alpha",
            vec!["bravo".to_string()],
            dec!(0.01),
            dec!(20.1),
            dec!(20.1),
        )
        .is_ok());
    }

    #[test]
    fn test_zero_amount_rejected() {
        let err = HedgeOrder::draft(
            "BTCUSDT",
            "alpha",
            vec!["bravo".to_string()],
            Decimal::ZERO,
            dec!(60),
            dec!(60),
        )
        .unwrap_err();
        assert!(matches!(err, HedgeError::InvalidInput(_)));
    }

    #[test]
    fn test_editability() {
        let mut order = valid_draft();
        assert!(order.is_editable(false));
        // Leftover exposure blocks edits even in draft
        assert!(!order.is_editable(true));

        order.transition(HedgeStatus::Open);
        assert!(!order.is_editable(false));

        order.transition(HedgeStatus::Closed);
        assert!(order.is_editable(false));
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryOrderStore::new();
        let mut order = valid_draft();
        let id = store.insert(&mut order).unwrap();
        assert_eq!(order.id, id);

        let mut loaded = store.get(id).unwrap().unwrap();
        assert_eq!(loaded.symbol, "BTCUSDT");

        loaded.transition(HedgeStatus::Open);
        store.update(&loaded).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().status, HedgeStatus::Open);

        store.delete(id).unwrap();
        assert!(store.get(id).unwrap().is_none());
    }
}

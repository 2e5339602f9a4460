//! Named exchange accounts and their rolling trade statistics.
//!
//! Credentials come from configuration; `trade_count` / `cumulative_volume`
//! are mutated exactly once per completed leg by the order orchestrator and
//! survive restarts through the persistence layer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::HedgeError;

/// API credential pair for one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

/// One named exchange account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique key; hedge orders reference accounts by this name.
    pub name: String,
    #[serde(flatten)]
    pub credentials: Credentials,
    /// Completed legs (opens and closes both count).
    #[serde(default)]
    pub trade_count: u64,
    /// Running notional volume across completed legs.
    #[serde(default)]
    pub cumulative_volume: Decimal,
}

impl Account {
    pub fn new(name: &str, api_key: &str, api_secret: &str) -> Self {
        Self {
            name: name.to_string(),
            credentials: Credentials {
                api_key: api_key.to_string(),
                api_secret: api_secret.to_string(),
            },
            trade_count: 0,
            cumulative_volume: Decimal::ZERO,
        }
    }
}

/// Shared registry of accounts keyed by name.
///
/// Statistics updates are commutative increments applied under one write-lock
/// acquisition, so concurrent attempts on different orders never lose updates
/// to a stale read-modify-write.
#[derive(Debug, Default)]
pub struct AccountRegistry {
    inner: RwLock<HashMap<String, Account>>,
}

impl AccountRegistry {
    pub fn new(accounts: Vec<Account>) -> Self {
        let inner = accounts.into_iter().map(|a| (a.name.clone(), a)).collect();
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Look up credentials for a named account.
    pub async fn credentials(&self, name: &str) -> Result<Credentials, HedgeError> {
        let inner = self.inner.read().await;
        inner
            .get(name)
            .filter(|a| !a.credentials.api_key.is_empty() && !a.credentials.api_secret.is_empty())
            .map(|a| a.credentials.clone())
            .ok_or_else(|| HedgeError::CredentialsMissing(name.to_string()))
    }

    /// Record one completed leg: +1 trade, +notional volume.
    pub async fn record_leg_fill(&self, name: &str, notional: Decimal) {
        let mut inner = self.inner.write().await;
        if let Some(account) = inner.get_mut(name) {
            account.trade_count += 1;
            account.cumulative_volume += notional;
            debug!(
                account = %name,
                %notional,
                trade_count = account.trade_count,
                cumulative_volume = %account.cumulative_volume,
                "Recorded leg fill"
            );
        }
    }

    /// Restore persisted statistics for an account, if it exists.
    pub async fn restore_stats(&self, name: &str, trade_count: u64, cumulative_volume: Decimal) {
        let mut inner = self.inner.write().await;
        if let Some(account) = inner.get_mut(name) {
            account.trade_count = trade_count;
            account.cumulative_volume = cumulative_volume;
        }
    }

    /// Clone one account's current record.
    pub async fn get(&self, name: &str) -> Option<Account> {
        self.inner.read().await.get(name).cloned()
    }

    /// All account names, sorted for stable display.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every account record.
    pub async fn snapshot(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.inner.read().await.values().cloned().collect();
        accounts.sort_by(|a, b| a.name.cmp(&b.name));
        accounts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn test_registry() -> AccountRegistry {
        AccountRegistry::new(vec![
            Account::new("alpha", "key-a", "secret-a"),
            Account::new("bravo", "key-b", "secret-b"),
        ])
    }

    #[tokio::test]
    async fn test_credentials_lookup() {
        let registry = test_registry();
        let creds = registry.credentials("alpha").await.unwrap();
        assert_eq!(creds.api_key, "key-a");
    }

    #[tokio::test]
    async fn test_unknown_account_is_credentials_missing() {
        let registry = test_registry();
        assert_eq!(
            registry.credentials("ghost").await,
            Err(HedgeError::CredentialsMissing("ghost".to_string()))
        );
    }

    #[tokio::test]
    async fn test_blank_key_is_credentials_missing() {
        let registry = AccountRegistry::new(vec![Account::new("empty", "", "")]);
        assert!(registry.credentials("empty").await.is_err());
    }

    #[tokio::test]
    async fn test_record_leg_fill_increments() {
        let registry = test_registry();
        registry.record_leg_fill("alpha", dec!(500)).await;
        registry.record_leg_fill("alpha", dec!(250)).await;

        let account = registry.get("alpha").await.unwrap();
        assert_eq!(account.trade_count, 2);
        assert_eq!(account.cumulative_volume, dec!(750));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let registry = Arc::new(test_registry());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.record_leg_fill("bravo", dec!(10)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let account = registry.get("bravo").await.unwrap();
        assert_eq!(account.trade_count, 50);
        assert_eq!(account.cumulative_volume, dec!(500));
    }
}

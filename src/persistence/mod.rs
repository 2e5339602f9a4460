//! SQLite persistence for hedge order drafts and account statistics.
//!
//! The core never touches SQL; it goes through [`HedgeOrderStore`] and the
//! account registry. Decimals are stored as TEXT to avoid float drift.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::account::Account;
use crate::hedge::{HedgeOrder, HedgeOrderStore, HedgeStatus};

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        info!("Store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// Fully in-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().unwrap().execute_batch(
            r#"
            -- Hedge order drafts and their lifecycle status
            CREATE TABLE IF NOT EXISTS hedge_orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                primary_account TEXT NOT NULL,
                hedge_accounts TEXT NOT NULL,
                amount TEXT NOT NULL,
                take_profit_pct TEXT NOT NULL,
                stop_loss_pct TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Rolling per-account statistics
            CREATE TABLE IF NOT EXISTS account_stats (
                name TEXT PRIMARY KEY,
                trade_count INTEGER NOT NULL,
                cumulative_volume TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Upsert the statistics of every account.
    pub fn save_account_stats(&self, accounts: &[Account]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        for account in accounts {
            tx.execute(
                r#"
                INSERT INTO account_stats (name, trade_count, cumulative_volume, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(name) DO UPDATE SET
                    trade_count = ?2,
                    cumulative_volume = ?3,
                    updated_at = ?4
                "#,
                params![
                    account.name,
                    account.trade_count as i64,
                    account.cumulative_volume.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Load persisted statistics: (name, trade_count, cumulative_volume).
    pub fn load_account_stats(&self) -> Result<Vec<(String, u64, Decimal)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT name, trade_count, cumulative_volume FROM account_stats")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? as u64,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut stats = Vec::new();
        for row in rows {
            let (name, count, volume) = row?;
            let volume = Decimal::from_str(&volume)
                .with_context(|| format!("Bad cumulative_volume for {name}"))?;
            stats.push((name, count, volume));
        }
        Ok(stats)
    }
}

fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<HedgeOrder> {
    let hedge_accounts: String = row.get(3)?;
    let amount: String = row.get(4)?;
    let tp: String = row.get(5)?;
    let sl: String = row.get(6)?;
    let status: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(HedgeOrder {
        id: row.get::<_, i64>(0)? as u64,
        symbol: row.get(1)?,
        primary_account: row.get(2)?,
        hedge_accounts: serde_json::from_str(&hedge_accounts).unwrap_or_default(),
        amount: Decimal::from_str(&amount).unwrap_or_default(),
        take_profit_pct: Decimal::from_str(&tp).unwrap_or_default(),
        stop_loss_pct: Decimal::from_str(&sl).unwrap_or_default(),
        status: HedgeStatus::from_str(&status).unwrap_or(HedgeStatus::Draft),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

impl HedgeOrderStore for SqliteStore {
    fn insert(&self, order: &mut HedgeOrder) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO hedge_orders
                (symbol, primary_account, hedge_accounts, amount,
                 take_profit_pct, stop_loss_pct, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                order.symbol,
                order.primary_account,
                serde_json::to_string(&order.hedge_accounts)?,
                order.amount.to_string(),
                order.take_profit_pct.to_string(),
                order.stop_loss_pct.to_string(),
                order.status.to_string(),
                order.created_at.to_rfc3339(),
                order.updated_at.to_rfc3339(),
            ],
        )?;
        order.id = conn.last_insert_rowid() as u64;
        Ok(order.id)
    }

    fn get(&self, id: u64) -> Result<Option<HedgeOrder>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, symbol, primary_account, hedge_accounts, amount,
                    take_profit_pct, stop_loss_pct, status, created_at, updated_at
             FROM hedge_orders WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id as i64], row_to_order)?;
        match rows.next() {
            Some(order) => Ok(Some(order?)),
            None => Ok(None),
        }
    }

    fn update(&self, order: &HedgeOrder) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE hedge_orders SET
                symbol = ?2, primary_account = ?3, hedge_accounts = ?4,
                amount = ?5, take_profit_pct = ?6, stop_loss_pct = ?7,
                status = ?8, updated_at = ?9
            WHERE id = ?1
            "#,
            params![
                order.id as i64,
                order.symbol,
                order.primary_account,
                serde_json::to_string(&order.hedge_accounts)?,
                order.amount.to_string(),
                order.take_profit_pct.to_string(),
                order.stop_loss_pct.to_string(),
                order.status.to_string(),
                order.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<HedgeOrder>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, symbol, primary_account, hedge_accounts, amount,
                    take_profit_pct, stop_loss_pct, status, created_at, updated_at
             FROM hedge_orders ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_order)?;
        let mut orders = Vec::new();
        for order in rows {
            orders.push(order?);
        }
        Ok(orders)
    }

    fn delete(&self, id: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM hedge_orders WHERE id = ?1", params![id as i64])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn draft() -> HedgeOrder {
        HedgeOrder::draft(
            "BTCUSDT",
            "alpha",
            vec!["bravo".to_string(), "charlie".to_string()],
            dec!(0.01),
            dec!(60),
            dec!(55),
        )
        .unwrap()
    }

    #[test]
    fn test_order_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut order = draft();

        let id = store.insert(&mut order).unwrap();
        assert!(id > 0);

        let loaded = store.get(id).unwrap().unwrap();
        assert_eq!(loaded.symbol, "BTCUSDT");
        assert_eq!(loaded.primary_account, "alpha");
        assert_eq!(loaded.hedge_accounts, vec!["bravo", "charlie"]);
        assert_eq!(loaded.amount, dec!(0.01));
        assert_eq!(loaded.take_profit_pct, dec!(60));
        assert_eq!(loaded.stop_loss_pct, dec!(55));
        assert_eq!(loaded.status, HedgeStatus::Draft);
    }

    #[test]
    fn test_status_update_persists() {
        let store = SqliteStore::in_memory().unwrap();
        let mut order = draft();
        store.insert(&mut order).unwrap();

        order.transition(HedgeStatus::Open);
        store.update(&order).unwrap();

        let loaded = store.get(order.id).unwrap().unwrap();
        assert_eq!(loaded.status, HedgeStatus::Open);
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let store = SqliteStore::in_memory().unwrap();
        for _ in 0..3 {
            store.insert(&mut draft()).unwrap();
        }
        let ids: Vec<u64> = store.list().unwrap().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_delete_removes_order() {
        let store = SqliteStore::in_memory().unwrap();
        let mut order = draft();
        store.insert(&mut order).unwrap();
        store.delete(order.id).unwrap();
        assert!(store.get(order.id).unwrap().is_none());
    }

    #[test]
    fn test_account_stats_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let mut account = Account::new("alpha", "key", "secret");
        account.trade_count = 4;
        account.cumulative_volume = dec!(2000.5);

        store.save_account_stats(&[account]).unwrap();
        let stats = store.load_account_stats().unwrap();
        assert_eq!(stats, vec![("alpha".to_string(), 4, dec!(2000.5))]);

        // Upsert overwrites
        let mut account = Account::new("alpha", "key", "secret");
        account.trade_count = 6;
        account.cumulative_volume = dec!(3000);
        store.save_account_stats(&[account]).unwrap();
        let stats = store.load_account_stats().unwrap();
        assert_eq!(stats[0].1, 6);
    }
}

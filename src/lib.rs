//! # Hedge Desk
//!
//! Multi-account delta-neutral hedge trading on Binance Futures.
//!
//! One account opens a directional futures position while one or two other
//! accounts open the opposite exposure, each leg carrying its own
//! take-profit/stop-loss protection. The exchange offers no cross-account
//! atomicity, so the hard parts live here: leg sizing against per-account
//! margin, parallel order orchestration with partial-failure accounting, and
//! poll-based reconciliation of what is actually open.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `account`: Named accounts, credentials, and rolling trade statistics
//! - `exchange`: Exchange gateway (signed REST client + paper-trading mock)
//! - `market`: Live price book, mark-price feed, and symbol precision table
//! - `hedge`: Leg planner, order orchestrator, reconciler, rotation engine
//! - `persistence`: SQLite-based storage for drafts and account statistics
//! - `utils`: Shared decimal arithmetic helpers

pub mod account;
pub mod config;
pub mod error;
pub mod exchange;
pub mod hedge;
pub mod market;
pub mod persistence;
pub mod utils;

pub use config::Config;
pub use error::HedgeError;

//! Hedge trade core.
//!
//! Contains the logic for:
//! - Hedge order modeling and invariant validation
//! - Leg sizing against per-account margin capacity
//! - Open/close orchestration across accounts with partial-failure accounting
//! - Deriving open/flat state from polled positions
//! - Weighted-fair rotation grouping for batch trade creation

mod order;
mod orchestrator;
mod planner;
mod reconciler;
mod rotation;

pub use order::{HedgeOrder, HedgeOrderStore, HedgeStatus, MemoryOrderStore};
pub use orchestrator::HedgeOrchestrator;
pub use planner::{plan_legs, LegInstruction, ParticipantMargin};
pub use reconciler::{reconcile, DerivedTradeState};
pub use rotation::{RotationEngine, RotationGroup, RotationPlan, RotationState};

//! Order orchestration across accounts.
//!
//! Drives a hedge order through its lifecycle: validate, plan, fan the legs
//! out in parallel against the gateway, accumulate per-leg partial failure,
//! and keep account statistics consistent with what actually happened.
//!
//! Failed legs are never unwound automatically. Automatic unwind logic can
//! itself fail and compound the inconsistency; the failure is reported, the
//! order keeps its status, and the operator resolves leftovers via the next
//! reconciliation pass and a retried close.

use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::account::{AccountRegistry, Credentials};
use crate::config::{ExecutionConfig, ReconcileConfig};
use crate::error::HedgeError;
use crate::exchange::{
    ExchangeGateway, LivePosition, OrderRequest, OrderType,
};
use crate::hedge::order::{HedgeOrder, HedgeStatus};
use crate::hedge::planner::{plan_legs, LegInstruction, ParticipantMargin};
use crate::hedge::reconciler::{reconcile, DerivedTradeState};
use crate::market::{PrecisionTable, PriceBook};

/// Executes opening and closing attempts for hedge orders.
///
/// Attempts on the same order id are mutually exclusive (single-flight);
/// attempts on different ids run fully in parallel with no shared locks
/// beyond the statistics registry.
pub struct HedgeOrchestrator {
    gateway: Arc<dyn ExchangeGateway>,
    registry: Arc<AccountRegistry>,
    prices: PriceBook,
    precision: PrecisionTable,
    execution: ExecutionConfig,
    reconcile_settings: ReconcileConfig,
    in_flight: Mutex<HashSet<u64>>,
    rng: Mutex<StdRng>,
}

impl HedgeOrchestrator {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        registry: Arc<AccountRegistry>,
        prices: PriceBook,
        precision: PrecisionTable,
        execution: ExecutionConfig,
        reconcile_settings: ReconcileConfig,
    ) -> Self {
        Self {
            gateway,
            registry,
            prices,
            precision,
            execution,
            reconcile_settings,
            in_flight: Mutex::new(HashSet::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seed the planner's random draws, for deterministic tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Execute an opening attempt.
    ///
    /// On success every leg's entry landed and the order is `Open`. On any
    /// leg failure the order stays `Draft` and filled legs on other accounts
    /// are left standing for the operator to resolve.
    pub async fn open(&self, order: &mut HedgeOrder) -> Result<(), HedgeError> {
        let _flight = self.acquire_flight(order.id)?;

        order.validate()?;
        if order.status != HedgeStatus::Draft {
            return Err(HedgeError::InvalidInput(format!(
                "order {} is {}, only drafts can be opened",
                order.id, order.status
            )));
        }

        let price = self
            .prices
            .get(&order.symbol)
            .await
            .ok_or_else(|| HedgeError::PriceUnavailable(order.symbol.clone()))?;

        let creds = self.participant_credentials(order).await?;
        let states = self.participant_states(order, &creds).await?;

        // Leftover exposure from an earlier attempt blocks a fresh one.
        let positions = positions_for(order, &states);
        if reconcile(order, &positions, &self.reconcile_settings).any_leg_open {
            return Err(HedgeError::InvalidInput(format!(
                "order {} still has exposure on {}; close it first",
                order.id, order.symbol
            )));
        }

        let margins: Vec<ParticipantMargin> = order
            .participants()
            .iter()
            .map(|name| {
                let state = &states[*name];
                ParticipantMargin {
                    account: name.to_string(),
                    available_balance: state.available_balance,
                    leverage: state
                        .leverage_for(&order.symbol)
                        .unwrap_or(self.execution.default_leverage),
                }
            })
            .collect();

        let legs = {
            let mut rng = self.rng.lock().unwrap();
            plan_legs(
                order,
                &margins[0],
                &margins[1..],
                price,
                self.precision.get(&order.symbol),
                self.execution.margin_safety,
                &mut *rng,
            )?
        };

        // Align leverage on every account before entering; venues answer
        // "already set" with an error, which the gateway tolerates.
        join_all(legs.iter().map(|leg| {
            let creds = creds[&leg.account].clone();
            let symbol = order.symbol.clone();
            let leverage = margins[0].leverage;
            async move {
                let _ = self.gateway.set_leverage(&creds, &symbol, leverage).await;
            }
        }))
        .await;

        info!(
            order_id = order.id,
            symbol = %order.symbol,
            legs = legs.len(),
            %price,
            "Executing opening attempt"
        );

        // All legs in parallel; the attempt completes when every leg has
        // finished, not on first failure.
        let results = join_all(
            legs.iter()
                .map(|leg| self.execute_entry_leg(leg, order, &creds[&leg.account], price)),
        )
        .await;

        let failures: Vec<(String, String)> = legs
            .iter()
            .zip(&results)
            .filter_map(|(leg, result)| {
                result
                    .as_ref()
                    .err()
                    .map(|e| (leg.account.clone(), e.to_string()))
            })
            .collect();

        if failures.is_empty() {
            order.transition(HedgeStatus::Open);
            info!(order_id = order.id, "All legs filled, order open");
            Ok(())
        } else if failures.len() == legs.len() {
            let (account, reason) = failures.into_iter().next().expect("non-empty");
            Err(HedgeError::LegSubmissionFailed { account, reason })
        } else {
            Err(HedgeError::PartialFailure {
                failures: failures
                    .into_iter()
                    .map(|(account, reason)| format!("{account}: {reason}"))
                    .collect(),
            })
        }
    }

    /// Submit one leg: market entry, then TP and SL triggers independently.
    ///
    /// A trigger failure does not roll back the entry; it is logged and the
    /// leg still counts as filled. After the leg's calls complete the
    /// account is refreshed and its statistics incremented.
    async fn execute_entry_leg(
        &self,
        leg: &LegInstruction,
        order: &HedgeOrder,
        creds: &Credentials,
        price: Decimal,
    ) -> Result<(), HedgeError> {
        let entry = OrderRequest::market(&order.symbol, leg.side, leg.quantity);
        let submitted = self.gateway.submit_order(creds, &entry).await;

        match submitted {
            Ok(ack) => {
                info!(
                    order_id = order.id,
                    account = %leg.account,
                    side = ?leg.side,
                    quantity = %leg.quantity,
                    venue_order_id = ack.order_id,
                    "Entry leg filled"
                );

                if let Some(tp) = leg.take_profit_price {
                    let trigger = OrderRequest::protective_trigger(
                        &order.symbol,
                        leg.side,
                        OrderType::TakeProfitMarket,
                        tp,
                    );
                    if let Err(e) = self.gateway.submit_order(creds, &trigger).await {
                        warn!(
                            account = %leg.account,
                            error = %e,
                            "Take-profit trigger rejected; entry stands unprotected"
                        );
                    }
                }
                if let Some(sl) = leg.stop_loss_price {
                    let trigger = OrderRequest::protective_trigger(
                        &order.symbol,
                        leg.side,
                        OrderType::StopMarket,
                        sl,
                    );
                    if let Err(e) = self.gateway.submit_order(creds, &trigger).await {
                        warn!(
                            account = %leg.account,
                            error = %e,
                            "Stop-loss trigger rejected; entry stands unprotected"
                        );
                    }
                }

                let _ = self.gateway.fetch_account_state(creds).await;
                self.registry
                    .record_leg_fill(&leg.account, leg.quantity * price)
                    .await;
                Ok(())
            }
            Err(e) => {
                let _ = self.gateway.fetch_account_state(creds).await;
                Err(HedgeError::LegSubmissionFailed {
                    account: leg.account.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Execute a closing attempt: flatten every participant's position with
    /// reduce-only market orders and sweep orphaned TP/SL triggers.
    ///
    /// The order becomes `Closed` only if every account's close step
    /// completes; otherwise the status is left unchanged and the partial
    /// close surfaces on the next reconciliation pass.
    pub async fn close(&self, order: &mut HedgeOrder) -> Result<(), HedgeError> {
        let _flight = self.acquire_flight(order.id)?;

        if order.status == HedgeStatus::Closed {
            return Err(HedgeError::InvalidInput(format!(
                "order {} is already closed",
                order.id
            )));
        }

        let price = self
            .prices
            .get(&order.symbol)
            .await
            .ok_or_else(|| HedgeError::PriceUnavailable(order.symbol.clone()))?;

        let creds = self.participant_credentials(order).await?;

        info!(order_id = order.id, symbol = %order.symbol, "Executing closing attempt");

        let participants = order.participants();
        let results = join_all(
            participants
                .iter()
                .map(|name| self.flatten_account(name, order, &creds[*name], price)),
        )
        .await;

        let failures: Vec<String> = participants
            .iter()
            .zip(&results)
            .filter_map(|(name, result)| {
                result.as_ref().err().map(|e| format!("{name}: {e}"))
            })
            .collect();

        if failures.is_empty() {
            order.transition(HedgeStatus::Closed);
            info!(order_id = order.id, "All accounts flat, order closed");
            Ok(())
        } else {
            Err(HedgeError::PartialFailure { failures })
        }
    }

    /// Flatten one account's position for the order's symbol, then sweep its
    /// now-orphaned trigger orders (best effort) and update statistics.
    async fn flatten_account(
        &self,
        name: &str,
        order: &HedgeOrder,
        creds: &Credentials,
        price: Decimal,
    ) -> Result<(), HedgeError> {
        let state = self
            .gateway
            .fetch_account_state(creds)
            .await
            .ok_or_else(|| HedgeError::StateUnavailable(name.to_string()))?;

        let Some(position) = state.position(&order.symbol).filter(|p| p.is_open()).cloned()
        else {
            // Nothing to flatten; a no-op close step still succeeds.
            return Ok(());
        };

        let quantity = position.signed_size.abs();
        let request =
            OrderRequest::reduce_only_market(&order.symbol, position.flattening_side(), quantity);
        self.gateway
            .submit_order(creds, &request)
            .await
            .map_err(|e| HedgeError::LegSubmissionFailed {
                account: name.to_string(),
                reason: e.to_string(),
            })?;

        // Best-effort cleanup: the reduce-only fill already succeeded, so a
        // failed sweep must not block the status transition.
        if let Err(e) = self
            .gateway
            .cancel_all_open_orders(creds, &order.symbol)
            .await
        {
            warn!(account = %name, error = %e, "Failed to sweep orphaned triggers");
        }

        let _ = self.gateway.fetch_account_state(creds).await;
        self.registry.record_leg_fill(name, quantity * price).await;

        info!(
            order_id = order.id,
            account = %name,
            %quantity,
            "Position flattened"
        );
        Ok(())
    }

    /// Poll each participant and derive the order's open/flat state.
    pub async fn derived_state(
        &self,
        order: &HedgeOrder,
    ) -> Result<DerivedTradeState, HedgeError> {
        let positions = self.live_positions(order).await?;
        Ok(reconcile(order, &positions, &self.reconcile_settings))
    }

    /// Current live positions per participant for the order's symbol.
    ///
    /// Accounts whose snapshot is unavailable are absent from the map: no
    /// data yet, not flat.
    pub async fn live_positions(
        &self,
        order: &HedgeOrder,
    ) -> Result<HashMap<String, LivePosition>, HedgeError> {
        let creds = self.participant_credentials(order).await?;

        let participants = order.participants();
        let states = join_all(
            participants
                .iter()
                .map(|name| self.gateway.fetch_account_state(&creds[*name])),
        )
        .await;

        let mut positions = HashMap::new();
        for (name, state) in participants.iter().zip(states) {
            if let Some(position) = state.and_then(|s| s.position(&order.symbol).cloned()) {
                positions.insert(name.to_string(), position);
            }
        }
        Ok(positions)
    }

    async fn participant_credentials(
        &self,
        order: &HedgeOrder,
    ) -> Result<HashMap<String, Credentials>, HedgeError> {
        let mut creds = HashMap::new();
        for name in order.participants() {
            creds.insert(name.to_string(), self.registry.credentials(name).await?);
        }
        Ok(creds)
    }

    /// Fetch every participant's snapshot; all must be present to size legs.
    async fn participant_states(
        &self,
        order: &HedgeOrder,
        creds: &HashMap<String, Credentials>,
    ) -> Result<HashMap<String, crate::exchange::AccountState>, HedgeError> {
        let participants = order.participants();
        let fetched = join_all(
            participants
                .iter()
                .map(|name| self.gateway.fetch_account_state(&creds[*name])),
        )
        .await;

        let mut states = HashMap::new();
        for (name, state) in participants.iter().zip(fetched) {
            match state {
                Some(state) => {
                    states.insert(name.to_string(), state);
                }
                None => return Err(HedgeError::StateUnavailable(name.to_string())),
            }
        }
        Ok(states)
    }

    fn acquire_flight(&self, id: u64) -> Result<FlightGuard<'_>, HedgeError> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if !in_flight.insert(id) {
            return Err(HedgeError::AttemptInFlight(id));
        }
        Ok(FlightGuard { owner: self, id })
    }
}

fn positions_for(
    order: &HedgeOrder,
    states: &HashMap<String, crate::exchange::AccountState>,
) -> HashMap<String, LivePosition> {
    order
        .participants()
        .iter()
        .filter_map(|name| {
            states
                .get(*name)
                .and_then(|s| s.position(&order.symbol).cloned())
                .map(|p| (name.to_string(), p))
        })
        .collect()
}

/// Releases the single-flight marker when the attempt finishes, even on an
/// early return.
struct FlightGuard<'a> {
    owner: &'a HedgeOrchestrator,
    id: u64,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.in_flight.lock().unwrap().remove(&self.id);
    }
}

//! Position reconciliation.
//!
//! Answers, from live exchange snapshots alone, whether a hedge trade is
//! open, flat, or ambiguous. Pure and callable on demand; it drives display
//! and eligibility only, while persisted status moves exclusively through
//! explicit orchestrator actions.

use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::config::ReconcileConfig;
use crate::exchange::LivePosition;
use crate::hedge::order::HedgeOrder;

/// Ephemeral view of a hedge trade derived from current positions.
///
/// Never stored; recomputed from live positions each time an order is
/// rendered or acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DerivedTradeState {
    /// Every leg is filled, the sizes net to ~zero, and the fills are close
    /// enough in time to belong to one attempt.
    pub is_fully_open: bool,
    /// No participant carries any exposure on the symbol.
    pub is_fully_flat: bool,
    /// At least one participant carries exposure; blocks a fresh opening
    /// attempt on an order with leftovers.
    pub any_leg_open: bool,
}

/// Derive the trade state of `order` from per-account live positions.
///
/// The venue provides no shared transaction id across accounts, so fills are
/// matched by timestamp proximity (`match_window_ms`). That heuristic can
/// misclassify under clock skew or delayed fills; treat it as a tunable
/// approximation, not a guarantee.
pub fn reconcile(
    order: &HedgeOrder,
    positions: &HashMap<String, LivePosition>,
    settings: &ReconcileConfig,
) -> DerivedTradeState {
    let primary = positions.get(&order.primary_account);
    let hedges: Vec<Option<&LivePosition>> = order
        .hedge_accounts
        .iter()
        .map(|name| positions.get(name))
        .collect();

    let size = |p: Option<&LivePosition>| p.map(|p| p.signed_size).unwrap_or(Decimal::ZERO);
    let primary_size = size(primary);
    let hedge_sizes: Vec<Decimal> = hedges.iter().map(|h| size(*h)).collect();

    let any_leg_open =
        primary_size != Decimal::ZERO || hedge_sizes.iter().any(|s| *s != Decimal::ZERO);
    let is_fully_flat = !any_leg_open;

    let all_filled =
        primary_size != Decimal::ZERO && hedge_sizes.iter().all(|s| *s != Decimal::ZERO);

    let is_fully_open = all_filled && {
        let net: Decimal = primary_size + hedge_sizes.iter().sum::<Decimal>();
        let sizes_match = net.abs() <= settings.size_tolerance;

        // Both hedge legs must oppose the primary, not each other.
        let signs_consistent = match hedge_sizes.as_slice() {
            [a, b] => {
                a.is_sign_positive() == b.is_sign_positive()
                    && a.is_sign_positive() != primary_size.is_sign_positive()
            }
            _ => true,
        };

        let timestamps: Vec<i64> = std::iter::once(primary)
            .chain(hedges.iter().copied())
            .flatten()
            .map(|p| p.update_time)
            .collect();
        let fills_coincide = timestamps.iter().all(|a| {
            timestamps
                .iter()
                .all(|b| (a - b).abs() <= settings.match_window_ms)
        });

        sizes_match && signs_consistent && fills_coincide
    };

    DerivedTradeState {
        is_fully_open,
        is_fully_flat,
        any_leg_open,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn settings() -> ReconcileConfig {
        ReconcileConfig::default()
    }

    fn position(symbol: &str, signed_size: Decimal, update_time: i64) -> LivePosition {
        LivePosition {
            symbol: symbol.to_string(),
            signed_size,
            leverage: 10,
            entry_price: dec!(50000),
            update_time,
            side: None,
            take_profit_price: None,
            stop_loss_price: None,
        }
    }

    fn single_hedge_order() -> HedgeOrder {
        HedgeOrder::draft(
            "BTCUSDT",
            "alpha",
            vec!["bravo".to_string()],
            dec!(2),
            dec!(60),
            dec!(60),
        )
        .unwrap()
    }

    fn two_hedge_order() -> HedgeOrder {
        HedgeOrder::draft(
            "BTCUSDT",
            "alpha",
            vec!["bravo".to_string(), "charlie".to_string()],
            dec!(2),
            dec!(60),
            dec!(60),
        )
        .unwrap()
    }

    #[test]
    fn test_matched_pair_close_in_time_is_open() {
        let order = single_hedge_order();
        let mut positions = HashMap::new();
        positions.insert("alpha".to_string(), position("BTCUSDT", dec!(2.0), 10_000));
        positions.insert("bravo".to_string(), position("BTCUSDT", dec!(-2.0), 10_500));

        let state = reconcile(&order, &positions, &settings());
        assert!(state.is_fully_open);
        assert!(state.any_leg_open);
        assert!(!state.is_fully_flat);
    }

    #[test]
    fn test_matched_pair_far_apart_in_time_is_not_open() {
        let order = single_hedge_order();
        let mut positions = HashMap::new();
        positions.insert("alpha".to_string(), position("BTCUSDT", dec!(2.0), 10_000));
        positions.insert("bravo".to_string(), position("BTCUSDT", dec!(-2.0), 13_000));

        let state = reconcile(&order, &positions, &settings());
        assert!(!state.is_fully_open);
        // Exposure exists either way
        assert!(state.any_leg_open);
    }

    #[test]
    fn test_lone_leg_is_partial() {
        let order = single_hedge_order();
        let mut positions = HashMap::new();
        positions.insert("alpha".to_string(), position("BTCUSDT", dec!(2.0), 10_000));
        positions.insert("bravo".to_string(), position("BTCUSDT", Decimal::ZERO, 10_000));

        let state = reconcile(&order, &positions, &settings());
        assert!(!state.is_fully_open);
        assert!(state.any_leg_open);
        assert!(!state.is_fully_flat);
    }

    #[test]
    fn test_all_flat() {
        let order = single_hedge_order();
        let state = reconcile(&order, &HashMap::new(), &settings());
        assert!(state.is_fully_flat);
        assert!(!state.any_leg_open);
        assert!(!state.is_fully_open);
    }

    #[test]
    fn test_venue_rounding_within_tolerance() {
        let order = single_hedge_order();
        let mut positions = HashMap::new();
        positions.insert("alpha".to_string(), position("BTCUSDT", dec!(2.0), 10_000));
        positions.insert("bravo".to_string(), position("BTCUSDT", dec!(-1.999), 10_100));

        let state = reconcile(&order, &positions, &settings());
        assert!(state.is_fully_open);

        // Past the 0.001 slack the legs no longer match
        positions.insert("bravo".to_string(), position("BTCUSDT", dec!(-1.99), 10_100));
        let state = reconcile(&order, &positions, &settings());
        assert!(!state.is_fully_open);
    }

    #[test]
    fn test_two_hedges_must_share_sign() {
        let order = two_hedge_order();
        let mut positions = HashMap::new();
        positions.insert("alpha".to_string(), position("BTCUSDT", dec!(2.0), 10_000));
        positions.insert("bravo".to_string(), position("BTCUSDT", dec!(-1.0), 10_100));
        positions.insert("charlie".to_string(), position("BTCUSDT", dec!(-1.0), 10_200));

        let state = reconcile(&order, &positions, &settings());
        assert!(state.is_fully_open);

        // Sizes still net to zero, but one hedge flipped long: not a hedge
        positions.insert("bravo".to_string(), position("BTCUSDT", dec!(1.0), 10_100));
        positions.insert("charlie".to_string(), position("BTCUSDT", dec!(-3.0), 10_200));
        let state = reconcile(&order, &positions, &settings());
        assert!(!state.is_fully_open);
        assert!(state.any_leg_open);
    }

    #[test]
    fn test_two_hedges_pairwise_timestamps() {
        let order = two_hedge_order();
        let mut positions = HashMap::new();
        // alpha↔bravo and bravo↔charlie are each inside the window, but
        // alpha↔charlie spans 3.8s: the attempt does not cohere.
        positions.insert("alpha".to_string(), position("BTCUSDT", dec!(2.0), 10_000));
        positions.insert("bravo".to_string(), position("BTCUSDT", dec!(-1.0), 11_900));
        positions.insert("charlie".to_string(), position("BTCUSDT", dec!(-1.0), 13_800));

        let state = reconcile(&order, &positions, &settings());
        assert!(!state.is_fully_open);
    }
}

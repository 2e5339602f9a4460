//! Leg sizing and planning.
//!
//! Turns a hedge order plus each participant's live margin capacity into
//! concrete, validated per-leg order instructions. Pure apart from two random
//! draws (the two-hedge split and the entry-side coin flip), both taken from
//! an injected `Rng` so tests can seed them.

use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::HedgeError;
use crate::exchange::OrderSide;
use crate::hedge::order::HedgeOrder;
use crate::market::SymbolPrecision;
use crate::utils::decimal::trunc_to_dp;

/// Margin capacity of one participating account.
#[derive(Debug, Clone)]
pub struct ParticipantMargin {
    pub account: String,
    pub available_balance: Decimal,
    pub leverage: u32,
}

impl ParticipantMargin {
    /// Largest base-asset size this account could open at the given price.
    pub fn can_open(&self, price: Decimal) -> Decimal {
        self.available_balance * Decimal::from(self.leverage) / price
    }
}

/// One concrete leg to submit: entry plus optional protective triggers.
#[derive(Debug, Clone, PartialEq)]
pub struct LegInstruction {
    pub account: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub take_profit_price: Option<Decimal>,
    pub stop_loss_price: Option<Decimal>,
}

/// Plan the legs of an opening attempt.
///
/// Checks run in order and each is a hard failure: leverage consistency,
/// the margin-safety ceiling (strictly below `min(primary, Σhedge) ×
/// margin_safety`), and each hedge split against its own account's ceiling.
/// The primary's entry side is a fair coin flip so repeated trades show no
/// fixed directional pattern; every hedge takes the opposite side.
///
/// Returns instructions in leg order: primary first, then hedges.
pub fn plan_legs(
    order: &HedgeOrder,
    primary: &ParticipantMargin,
    hedges: &[ParticipantMargin],
    price: Decimal,
    precision: SymbolPrecision,
    margin_safety: Decimal,
    rng: &mut impl Rng,
) -> Result<Vec<LegInstruction>, HedgeError> {
    if price <= Decimal::ZERO {
        return Err(HedgeError::PriceUnavailable(order.symbol.clone()));
    }
    if hedges.len() != order.hedge_accounts.len() {
        return Err(HedgeError::InvalidInput(
            "margin snapshots do not match the order's hedge accounts".into(),
        ));
    }

    // 1. Every participant must trade at identical leverage; TP/SL distances
    //    divide by it, so a mismatch would skew one side's protection.
    let leverage = primary.leverage;
    for hedge in hedges {
        if hedge.leverage != leverage {
            return Err(HedgeError::LeverageMismatch {
                account: hedge.account.clone(),
                expected: leverage,
                actual: hedge.leverage,
            });
        }
    }

    // 2. Global ceiling, scaled by the safety factor: the venue rejects
    //    orders placed at full margin use.
    let primary_can = primary.can_open(price);
    let hedge_can_total: Decimal = hedges.iter().map(|h| h.can_open(price)).sum();
    let ceiling = primary_can.min(hedge_can_total) * margin_safety;
    if order.amount >= ceiling {
        return Err(HedgeError::InsufficientMargin {
            account: None,
            ceiling,
        });
    }

    // 3. Split the hedge size. Two hedges: the first leg takes a random
    //    fraction in [30%, 60%], the remainder goes to the second; each
    //    split must clear its own account's ceiling.
    let splits: Vec<Decimal> = match hedges.len() {
        1 => vec![trunc_to_dp(order.amount, precision.quantity)],
        _ => {
            let fraction = Decimal::new(rng.gen_range(3000..=6000), 4);
            let first = trunc_to_dp(order.amount * fraction, precision.quantity);
            let second = trunc_to_dp(order.amount - first, precision.quantity);
            vec![first, second]
        }
    };
    for (hedge, split) in hedges.iter().zip(&splits) {
        let account_ceiling = hedge.can_open(price) * margin_safety;
        if *split >= account_ceiling {
            return Err(HedgeError::InsufficientMargin {
                account: Some(hedge.account.clone()),
                ceiling: account_ceiling,
            });
        }
    }

    // 4. Entry side by fair coin flip; hedges oppose.
    let primary_side = if rng.gen_bool(0.5) {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    };
    let hedge_side = primary_side.opposite();

    // 5 & 6. Per-leg protective prices, truncated to the symbol's precision.
    let mut legs = Vec::with_capacity(1 + hedges.len());
    legs.push(build_leg(
        &primary.account,
        primary_side,
        trunc_to_dp(order.amount, precision.quantity),
        order,
        price,
        leverage,
        precision,
    ));
    for (hedge, split) in hedges.iter().zip(splits) {
        legs.push(build_leg(
            &hedge.account,
            hedge_side,
            split,
            order,
            price,
            leverage,
            precision,
        ));
    }

    Ok(legs)
}

fn build_leg(
    account: &str,
    side: OrderSide,
    quantity: Decimal,
    order: &HedgeOrder,
    price: Decimal,
    leverage: u32,
    precision: SymbolPrecision,
) -> LegInstruction {
    // TP/SL distances are relative to margin-adjusted movement: the
    // percentage divides by leverage before applying to the entry price.
    let leverage = Decimal::from(leverage);
    let tp_offset = order.take_profit_pct / dec!(100) / leverage;
    let sl_offset = order.stop_loss_pct / dec!(100) / leverage;

    let (tp_raw, sl_raw) = match side {
        OrderSide::Buy => (
            price * (Decimal::ONE + tp_offset),
            price * (Decimal::ONE - sl_offset),
        ),
        OrderSide::Sell => (
            price * (Decimal::ONE - tp_offset),
            price * (Decimal::ONE + sl_offset),
        ),
    };

    LegInstruction {
        account: account.to_string(),
        side,
        quantity,
        take_profit_price: positive_price(tp_raw, precision),
        stop_loss_price: positive_price(sl_raw, precision),
    }
}

/// A non-positive trigger is treated as absent: no protective order.
fn positive_price(raw: Decimal, precision: SymbolPrecision) -> Option<Decimal> {
    (raw > Decimal::ZERO).then(|| trunc_to_dp(raw, precision.price))
}

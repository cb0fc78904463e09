//! Safety envelope applied to every parsed advisor action.
//!
//! The advisor may only reduce risk: stops tighten toward mark, take-profits
//! stay on the profitable side, partial closes leave a tradable remainder.
//! Everything else is rejected before any order is built.

use thiserror::Error;
use vigil_core::{AdvisorAction, PositionSide, PositionTick};

/// Why a proposed action was refused.
#[derive(Debug, Error, PartialEq)]
pub enum Rejection {
    #[error("proposed stop {proposed} loosens the current stop {current}")]
    LoosensStop { proposed: f64, current: f64 },
    #[error("proposed stop {proposed} is not on the protective side of mark {mark}")]
    StopBeyondMark { proposed: f64, mark: f64 },
    #[error("proposed take-profit {proposed} is on the wrong side of mark {mark}")]
    TakeProfitWrongSide { proposed: f64, mark: f64 },
    #[error("fraction {0} outside the open interval (0, 1)")]
    FractionOutOfRange(f64),
    #[error("remaining size {remaining} would fall below the venue minimum {minimum}")]
    RemainderBelowMinimum { remaining: f64, minimum: f64 },
    #[error("non-finite price parameter")]
    NonFinitePrice,
}

/// Validate `action` against the tick it was advised on. `min_order_size` is
/// the venue minimum used by partial-close checks.
pub fn validate(
    action: &AdvisorAction,
    tick: &PositionTick,
    min_order_size: f64,
) -> Result<(), Rejection> {
    match action {
        AdvisorAction::Hold | AdvisorAction::Close => Ok(()),
        AdvisorAction::TightenStop { new_stop_price } => {
            validate_stop(*new_stop_price, tick)
        }
        AdvisorAction::AdjustTakeProfit { new_tp_price } => {
            validate_take_profit(*new_tp_price, tick)
        }
        AdvisorAction::PartialClose {
            fraction_of_position,
        } => validate_partial_close(*fraction_of_position, tick, min_order_size),
    }
}

fn validate_stop(proposed: f64, tick: &PositionTick) -> Result<(), Rejection> {
    if !proposed.is_finite() {
        return Err(Rejection::NonFinitePrice);
    }
    match tick.side {
        PositionSide::Long => {
            if proposed >= tick.mark_price {
                return Err(Rejection::StopBeyondMark {
                    proposed,
                    mark: tick.mark_price,
                });
            }
            if let Some(current) = tick.stop_loss_price {
                if proposed <= current {
                    return Err(Rejection::LoosensStop { proposed, current });
                }
            }
        }
        PositionSide::Short => {
            if proposed <= tick.mark_price {
                return Err(Rejection::StopBeyondMark {
                    proposed,
                    mark: tick.mark_price,
                });
            }
            if let Some(current) = tick.stop_loss_price {
                if proposed >= current {
                    return Err(Rejection::LoosensStop { proposed, current });
                }
            }
        }
    }
    Ok(())
}

fn validate_take_profit(proposed: f64, tick: &PositionTick) -> Result<(), Rejection> {
    if !proposed.is_finite() {
        return Err(Rejection::NonFinitePrice);
    }
    let wrong_side = match tick.side {
        PositionSide::Long => proposed <= tick.mark_price,
        PositionSide::Short => proposed >= tick.mark_price,
    };
    if wrong_side {
        return Err(Rejection::TakeProfitWrongSide {
            proposed,
            mark: tick.mark_price,
        });
    }
    Ok(())
}

fn validate_partial_close(
    fraction: f64,
    tick: &PositionTick,
    min_order_size: f64,
) -> Result<(), Rejection> {
    if !fraction.is_finite() || fraction <= 0.0 || fraction >= 1.0 {
        return Err(Rejection::FractionOutOfRange(fraction));
    }
    let remaining = tick.size * (1.0 - fraction);
    if remaining < min_order_size {
        return Err(Rejection::RemainderBelowMinimum {
            remaining,
            minimum: min_order_size,
        });
    }
    Ok(())
}

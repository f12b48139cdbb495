//! Splitting an event's cost across the participants who still owe a share.
//!
//! Two policies are supported:
//!
//! - **Equal**: every selected, unpaid participant owes the same share. When the
//!   organizer shares the cost they absorb one share themselves without being
//!   charged, so a 60.00 court split with three friends is 15.00 each.
//! - **Custom**: the organizer types an amount per participant and the amounts
//!   must add up to the event cost before anything is requested.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SettlementError;
use crate::roster::Roster;
use crate::schemas::{PaymentRequest, SplitMethod};

/// How free-form amount input is interpreted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum AmountParsing {
    /// Unparseable or negative input becomes zero
    #[default]
    Permissive,
    /// Unparseable or negative input is rejected with `InvalidAmount`
    Strict,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct SplitPolicy {
    /// The organizer implicitly keeps one equal share
    pub organizer_shares_cost: bool,
    /// Tolerance when reconciling custom amounts against the event cost
    pub epsilon: Decimal,
    pub amount_parsing: AmountParsing,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        Self {
            organizer_shares_cost: true,
            epsilon: Decimal::new(1, 2),
            amount_parsing: AmountParsing::Permissive,
        }
    }
}

impl SplitPolicy {
    fn share_count(&self, participants: usize) -> usize {
        if self.organizer_shares_cost {
            participants + 1
        } else {
            participants
        }
    }
}

/// Rounds half away from zero, the way currency is displayed.
pub fn round_to_2_decimals(n: Decimal) -> Decimal {
    let mut rounded = n.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Largest amount accepted wherever money is entered (1,000,000,000.00)
pub fn max_amount() -> Decimal {
    Decimal::new(100_000_000_000, 2)
}

/// Parses a custom amount. Amounts above [`max_amount`] are rejected in both
/// modes; they parse fine but no court costs that much.
pub fn parse_amount(raw: &str, parsing: AmountParsing) -> Result<Decimal, SettlementError> {
    match Decimal::from_str(raw.trim()) {
        Ok(amount) if amount > max_amount() => {
            Err(SettlementError::InvalidAmount(raw.to_string()))
        }
        Ok(amount) if !amount.is_sign_negative() || amount.is_zero() => Ok(amount),
        _ if parsing == AmountParsing::Permissive => Ok(Decimal::ZERO),
        _ => Err(SettlementError::InvalidAmount(raw.to_string())),
    }
}

pub fn check_total_cost(total_cost: Decimal) -> Result<(), SettlementError> {
    if (total_cost.is_sign_negative() && !total_cost.is_zero()) || total_cost > max_amount() {
        return Err(SettlementError::InvalidAmount(total_cost.to_string()));
    }
    Ok(())
}

/// Rewrites every participant's `amount_due` with an equal share.
///
/// Selected, unpaid participants get `total_cost / shares` rounded to cents;
/// everyone else gets zero. The roster is left untouched when nobody
/// qualifies. Returns the share.
pub fn compute_equal_split(
    total_cost: Decimal,
    roster: &mut Roster,
    policy: &SplitPolicy,
) -> Result<Decimal, SettlementError> {
    check_total_cost(total_cost)?;

    let qualifying = roster.selected_unpaid_count();
    if qualifying == 0 {
        return Err(SettlementError::InsufficientParticipants);
    }

    let shares = Decimal::from(policy.share_count(qualifying));
    let share = round_to_2_decimals(total_cost / shares);

    for participant in roster.iter_mut() {
        participant.amount_due = if participant.owes_share() {
            share
        } else {
            Decimal::ZERO
        };
    }

    debug!(%total_cost, qualifying, %share, "equal split computed");
    Ok(share)
}

/// Sets one participant's custom amount, leaving everybody else as is.
///
/// Only selected, unpaid participants can be given an amount.
pub fn set_custom_amount(
    roster: &mut Roster,
    participant_id: &str,
    raw_amount: &str,
    parsing: AmountParsing,
) -> Result<Decimal, SettlementError> {
    let amount = parse_amount(raw_amount, parsing)?;
    let participant = roster.get_mut(participant_id)?;
    if participant.has_paid {
        return Err(SettlementError::AlreadyPaid(participant.id.clone()));
    }
    if !participant.selected {
        return Err(SettlementError::NotSelected(participant.id.clone()));
    }
    participant.amount_due = amount;
    Ok(amount)
}

/// Checks the roster is ready to be charged and returns who pays what.
///
/// Checks run in order and the first failure wins: something must be
/// selected, custom amounts must reconcile with the cost within the policy
/// epsilon, and a custom request must ask for more than zero.
pub fn validate_and_submit(
    total_cost: Decimal,
    roster: &Roster,
    split_method: SplitMethod,
    policy: &SplitPolicy,
) -> Result<Vec<PaymentRequest>, SettlementError> {
    if roster.selected_unpaid_count() == 0 {
        return Err(SettlementError::NoParticipantsSelected);
    }

    if split_method == SplitMethod::Custom {
        let requested = roster.requested_total()?;
        let delta = total_cost
            .checked_sub(requested)
            .ok_or_else(|| SettlementError::InvalidAmount(requested.to_string()))?;
        if delta.abs() > policy.epsilon {
            return Err(SettlementError::SplitMismatch {
                requested,
                expected: total_cost,
                delta,
            });
        }
        if requested <= Decimal::ZERO {
            return Err(SettlementError::ZeroAmountRequested);
        }
    }

    Ok(roster
        .selected_unpaid()
        .map(|p| PaymentRequest {
            participant: p.id.clone(),
            amount: p.amount_due,
        })
        .collect())
}

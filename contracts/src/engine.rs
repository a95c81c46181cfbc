//! # Transition Engine
//!
//! The whole claim state machine in one table. [`evaluate`] takes the current
//! record, the requested [`Action`] and the call environment, and returns
//! either a [`Transition`] (next state, custody movements, notification) or
//! the first rule the call violates. It never touches storage or custody;
//! the handler commits a transition only after it comes back `Ok`.
//!
//! ## Transition Table
//!
//! | From                   | Action    | Caller        | Gate            | To                               |
//! |------------------------|-----------|---------------|-----------------|----------------------------------|
//! | `Null`                 | `create`  | anyone        | stake ≥ minimum | `AwaitingAcceptance`             |
//! | `AwaitingAcceptance`   | `accept`  | not requester | stake matched   | `AwaitingResolution`             |
//! | `AwaitingAcceptance`   | `close`   | requester     | ≥ 72h           | `ClosedAfterAcceptanceExpired`   |
//! | `AwaitingResolution`   | `resolve` | respondent    | none            | `AwaitingConfirmation`           |
//! | `AwaitingResolution`   | `close`   | requester     | ≥ 72h           | `ClosedAfterResolutionExpired`   |
//! | `AwaitingConfirmation` | `close`   | requester     | < 24h           | `Closed`                         |
//! | `AwaitingConfirmation` | `close`   | requester     | ≥ 24h           | `ClosedAfterConfirmationExpired` |
//!
//! All windows are measured from the claim's `modified` time.
//!
//! ## Check Order
//!
//! Time regression, then the reserved addresses (zero and custody), then
//! role and state, then timing, then stake amounts. `close` checks the
//! caller before the state, so a non-requester gets `Unauthorized` no matter
//! where the claim is. `accept` and `resolve` check the state first: the respondent role does not exist
//! until a claim has been accepted.

use tribune_protocol::config::{acceptance_window, confirmation_window, resolution_window};
use tribune_protocol::{Address, Amount, Timestamp};

use crate::claim::{Claim, ClaimIdx, ClaimState};
use crate::error::ClaimError;
use crate::escrow::{EscrowError, Movement};
use crate::events::ClaimEvent;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// A requested claim action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a claim, staking `amount`.
    Create {
        /// Exact stake to pull from the requester.
        amount: Amount,
    },
    /// Match the requester's stake and become the respondent.
    Accept,
    /// Answer the claim and reclaim the respondent's stake.
    Resolve {
        /// Free-text resolution.
        resolution_note: String,
    },
    /// Close the claim (requester only).
    Close,
}

impl Action {
    /// Lowercase action name for errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Create { .. } => "create",
            Action::Accept => "accept",
            Action::Resolve { .. } => "resolve",
            Action::Close => "close",
        }
    }
}

/// Everything about the call that is not the claim itself.
#[derive(Debug, Clone, Copy)]
pub struct Env {
    /// Address making the call.
    pub caller: Address,
    /// Ledger time supplied with the call.
    pub now: Timestamp,
    /// Current minimum stake.
    pub min_stake: Amount,
    /// How much `caller` has authorized custody to pull.
    pub authorized: Amount,
    /// The handler's custody address. Never a valid party.
    pub custody: Address,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Whose stake field a custody movement changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Requester,
    Respondent,
}

/// A custody movement attributed to one side of the claim.
///
/// The attribution decides which stake field changes. It is not necessarily
/// who receives the tokens: a forfeited respondent stake is attributed to the
/// respondent but paid to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowEffect {
    pub party: Party,
    pub movement: Movement,
}

impl EscrowEffect {
    fn stake(party: Party, from: Address, amount: Amount) -> Self {
        Self {
            party,
            movement: Movement::Stake { from, amount },
        }
    }

    fn release(party: Party, to: Address, amount: Amount) -> Self {
        Self {
            party,
            movement: Movement::Release { to, amount },
        }
    }
}

/// A fully validated state change, ready to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State the claim moves into.
    pub next: ClaimState,
    /// Custody movements, in execution order.
    pub effects: Vec<EscrowEffect>,
    /// Set on `accept`: the new respondent.
    pub respondent: Option<Address>,
    /// Set on `resolve`.
    pub resolution_note: Option<String>,
    /// Notification to emit once committed.
    pub event: ClaimEvent,
}

impl Transition {
    /// Custody movements in execution order.
    pub fn movements(&self) -> impl Iterator<Item = &Movement> {
        self.effects.iter().map(|effect| &effect.movement)
    }

    /// Writes the transition into `claim`: state, time, parties, stakes.
    ///
    /// # Errors
    ///
    /// Only on stake-field arithmetic failure, which a transition produced by
    /// [`evaluate`] for the same claim cannot trigger.
    pub fn apply(&self, claim: &mut Claim, now: Timestamp) -> Result<(), ClaimError> {
        for effect in &self.effects {
            let field = match effect.party {
                Party::Requester => &mut claim.requester_staked,
                Party::Respondent => &mut claim.respondent_staked,
            };
            *field = match effect.movement {
                Movement::Stake { amount, .. } => field
                    .checked_add(amount)
                    .ok_or(EscrowError::AmountOverflow)?,
                Movement::Release { amount, .. } => {
                    field
                        .checked_sub(amount)
                        .ok_or(EscrowError::CustodyShortfall {
                            held: *field,
                            requested: amount,
                        })?
                }
            };
        }

        if let Some(respondent) = self.respondent {
            claim.respondent_address = Some(respondent);
        }
        if let Some(note) = &self.resolution_note {
            claim.resolution_note = note.clone();
        }
        claim.state = self.next;
        claim.modified = now;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Validates `action` against `claim` and computes its effects.
///
/// For `create`, `claim` is the draft record in state [`ClaimState::Null`]
/// and `claim_idx` is the id it will receive.
///
/// # Errors
///
/// The first violated rule, in the order described in the module docs.
pub fn evaluate(
    claim_idx: ClaimIdx,
    claim: &Claim,
    action: &Action,
    env: &Env,
) -> Result<Transition, ClaimError> {
    if env.now < claim.modified {
        return Err(ClaimError::TimestampRegression {
            modified: claim.modified,
            now: env.now,
        });
    }
    if env.caller.is_zero() || env.caller == env.custody {
        return Err(ClaimError::Unauthorized { caller: env.caller });
    }

    let mut respondent = None;
    let mut resolution_note = None;

    let (next, effects) = match (claim.state, action) {
        (ClaimState::Null, Action::Create { amount }) => {
            if *amount < env.min_stake {
                return Err(ClaimError::StakeBelowMinimum {
                    amount: *amount,
                    minimum: env.min_stake,
                });
            }
            (
                ClaimState::AwaitingAcceptance,
                vec![EscrowEffect::stake(Party::Requester, env.caller, *amount)],
            )
        }

        (_, Action::Close) => close(claim, env)?,

        (ClaimState::AwaitingAcceptance, Action::Accept) => {
            if env.caller == claim.requester_address {
                return Err(ClaimError::Unauthorized { caller: env.caller });
            }
            if env.authorized < claim.requester_staked {
                return Err(ClaimError::StakeMismatch {
                    required: claim.requester_staked,
                    authorized: env.authorized,
                });
            }
            respondent = Some(env.caller);
            (
                ClaimState::AwaitingResolution,
                vec![EscrowEffect::stake(
                    Party::Respondent,
                    env.caller,
                    claim.requester_staked,
                )],
            )
        }

        (ClaimState::AwaitingResolution, Action::Resolve { resolution_note: note }) => {
            if claim.respondent_address != Some(env.caller) {
                return Err(ClaimError::Unauthorized { caller: env.caller });
            }
            resolution_note = Some(note.clone());
            (
                ClaimState::AwaitingConfirmation,
                vec![EscrowEffect::release(
                    Party::Respondent,
                    env.caller,
                    claim.respondent_staked,
                )],
            )
        }

        (current, action) => {
            return Err(ClaimError::InvalidState {
                current,
                action: action.name(),
            })
        }
    };

    let event = ClaimEvent::for_transition(next, claim.deal_id, claim_idx).ok_or(
        ClaimError::InvalidState {
            current: claim.state,
            action: action.name(),
        },
    )?;

    Ok(Transition {
        next,
        effects,
        respondent,
        resolution_note,
        event,
    })
}

/// The three `close` rows of the table.
fn close(claim: &Claim, env: &Env) -> Result<(ClaimState, Vec<EscrowEffect>), ClaimError> {
    if env.caller != claim.requester_address {
        return Err(ClaimError::Unauthorized { caller: env.caller });
    }

    let requester = claim.requester_address;
    let refund = EscrowEffect::release(Party::Requester, requester, claim.requester_staked);

    match claim.state {
        ClaimState::AwaitingAcceptance => {
            gate(claim.modified, acceptance_window(), env.now)?;
            Ok((ClaimState::ClosedAfterAcceptanceExpired, vec![refund]))
        }
        ClaimState::AwaitingResolution => {
            gate(claim.modified, resolution_window(), env.now)?;
            // The respondent never resolved; their stake goes to the requester.
            let forfeit =
                EscrowEffect::release(Party::Respondent, requester, claim.respondent_staked);
            Ok((ClaimState::ClosedAfterResolutionExpired, vec![refund, forfeit]))
        }
        ClaimState::AwaitingConfirmation => {
            let next = if env.now - claim.modified < confirmation_window() {
                ClaimState::Closed
            } else {
                ClaimState::ClosedAfterConfirmationExpired
            };
            Ok((next, vec![refund]))
        }
        current => Err(ClaimError::InvalidState {
            current,
            action: "close",
        }),
    }
}

fn gate(modified: Timestamp, window: chrono::Duration, now: Timestamp) -> Result<(), ClaimError> {
    let available_at = modified
        .checked_add_signed(window)
        .ok_or(ClaimError::WindowOverflow { modified })?;
    if now < available_at {
        return Err(ClaimError::TooEarly { available_at });
    }
    Ok(())
}

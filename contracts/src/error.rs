//! Errors surfaced by the claim handler's public operations.
//!
//! Every variant aborts the whole call: no state, custody or event changes
//! survive a returned error.

use thiserror::Error;
use tribune_protocol::{Address, Amount, Timestamp};

use crate::claim::{ClaimIdx, ClaimState};
use crate::escrow::EscrowError;

/// Errors returned by [`ClaimHandler`](crate::handler::ClaimHandler) operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// The caller does not hold the role this action requires.
    #[error("unauthorized: {caller} may not perform this action")]
    Unauthorized {
        /// The rejected caller.
        caller: Address,
    },

    /// The action is not defined from the claim's current state.
    #[error("invalid state: cannot {action} a claim in state {current}")]
    InvalidState {
        /// State the claim is in.
        current: ClaimState,
        /// The attempted action.
        action: &'static str,
    },

    /// The action's timing gate has not opened yet.
    #[error("too early: action becomes available at {available_at}")]
    TooEarly {
        /// Earliest ledger time at which the call can succeed.
        available_at: Timestamp,
    },

    /// The respondent has not authorized enough to match the requester's stake.
    #[error("stake mismatch: requester staked {required}, respondent authorized {authorized}")]
    StakeMismatch {
        /// Amount the respondent must stake.
        required: Amount,
        /// Amount the respondent authorized for custody.
        authorized: Amount,
    },

    /// The requested stake is below the current minimum.
    #[error("stake below minimum: {amount} < {minimum}")]
    StakeBelowMinimum {
        /// Stake offered.
        amount: Amount,
        /// Current minimum.
        minimum: Amount,
    },

    /// No claim with this identifier exists.
    #[error("claim {id} not found ({count} claims exist)")]
    NotFound {
        /// Requested identifier.
        id: ClaimIdx,
        /// Number of claims ever created.
        count: u64,
    },

    /// The environment supplied a time earlier than the claim's last transition.
    #[error("timestamp regression: claim modified at {modified}, call at {now}")]
    TimestampRegression {
        /// Time of the claim's last transition.
        modified: Timestamp,
        /// Time supplied with the call.
        now: Timestamp,
    },

    /// The claim's timing window ends past the latest representable time, so
    /// the gated action can never become available.
    #[error("window overflow: no window can open after {modified}")]
    WindowOverflow {
        /// Time of the claim's last transition.
        modified: Timestamp,
    },

    /// A custody transfer could not be funded.
    #[error(transparent)]
    Escrow(#[from] EscrowError),
}

impl ClaimError {
    /// Short machine-friendly label, used for metrics and log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            ClaimError::Unauthorized { .. } => "unauthorized",
            ClaimError::InvalidState { .. } => "invalid_state",
            ClaimError::TooEarly { .. } => "too_early",
            ClaimError::StakeMismatch { .. } => "stake_mismatch",
            ClaimError::StakeBelowMinimum { .. } => "stake_below_minimum",
            ClaimError::NotFound { .. } => "not_found",
            ClaimError::TimestampRegression { .. } => "timestamp_regression",
            ClaimError::WindowOverflow { .. } => "window_overflow",
            ClaimError::Escrow(EscrowError::InsufficientAuthorization { .. }) => {
                "insufficient_authorization"
            }
            ClaimError::Escrow(EscrowError::InsufficientFunds { .. }) => "insufficient_funds",
            ClaimError::Escrow(EscrowError::CustodyShortfall { .. }) => "custody_shortfall",
            ClaimError::Escrow(EscrowError::AmountOverflow) => "amount_overflow",
            ClaimError::Escrow(EscrowError::Ledger(_)) => "ledger",
        }
    }
}

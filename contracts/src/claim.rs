//! # Claim Record
//!
//! One [`Claim`] per dispute. The record is created by `create`, mutated only
//! by the transition engine, and frozen forever once it reaches a `Closed*`
//! state. Nothing ever deletes a claim; closed records stay for audit.

use serde::{Deserialize, Serialize};
use tribune_protocol::{Address, Amount, Timestamp};

/// Sequential claim identifier, starting at zero.
pub type ClaimIdx = u64;

/// Lifecycle state of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClaimState {
    /// No claim at this slot yet. Only ever seen by `create`.
    Null,
    /// Created and staked by the requester; waiting for a respondent.
    AwaitingAcceptance,
    /// Both sides staked; waiting for the respondent to resolve.
    AwaitingResolution,
    /// Respondent resolved; waiting for the requester to confirm.
    AwaitingConfirmation,
    /// Requester closed after nobody accepted within the window.
    ClosedAfterAcceptanceExpired,
    /// Requester closed after the respondent failed to resolve in time.
    ClosedAfterResolutionExpired,
    /// Requester closed after the confirmation window lapsed.
    ClosedAfterConfirmationExpired,
    /// Requester confirmed the resolution within the window.
    Closed,
}

impl ClaimState {
    /// Whether no further transition is defined from this state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ClaimState::ClosedAfterAcceptanceExpired
                | ClaimState::ClosedAfterResolutionExpired
                | ClaimState::ClosedAfterConfirmationExpired
                | ClaimState::Closed
        )
    }
}

impl std::fmt::Display for ClaimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimState::Null => write!(f, "Null"),
            ClaimState::AwaitingAcceptance => write!(f, "AwaitingAcceptance"),
            ClaimState::AwaitingResolution => write!(f, "AwaitingResolution"),
            ClaimState::AwaitingConfirmation => write!(f, "AwaitingConfirmation"),
            ClaimState::ClosedAfterAcceptanceExpired => write!(f, "ClosedAfterAcceptanceExpired"),
            ClaimState::ClosedAfterResolutionExpired => write!(f, "ClosedAfterResolutionExpired"),
            ClaimState::ClosedAfterConfirmationExpired => {
                write!(f, "ClosedAfterConfirmationExpired")
            }
            ClaimState::Closed => write!(f, "Closed"),
        }
    }
}

/// A single dispute between a requester and a respondent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Current lifecycle state.
    pub state: ClaimState,
    /// Ledger time of the last transition.
    pub modified: Timestamp,
    /// External identifier of the deal under dispute.
    pub deal_id: u64,
    /// Requester's stated reason for opening the claim.
    pub reason_note: String,
    /// Requester's application-level identity.
    pub requester_id: String,
    /// Address the requester staked from and is refunded to.
    pub requester_address: Address,
    /// Requester's stake currently held in custody.
    pub requester_staked: Amount,
    /// Respondent's application-level identity.
    pub respondent_id: String,
    /// Address the respondent staked from. `None` until accepted.
    pub respondent_address: Option<Address>,
    /// Respondent's stake currently held in custody.
    pub respondent_staked: Amount,
    /// Respondent's resolution text. Empty until resolved.
    pub resolution_note: String,
}

impl Claim {
    /// Custody currently attributable to this claim.
    pub fn staked_total(&self) -> Amount {
        self.requester_staked.saturating_add(self.respondent_staked)
    }

    /// Shorthand for `self.state.is_terminal()`.
    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }
}

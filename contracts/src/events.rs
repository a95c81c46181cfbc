//! # Claim Notifications
//!
//! One [`ClaimEvent`] per successful call. Each event carries enough to let
//! an observer follow a claim's lifecycle without reading storage: the deal
//! it belongs to, the claim index, and (through the variant) the state the
//! claim moved into.
//!
//! Failed calls never emit.

use serde::{Deserialize, Serialize};
use tribune_protocol::Amount;

use crate::claim::{ClaimIdx, ClaimState};

/// A notification emitted by a committed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClaimEvent {
    /// A claim was opened and the requester's stake pulled into custody.
    ClaimCreated { deal_id: u64, claim_idx: ClaimIdx },
    /// A respondent matched the requester's stake.
    ClaimAccepted { deal_id: u64, claim_idx: ClaimIdx },
    /// The respondent resolved and got their stake back.
    ClaimResolved { deal_id: u64, claim_idx: ClaimIdx },
    /// The requester confirmed within the confirmation window.
    ClaimClosed { deal_id: u64, claim_idx: ClaimIdx },
    /// Closed because nobody accepted in time.
    ClaimClosedAfterAcceptanceExpired { deal_id: u64, claim_idx: ClaimIdx },
    /// Closed because the respondent did not resolve in time.
    ClaimClosedAfterResolutionExpired { deal_id: u64, claim_idx: ClaimIdx },
    /// Closed after the confirmation window lapsed.
    ClaimClosedAfterConfirmationExpired { deal_id: u64, claim_idx: ClaimIdx },
    /// The global minimum stake changed.
    MinStakeUpdated { previous: Amount, new: Amount },
}

impl ClaimEvent {
    /// The event for a claim entering `state`, if entering it emits one.
    pub fn for_transition(state: ClaimState, deal_id: u64, claim_idx: ClaimIdx) -> Option<Self> {
        let event = match state {
            ClaimState::Null => return None,
            ClaimState::AwaitingAcceptance => ClaimEvent::ClaimCreated { deal_id, claim_idx },
            ClaimState::AwaitingResolution => ClaimEvent::ClaimAccepted { deal_id, claim_idx },
            ClaimState::AwaitingConfirmation => ClaimEvent::ClaimResolved { deal_id, claim_idx },
            ClaimState::Closed => ClaimEvent::ClaimClosed { deal_id, claim_idx },
            ClaimState::ClosedAfterAcceptanceExpired => {
                ClaimEvent::ClaimClosedAfterAcceptanceExpired { deal_id, claim_idx }
            }
            ClaimState::ClosedAfterResolutionExpired => {
                ClaimEvent::ClaimClosedAfterResolutionExpired { deal_id, claim_idx }
            }
            ClaimState::ClosedAfterConfirmationExpired => {
                ClaimEvent::ClaimClosedAfterConfirmationExpired { deal_id, claim_idx }
            }
        };
        Some(event)
    }

    /// Variant name, used as a metrics label.
    pub fn name(&self) -> &'static str {
        match self {
            ClaimEvent::ClaimCreated { .. } => "ClaimCreated",
            ClaimEvent::ClaimAccepted { .. } => "ClaimAccepted",
            ClaimEvent::ClaimResolved { .. } => "ClaimResolved",
            ClaimEvent::ClaimClosed { .. } => "ClaimClosed",
            ClaimEvent::ClaimClosedAfterAcceptanceExpired { .. } => {
                "ClaimClosedAfterAcceptanceExpired"
            }
            ClaimEvent::ClaimClosedAfterResolutionExpired { .. } => {
                "ClaimClosedAfterResolutionExpired"
            }
            ClaimEvent::ClaimClosedAfterConfirmationExpired { .. } => {
                "ClaimClosedAfterConfirmationExpired"
            }
            ClaimEvent::MinStakeUpdated { .. } => "MinStakeUpdated",
        }
    }

    /// The claim this event concerns, if any.
    pub fn claim_idx(&self) -> Option<ClaimIdx> {
        match *self {
            ClaimEvent::ClaimCreated { claim_idx, .. }
            | ClaimEvent::ClaimAccepted { claim_idx, .. }
            | ClaimEvent::ClaimResolved { claim_idx, .. }
            | ClaimEvent::ClaimClosed { claim_idx, .. }
            | ClaimEvent::ClaimClosedAfterAcceptanceExpired { claim_idx, .. }
            | ClaimEvent::ClaimClosedAfterResolutionExpired { claim_idx, .. }
            | ClaimEvent::ClaimClosedAfterConfirmationExpired { claim_idx, .. } => Some(claim_idx),
            ClaimEvent::MinStakeUpdated { .. } => None,
        }
    }
}

/// Ordered log of emitted events.
///
/// The log grows until [`drain`](Self::drain) is called. Hosts that stream
/// events elsewhere (the node's WebSocket feed) drain after every call.
#[derive(Debug, Clone, Default)]
pub struct EventNotifier {
    pending: Vec<ClaimEvent>,
}

impl EventNotifier {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event` and logs it.
    pub fn emit(&mut self, event: ClaimEvent) {
        tracing::info!(event = event.name(), claim_idx = ?event.claim_idx(), "event emitted");
        self.pending.push(event);
    }

    /// Events emitted since the last drain, oldest first.
    pub fn events(&self) -> &[ClaimEvent] {
        &self.pending
    }

    /// Removes and returns all pending events.
    pub fn drain(&mut self) -> Vec<ClaimEvent> {
        std::mem::take(&mut self.pending)
    }
}

//! # Claim Handler
//!
//! The public face of the claim system. Every write follows the same path:
//!
//! 1. Look the claim up (or draft a new one for `create`).
//! 2. Ask the [engine](crate::engine) whether the call is legal and what it
//!    moves.
//! 3. Preflight the whole custody batch.
//! 4. Write the new claim record.
//! 5. Execute the custody movements. On failure, put the old record back.
//! 6. Emit the notification.
//!
//! Writes take `&mut self`, so no other call (and no callback out of the
//! token ledger) can observe or touch the handler between steps 4 and 6.
//! A returned error means none of the steps left a trace.

use serde::{Deserialize, Serialize};
use tribune_protocol::access::AccessControl;
use tribune_protocol::token::TokenLedger;
use tribune_protocol::{Address, Amount, Timestamp};

use crate::admin::AdminConfig;
use crate::claim::{Claim, ClaimIdx, ClaimState};
use crate::engine::{self, Action, Env};
use crate::error::ClaimError;
use crate::escrow::EscrowManager;
use crate::events::{ClaimEvent, EventNotifier};
use crate::registry::ClaimRegistry;

/// Parameters of a new claim. The requester is always the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewClaim {
    /// External identifier of the deal under dispute.
    pub deal_id: u64,
    /// Why the requester is opening the claim.
    pub reason_note: String,
    /// Requester's application-level identity.
    pub requester_id: String,
    /// Respondent's application-level identity.
    pub respondent_id: String,
    /// Exact stake to pull from the requester.
    pub amount: Amount,
}

enum Target {
    New(Claim),
    Existing(ClaimIdx),
}

/// Stake-backed claim state machine over a token ledger `T` and an
/// administrator registry `A`.
#[derive(Debug, Clone)]
pub struct ClaimHandler<T, A> {
    escrow: EscrowManager<T>,
    access: A,
    config: AdminConfig,
    registry: ClaimRegistry,
    notifier: EventNotifier,
}

impl<T: TokenLedger, A: AccessControl> ClaimHandler<T, A> {
    /// A handler with no claims, custody at `custody`.
    pub fn new(token: T, access: A, custody: Address, min_stake: Amount) -> Self {
        Self {
            escrow: EscrowManager::new(token, custody),
            access,
            config: AdminConfig::new(min_stake),
            registry: ClaimRegistry::new(),
            notifier: EventNotifier::new(),
        }
    }

    /// Reassembles a handler from previously persisted parts. The event log
    /// starts empty.
    pub fn from_parts(
        escrow: EscrowManager<T>,
        access: A,
        config: AdminConfig,
        registry: ClaimRegistry,
    ) -> Self {
        Self {
            escrow,
            access,
            config,
            registry,
            notifier: EventNotifier::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Opens a claim with the caller as requester and pulls its stake.
    ///
    /// # Errors
    ///
    /// [`ClaimError::StakeBelowMinimum`] if `amount` is under the current
    /// minimum, or an escrow error if the stake cannot be pulled.
    pub fn create(
        &mut self,
        caller: Address,
        now: Timestamp,
        new: NewClaim,
    ) -> Result<ClaimIdx, ClaimError> {
        let action = Action::Create { amount: new.amount };
        let draft = Claim {
            state: ClaimState::Null,
            modified: now,
            deal_id: new.deal_id,
            reason_note: new.reason_note,
            requester_id: new.requester_id,
            requester_address: caller,
            requester_staked: 0,
            respondent_id: new.respondent_id,
            respondent_address: None,
            respondent_staked: 0,
            resolution_note: String::new(),
        };
        self.execute(Target::New(draft), &action, caller, now)
    }

    /// Accepts claim `id`, staking the same amount as the requester.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, `Unauthorized` (the requester cannot
    /// accept their own claim), `StakeMismatch`, or an escrow error.
    pub fn accept(
        &mut self,
        caller: Address,
        now: Timestamp,
        id: ClaimIdx,
    ) -> Result<(), ClaimError> {
        self.execute(Target::Existing(id), &Action::Accept, caller, now)
            .map(drop)
    }

    /// Resolves claim `id` and returns the respondent's stake.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, or `Unauthorized` for anyone but the
    /// respondent.
    pub fn resolve(
        &mut self,
        caller: Address,
        now: Timestamp,
        id: ClaimIdx,
        resolution_note: String,
    ) -> Result<(), ClaimError> {
        let action = Action::Resolve { resolution_note };
        self.execute(Target::Existing(id), &action, caller, now)
            .map(drop)
    }

    /// Closes claim `id`. Requester only; the outcome depends on the state
    /// and on how long the claim has sat in it.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Unauthorized`, `InvalidState` on a closed claim, or
    /// `TooEarly` while an expiry window is still open.
    pub fn close(&mut self, caller: Address, now: Timestamp, id: ClaimIdx) -> Result<(), ClaimError> {
        self.execute(Target::Existing(id), &Action::Close, caller, now)
            .map(drop)
    }

    /// Sets the minimum stake for future claims.
    ///
    /// # Errors
    ///
    /// [`ClaimError::Unauthorized`] unless `caller` is an administrator.
    pub fn set_min_stake(&mut self, caller: Address, amount: Amount) -> Result<(), ClaimError> {
        match self.config.set_min_stake(&self.access, caller, amount) {
            Ok(event) => {
                tracing::info!(%caller, min_stake = amount, "minimum stake updated");
                self.notifier.emit(event);
                Ok(())
            }
            Err(err) => {
                tracing::debug!(%caller, reason = err.reason(), "set_min_stake rejected");
                Err(err)
            }
        }
    }

    fn execute(
        &mut self,
        target: Target,
        action: &Action,
        caller: Address,
        now: Timestamp,
    ) -> Result<ClaimIdx, ClaimError> {
        let result = self.try_execute(target, action, caller, now);
        if let Err(err) = &result {
            tracing::debug!(
                action = action.name(),
                %caller,
                reason = err.reason(),
                error = %err,
                "claim call rejected"
            );
        }
        result
    }

    fn try_execute(
        &mut self,
        target: Target,
        action: &Action,
        caller: Address,
        now: Timestamp,
    ) -> Result<ClaimIdx, ClaimError> {
        let (claim_idx, before) = match target {
            Target::New(draft) => (self.registry.next_idx(), draft),
            Target::Existing(id) => (id, self.registry.get(id)?.clone()),
        };

        let env = Env {
            caller,
            now,
            min_stake: self.config.min_stake(),
            authorized: self.escrow.authorized(caller),
            custody: self.escrow.custody(),
        };
        let transition = engine::evaluate(claim_idx, &before, action, &env)?;
        self.escrow.preflight(transition.movements())?;

        let mut after = before.clone();
        transition.apply(&mut after, now)?;

        let is_new = before.state == ClaimState::Null;
        if is_new {
            self.registry.push(after);
        } else {
            *self.registry.get_mut(claim_idx)? = after;
        }

        if let Err(err) = self.escrow.apply_all(transition.movements()) {
            if is_new {
                self.registry.rollback_push(claim_idx);
            } else {
                *self.registry.get_mut(claim_idx)? = before;
            }
            return Err(err.into());
        }

        tracing::info!(
            claim_idx,
            deal_id = before.deal_id,
            from = %before.state,
            to = %transition.next,
            %caller,
            held = self.escrow.held(),
            "claim transition committed"
        );
        self.notifier.emit(transition.event);
        Ok(claim_idx)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Number of claims ever created.
    pub fn claims_count(&self) -> u64 {
        self.registry.count()
    }

    /// Current record of claim `id`.
    ///
    /// # Errors
    ///
    /// [`ClaimError::NotFound`] if `id` was never assigned.
    pub fn claim(&self, id: ClaimIdx) -> Result<&Claim, ClaimError> {
        self.registry.get(id)
    }

    /// All claims in creation order.
    pub fn claims(&self) -> impl Iterator<Item = (ClaimIdx, &Claim)> {
        self.registry.iter()
    }

    pub fn min_stake(&self) -> Amount {
        self.config.min_stake()
    }

    pub fn custody(&self) -> Address {
        self.escrow.custody()
    }

    /// Total stake held on behalf of open claims.
    pub fn custody_held(&self) -> Amount {
        self.escrow.held()
    }

    /// Custody state, including the token ledger it moves funds on.
    pub fn escrow(&self) -> &EscrowManager<T> {
        &self.escrow
    }

    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    pub fn token(&self) -> &T {
        self.escrow.token()
    }

    /// Mutable ledger access for operations outside the claim lifecycle
    /// (approvals, minting). Never use it to move custody funds.
    pub fn token_mut(&mut self) -> &mut T {
        self.escrow.token_mut()
    }

    pub fn access(&self) -> &A {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut A {
        &mut self.access
    }

    /// Events emitted since the last drain.
    pub fn events(&self) -> &[ClaimEvent] {
        self.notifier.events()
    }

    /// Removes and returns pending events, oldest first.
    pub fn drain_events(&mut self) -> Vec<ClaimEvent> {
        self.notifier.drain()
    }
}

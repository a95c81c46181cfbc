//! # Escrow Manager
//!
//! Moves stakes between a party's token balance and the handler's custody
//! address. This is a pure ledger-movement primitive: it knows nothing about
//! claim states and never looks at one. The transition engine decides *what*
//! moves; this module makes sure it actually can, and then moves it.
//!
//! ## Custody Accounting
//!
//! `held` is the sum of every stake pulled in minus every payout pushed out.
//! It must always be covered by the custody address's real token balance.
//! Tokens sent to the custody address by mistake raise the balance but not
//! `held`, so they can never be paid out as somebody's stake.
//!
//! ## Atomicity
//!
//! A transition may move more than one amount (a forced close after the
//! resolution window pays out both stakes). [`EscrowManager::preflight`]
//! validates the whole batch against current balances and allowances before
//! the first transfer is issued. [`EscrowManager::apply_all`] then executes
//! it and reverses the completed part if the ledger still refuses a transfer.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tribune_protocol::token::{TokenError, TokenLedger};
use tribune_protocol::{Address, Amount};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while moving stakes in or out of custody.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EscrowError {
    /// The paying party has not authorized custody to pull enough.
    #[error("insufficient authorization: {party} authorized {authorized}, stake requires {required}")]
    InsufficientAuthorization {
        /// Party whose tokens would be pulled.
        party: Address,
        /// Current allowance toward custody.
        authorized: Amount,
        /// Amount required.
        required: Amount,
    },

    /// The paying party's balance is short.
    #[error("insufficient funds: {party} holds {balance}, stake requires {required}")]
    InsufficientFunds {
        /// Party whose tokens would be pulled.
        party: Address,
        /// Current balance.
        balance: Amount,
        /// Amount required.
        required: Amount,
    },

    /// Custody does not cover a payout. Indicates broken accounting.
    #[error("custody shortfall: holding {held}, payout requires {requested}")]
    CustodyShortfall {
        /// Amount currently attributable to claims.
        held: Amount,
        /// Amount the payout needed.
        requested: Amount,
    },

    /// Custody accounting would overflow.
    #[error("custody amount overflow")]
    AmountOverflow,

    /// The token ledger rejected a transfer that passed preflight.
    #[error("token ledger rejected transfer: {0}")]
    Ledger(#[from] TokenError),
}

// ---------------------------------------------------------------------------
// Movements
// ---------------------------------------------------------------------------

/// A single custody transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Movement {
    /// Pull exactly `amount` from `from` into custody.
    Stake {
        /// Paying party.
        from: Address,
        /// Exact amount.
        amount: Amount,
    },
    /// Push `amount` out of custody to `to`.
    Release {
        /// Receiving party.
        to: Address,
        /// Exact amount.
        amount: Amount,
    },
}

// ---------------------------------------------------------------------------
// EscrowManager
// ---------------------------------------------------------------------------

/// Custody ledger bound to one token and one custody address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowManager<T> {
    token: T,
    custody: Address,
    held: Amount,
}

impl<T: TokenLedger> EscrowManager<T> {
    /// Binds custody to `custody` on `token`, holding nothing yet.
    pub fn new(token: T, custody: Address) -> Self {
        Self {
            token,
            custody,
            held: 0,
        }
    }

    /// The custody address stakes are pulled into.
    pub fn custody(&self) -> Address {
        self.custody
    }

    /// Sum of all stakes currently held on behalf of claims.
    pub fn held(&self) -> Amount {
        self.held
    }

    /// Read access to the underlying token ledger.
    pub fn token(&self) -> &T {
        &self.token
    }

    /// Mutable access to the underlying token ledger, for the ledger's own
    /// operations (approvals, minting) that happen outside any claim call.
    pub fn token_mut(&mut self) -> &mut T {
        &mut self.token
    }

    /// Amount `party` has authorized custody to pull.
    pub fn authorized(&self, party: Address) -> Amount {
        self.token.allowance(party, self.custody)
    }

    /// Validates a batch of movements without executing any of them.
    ///
    /// Stakes are summed per paying party and checked against that party's
    /// allowance and balance. Payouts must be covered by what custody holds
    /// after the batch's stakes land.
    ///
    /// # Errors
    ///
    /// The first violated condition, in movement order.
    pub fn preflight<'a>(
        &self,
        movements: impl IntoIterator<Item = &'a Movement>,
    ) -> Result<(), EscrowError> {
        let mut pulled: Vec<(Address, Amount)> = Vec::new();
        let mut incoming: Amount = 0;
        let mut outgoing: Amount = 0;

        for movement in movements {
            match *movement {
                Movement::Stake { from, amount } => {
                    let total = match pulled.iter_mut().find(|(party, _)| *party == from) {
                        Some((_, sum)) => {
                            *sum = sum.checked_add(amount).ok_or(EscrowError::AmountOverflow)?;
                            *sum
                        }
                        None => {
                            pulled.push((from, amount));
                            amount
                        }
                    };
                    self.check_pull(from, total)?;
                    incoming = incoming
                        .checked_add(amount)
                        .ok_or(EscrowError::AmountOverflow)?;
                }
                Movement::Release { amount, .. } => {
                    outgoing = outgoing
                        .checked_add(amount)
                        .ok_or(EscrowError::AmountOverflow)?;
                }
            }
        }

        self.held
            .checked_add(incoming)
            .ok_or(EscrowError::AmountOverflow)?;

        let covered = self.held.saturating_add(incoming);
        let on_hand = self
            .token
            .balance_of(self.custody)
            .saturating_add(incoming);
        if outgoing > covered || outgoing > on_hand {
            return Err(EscrowError::CustodyShortfall {
                held: self.held,
                requested: outgoing,
            });
        }
        Ok(())
    }

    /// Executes one movement.
    pub fn apply(&mut self, movement: Movement) -> Result<(), EscrowError> {
        match movement {
            Movement::Stake { from, amount } => self.stake(from, amount),
            Movement::Release { to, amount } => self.release(to, amount),
        }
    }

    /// Executes a batch in order. If any movement fails, the ones already
    /// executed are reversed, newest first, and the failing error returned.
    ///
    /// Reversal restores balances and `held`. Allowance spent by a reversed
    /// stake is not restored; transitions never put a stake ahead of another
    /// movement, so this only matters to direct callers.
    pub fn apply_all<'a>(
        &mut self,
        movements: impl IntoIterator<Item = &'a Movement>,
    ) -> Result<(), EscrowError> {
        let mut done: Vec<Movement> = Vec::new();
        for movement in movements {
            if let Err(err) = self.apply(*movement) {
                for executed in done.iter().rev() {
                    if let Err(undo) = self.reverse(*executed) {
                        tracing::error!(?executed, %undo, "failed to reverse custody movement");
                    }
                }
                return Err(err);
            }
            done.push(*movement);
        }
        Ok(())
    }

    fn reverse(&mut self, movement: Movement) -> Result<(), EscrowError> {
        match movement {
            Movement::Stake { from, amount } => {
                let held = self
                    .held
                    .checked_sub(amount)
                    .ok_or(EscrowError::CustodyShortfall {
                        held: self.held,
                        requested: amount,
                    })?;
                self.token.transfer(self.custody, from, amount)?;
                self.held = held;
            }
            Movement::Release { to, amount } => {
                let held = self
                    .held
                    .checked_add(amount)
                    .ok_or(EscrowError::AmountOverflow)?;
                self.token.transfer(to, self.custody, amount)?;
                self.held = held;
            }
        }
        Ok(())
    }

    /// Pulls exactly `amount` from `from` into custody.
    ///
    /// Any allowance above `amount` is left untouched.
    ///
    /// # Errors
    ///
    /// [`EscrowError::InsufficientAuthorization`] if `from` authorized less
    /// than `amount`, then [`EscrowError::InsufficientFunds`] if `from`'s
    /// balance is short.
    pub fn stake(&mut self, from: Address, amount: Amount) -> Result<(), EscrowError> {
        self.check_pull(from, amount)?;
        let held = self
            .held
            .checked_add(amount)
            .ok_or(EscrowError::AmountOverflow)?;

        self.token
            .transfer_from(self.custody, from, self.custody, amount)?;
        self.held = held;

        tracing::debug!(%from, amount, held = self.held, "stake pulled into custody");
        Ok(())
    }

    /// Pushes `amount` out of custody to `to`. A zero amount is a no-op.
    ///
    /// # Errors
    ///
    /// [`EscrowError::CustodyShortfall`] if custody accounting or the custody
    /// balance does not cover `amount`.
    pub fn release(&mut self, to: Address, amount: Amount) -> Result<(), EscrowError> {
        if amount == 0 {
            return Ok(());
        }

        let on_hand = self.token.balance_of(self.custody);
        let held = match self.held.checked_sub(amount) {
            Some(rest) if on_hand >= amount => rest,
            _ => {
                return Err(EscrowError::CustodyShortfall {
                    held: self.held,
                    requested: amount,
                })
            }
        };

        self.token.transfer(self.custody, to, amount)?;
        self.held = held;

        tracing::debug!(%to, amount, held = self.held, "stake released from custody");
        Ok(())
    }

    fn check_pull(&self, from: Address, amount: Amount) -> Result<(), EscrowError> {
        let authorized = self.authorized(from);
        if authorized < amount {
            return Err(EscrowError::InsufficientAuthorization {
                party: from,
                authorized,
                required: amount,
            });
        }

        let balance = self.token.balance_of(from);
        if balance < amount {
            return Err(EscrowError::InsufficientFunds {
                party: from,
                balance,
                required: amount,
            });
        }
        Ok(())
    }
}

//! # Token Ledger
//!
//! The fungible-token collaborator that claim custody is built on. The claim
//! handler never owns token semantics; it only needs the two transfer shapes
//! every allowance-based token supports:
//!
//! - **pull**: `transfer_from(spender, from, to, amount)`. `from` must have
//!   pre-authorized `spender` for at least `amount`.
//! - **push**: `transfer(from, to, amount)`, moving the caller's own balance.
//!
//! Both are atomic: on any failure, no balance or allowance changes.
//!
//! [`InMemoryToken`] is the reference implementation used by tests and by the
//! devnet node. Minting is gated on a single owner address, like a classic
//! mintable token.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Address, Amount};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by token ledger operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The source account does not hold enough tokens.
    #[error("insufficient balance: {owner} has {balance}, needs {requested}")]
    InsufficientBalance {
        /// Account being debited.
        owner: Address,
        /// Its current balance.
        balance: Amount,
        /// Amount the transfer needed.
        requested: Amount,
    },

    /// The spender has not been authorized for enough of the owner's tokens.
    #[error("insufficient allowance: {spender} may move {allowance} of {owner}'s tokens, needs {requested}")]
    InsufficientAllowance {
        /// Account whose tokens would move.
        owner: Address,
        /// Account attempting the pull.
        spender: Address,
        /// Current allowance.
        allowance: Amount,
        /// Amount the transfer needed.
        requested: Amount,
    },

    /// A balance or the total supply would exceed `u64::MAX`.
    #[error("amount overflow")]
    Overflow,

    /// The caller is not allowed to perform this operation (e.g. mint).
    #[error("unauthorized: {caller} is not the token owner")]
    Unauthorized {
        /// The rejected caller.
        caller: Address,
    },
}

// ---------------------------------------------------------------------------
// Ledger Interface
// ---------------------------------------------------------------------------

/// The transfer surface the claim handler consumes.
pub trait TokenLedger {
    /// Balance held by `owner`.
    fn balance_of(&self, owner: Address) -> Amount;

    /// Amount `spender` may still pull from `owner`.
    fn allowance(&self, owner: Address, spender: Address) -> Amount;

    /// Moves `amount` from `from`'s own balance to `to`.
    fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> Result<(), TokenError>;

    /// Pulls `amount` from `from` to `to` on behalf of `spender`, consuming
    /// that much of `from`'s allowance toward `spender`.
    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), TokenError>;
}

// ---------------------------------------------------------------------------
// In-memory Implementation
// ---------------------------------------------------------------------------

/// Allowance-based fungible token kept entirely in memory.
///
/// Maps are ordered so that stored records serialize deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryToken {
    /// The only address allowed to mint.
    owner: Address,
    /// Sum of all balances.
    total_supply: Amount,
    /// Per-address balances. Absent means zero.
    balances: BTreeMap<Address, Amount>,
    /// `owner -> (spender -> remaining allowance)`.
    allowances: BTreeMap<Address, BTreeMap<Address, Amount>>,
}

impl InMemoryToken {
    /// Creates an empty token whose minter is `owner`.
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            total_supply: 0,
            balances: BTreeMap::new(),
            allowances: BTreeMap::new(),
        }
    }

    /// The minting authority.
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Sum of all balances.
    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    /// Creates `amount` new tokens in `to`'s balance. Owner only.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Unauthorized`] if `caller` is not the owner and
    /// [`TokenError::Overflow`] if the supply or balance would overflow.
    pub fn mint(&mut self, caller: Address, to: Address, amount: Amount) -> Result<(), TokenError> {
        if caller != self.owner {
            return Err(TokenError::Unauthorized { caller });
        }

        let new_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(TokenError::Overflow)?;
        let new_balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(TokenError::Overflow)?;

        self.total_supply = new_supply;
        self.balances.insert(to, new_balance);

        tracing::debug!(%to, amount, "tokens minted");
        Ok(())
    }

    /// Sets `spender`'s allowance over `owner`'s tokens to exactly `amount`.
    ///
    /// Overwrites any previous allowance; an `amount` of zero revokes it.
    pub fn approve(&mut self, owner: Address, spender: Address, amount: Amount) {
        let entry = self.allowances.entry(owner).or_default();
        if amount == 0 {
            entry.remove(&spender);
        } else {
            entry.insert(spender, amount);
        }
        if entry.is_empty() {
            self.allowances.remove(&owner);
        }
    }

    /// Moves balance after all checks have passed. `from == to` is a no-op.
    fn move_balance(&mut self, from: Address, to: Address, amount: Amount) -> Result<(), TokenError> {
        let from_balance = self.balance_of(from);
        let debited = from_balance
            .checked_sub(amount)
            .ok_or(TokenError::InsufficientBalance {
                owner: from,
                balance: from_balance,
                requested: amount,
            })?;

        if from == to {
            return Ok(());
        }

        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(TokenError::Overflow)?;

        if debited == 0 {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, debited);
        }
        self.balances.insert(to, credited);
        Ok(())
    }
}

impl TokenLedger for InMemoryToken {
    fn balance_of(&self, owner: Address) -> Amount {
        self.balances.get(&owner).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: Address, spender: Address) -> Amount {
        self.allowances
            .get(&owner)
            .and_then(|spenders| spenders.get(&spender))
            .copied()
            .unwrap_or(0)
    }

    fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> Result<(), TokenError> {
        self.move_balance(from, to, amount)
    }

    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), TokenError> {
        let allowance = self.allowance(from, spender);
        if allowance < amount {
            return Err(TokenError::InsufficientAllowance {
                owner: from,
                spender,
                allowance,
                requested: amount,
            });
        }

        // Balance movement is the only fallible step left; do it before
        // touching the allowance so a failure changes nothing.
        self.move_balance(from, to, amount)?;
        self.approve(from, spender, allowance - amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: Address = Address::from_low_u8(1);
    const ALICE: Address = Address::from_low_u8(2);
    const BOB: Address = Address::from_low_u8(3);
    const VAULT: Address = Address::from_low_u8(9);

    fn funded() -> InMemoryToken {
        let mut token = InMemoryToken::new(OWNER);
        token.mint(OWNER, ALICE, 1_000).unwrap();
        token
    }

    #[test]
    fn mint_credits_balance_and_supply() {
        let token = funded();
        assert_eq!(token.balance_of(ALICE), 1_000);
        assert_eq!(token.total_supply(), 1_000);
    }

    #[test]
    fn only_owner_can_mint() {
        let mut token = funded();
        let err = token.mint(ALICE, ALICE, 5).unwrap_err();
        assert_eq!(err, TokenError::Unauthorized { caller: ALICE });
        assert_eq!(token.total_supply(), 1_000);
    }

    #[test]
    fn mint_overflow_rejected() {
        let mut token = funded();
        let err = token.mint(OWNER, BOB, u64::MAX).unwrap_err();
        assert_eq!(err, TokenError::Overflow);
        assert_eq!(token.balance_of(BOB), 0);
    }

    #[test]
    fn transfer_moves_balance() {
        let mut token = funded();
        token.transfer(ALICE, BOB, 400).unwrap();
        assert_eq!(token.balance_of(ALICE), 600);
        assert_eq!(token.balance_of(BOB), 400);
        assert_eq!(token.total_supply(), 1_000);
    }

    #[test]
    fn transfer_more_than_balance_fails_without_effect() {
        let mut token = funded();
        let err = token.transfer(ALICE, BOB, 1_001).unwrap_err();
        assert!(matches!(err, TokenError::InsufficientBalance { balance: 1_000, .. }));
        assert_eq!(token.balance_of(ALICE), 1_000);
        assert_eq!(token.balance_of(BOB), 0);
    }

    #[test]
    fn self_transfer_is_a_noop() {
        let mut token = funded();
        token.transfer(ALICE, ALICE, 500).unwrap();
        assert_eq!(token.balance_of(ALICE), 1_000);
    }

    #[test]
    fn transfer_from_consumes_exact_allowance() {
        let mut token = funded();
        token.approve(ALICE, VAULT, 700);
        token.transfer_from(VAULT, ALICE, VAULT, 300).unwrap();
        assert_eq!(token.balance_of(VAULT), 300);
        assert_eq!(token.allowance(ALICE, VAULT), 400);
    }

    #[test]
    fn transfer_from_without_allowance_fails() {
        let mut token = funded();
        token.approve(ALICE, VAULT, 10);
        let err = token.transfer_from(VAULT, ALICE, VAULT, 11).unwrap_err();
        assert!(matches!(err, TokenError::InsufficientAllowance { allowance: 10, .. }));
        assert_eq!(token.allowance(ALICE, VAULT), 10);
    }

    #[test]
    fn transfer_from_with_short_balance_keeps_allowance() {
        let mut token = funded();
        token.approve(ALICE, VAULT, 5_000);
        let err = token.transfer_from(VAULT, ALICE, VAULT, 2_000).unwrap_err();
        assert!(matches!(err, TokenError::InsufficientBalance { .. }));
        assert_eq!(token.allowance(ALICE, VAULT), 5_000);
        assert_eq!(token.balance_of(ALICE), 1_000);
    }

    #[test]
    fn approve_overwrites_and_zero_revokes() {
        let mut token = funded();
        token.approve(ALICE, VAULT, 100);
        token.approve(ALICE, VAULT, 30);
        assert_eq!(token.allowance(ALICE, VAULT), 30);
        token.approve(ALICE, VAULT, 0);
        assert_eq!(token.allowance(ALICE, VAULT), 0);
    }

    #[test]
    fn serialization_roundtrip_preserves_state() {
        let mut token = funded();
        token.approve(ALICE, VAULT, 42);
        let json = serde_json::to_string(&token).unwrap();
        let restored: InMemoryToken = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.balance_of(ALICE), 1_000);
        assert_eq!(restored.allowance(ALICE, VAULT), 42);
        assert_eq!(restored.owner(), OWNER);
    }
}

//! # Access Control
//!
//! Role checks consumed by the claim handler. The handler only ever asks two
//! questions, "is this address an administrator?" and "who is the owner?",
//! so that is the whole trait. Managing the administrator set is the
//! registry's business, not the state machine's.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Address;

/// Errors returned by [`AdminRegistry`] management calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Only the owner may change the administrator set.
    #[error("unauthorized: {caller} is not the owner")]
    NotOwner {
        /// The rejected caller.
        caller: Address,
    },
}

/// Narrow capability interface over a role registry.
pub trait AccessControl {
    /// Whether `address` is currently an administrator.
    fn is_administrator(&self, address: Address) -> bool;

    /// The single owner address.
    fn owner(&self) -> Address;

    /// Whether `address` is the owner.
    fn is_owner(&self, address: Address) -> bool {
        self.owner() == address
    }
}

/// Owner-managed set of administrator addresses.
///
/// The owner is not implicitly an administrator; it has to add itself if it
/// wants administrator rights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminRegistry {
    owner: Address,
    administrators: BTreeSet<Address>,
}

impl AdminRegistry {
    /// Creates a registry with `owner` and no administrators.
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            administrators: BTreeSet::new(),
        }
    }

    /// Grants (`active = true`) or revokes administrator rights. Owner only.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::NotOwner`] if `caller` is not the owner.
    pub fn set_administrator(
        &mut self,
        caller: Address,
        address: Address,
        active: bool,
    ) -> Result<(), AccessError> {
        if caller != self.owner {
            return Err(AccessError::NotOwner { caller });
        }

        if active {
            self.administrators.insert(address);
        } else {
            self.administrators.remove(&address);
        }
        tracing::info!(%address, active, "administrator membership updated");
        Ok(())
    }

    /// Current administrators in address order.
    pub fn administrators(&self) -> impl Iterator<Item = &Address> {
        self.administrators.iter()
    }
}

impl AccessControl for AdminRegistry {
    fn is_administrator(&self, address: Address) -> bool {
        self.administrators.contains(&address)
    }

    fn owner(&self) -> Address {
        self.owner
    }
}

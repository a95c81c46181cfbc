//! Global settings that administrators may change.

use serde::{Deserialize, Serialize};
use tribune_protocol::access::AccessControl;
use tribune_protocol::{Address, Amount};

use crate::error::ClaimError;
use crate::events::ClaimEvent;

/// Mutable handler-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    min_stake: Amount,
}

impl AdminConfig {
    /// Starts with `min_stake` as the threshold for new claims.
    pub fn new(min_stake: Amount) -> Self {
        Self { min_stake }
    }

    /// Minimum stake a requester must put up to open a claim.
    pub fn min_stake(&self) -> Amount {
        self.min_stake
    }

    /// Replaces the minimum stake for claims created from now on.
    ///
    /// Claims already open keep whatever they staked.
    ///
    /// # Errors
    ///
    /// [`ClaimError::Unauthorized`] unless `caller` is an administrator.
    pub fn set_min_stake<A: AccessControl>(
        &mut self,
        access: &A,
        caller: Address,
        new: Amount,
    ) -> Result<ClaimEvent, ClaimError> {
        if !access.is_administrator(caller) {
            return Err(ClaimError::Unauthorized { caller });
        }

        let previous = std::mem::replace(&mut self.min_stake, new);
        Ok(ClaimEvent::MinStakeUpdated { previous, new })
    }
}

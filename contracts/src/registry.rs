//! Append-only claim store.
//!
//! Claims live in a `Vec` and their identifier is their index, so ids are
//! sequential from zero and stay stable forever. There is no public removal.

use serde::{Deserialize, Serialize};

use crate::claim::{Claim, ClaimIdx};
use crate::error::ClaimError;

/// Arena of every claim ever created.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimRegistry {
    claims: Vec<Claim>,
}

impl ClaimRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `claims`, with ids assigned by position.
    pub fn from_claims(claims: Vec<Claim>) -> Self {
        Self { claims }
    }

    /// Number of claims ever created.
    pub fn count(&self) -> u64 {
        self.claims.len() as u64
    }

    /// The identifier the next [`push`](Self::push) will assign.
    pub fn next_idx(&self) -> ClaimIdx {
        self.count()
    }

    /// Appends a claim and returns its identifier.
    pub fn push(&mut self, claim: Claim) -> ClaimIdx {
        let idx = self.next_idx();
        self.claims.push(claim);
        idx
    }

    /// Read-only view of claim `id`.
    ///
    /// # Errors
    ///
    /// [`ClaimError::NotFound`] if `id` has not been assigned.
    pub fn get(&self, id: ClaimIdx) -> Result<&Claim, ClaimError> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.claims.get(i))
            .ok_or(ClaimError::NotFound {
                id,
                count: self.count(),
            })
    }

    /// Iterates `(id, claim)` pairs in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (ClaimIdx, &Claim)> {
        self.claims
            .iter()
            .enumerate()
            .map(|(i, claim)| (i as ClaimIdx, claim))
    }

    pub(crate) fn get_mut(&mut self, id: ClaimIdx) -> Result<&mut Claim, ClaimError> {
        let count = self.count();
        usize::try_from(id)
            .ok()
            .and_then(|i| self.claims.get_mut(i))
            .ok_or(ClaimError::NotFound { id, count })
    }

    /// Undoes the most recent [`push`](Self::push). Only used to roll back a
    /// `create` whose custody transfer failed within the same call.
    pub(crate) fn rollback_push(&mut self, id: ClaimIdx) {
        if id.checked_add(1) == Some(self.count()) {
            self.claims.pop();
        }
    }
}

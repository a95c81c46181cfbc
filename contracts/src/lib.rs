//! # Tribune Claim Contracts
//!
//! A stake-backed dispute ("claim") lifecycle between a requester and a
//! respondent, held in custody on a fungible token ledger:
//!
//! - **Claim**: the record and its eight lifecycle states.
//! - **Engine**: the transition table deciding who may do what, from which
//!   state, after how long, and which stakes move as a result.
//! - **Escrow**: exact-amount stake pulls and payouts against custody.
//! - **Handler**: ties the above to the ledger, the admin registry and the
//!   event log, committing each call all-or-nothing.
//!
//! ## Design Principles
//!
//! 1. Every amount is checked: `checked_add`/`checked_sub` on custody paths.
//! 2. State transitions are explicit enum variants decided in one place.
//! 3. A failed call changes nothing and emits nothing.
//! 4. The new claim state is written before any custody transfer.
//! 5. The handler's parts (claims, custody, access, settings) are
//!    serde-serializable and can be reassembled with
//!    [`ClaimHandler::from_parts`].

pub mod admin;
pub mod claim;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod events;
pub mod handler;
pub mod registry;

pub use claim::{Claim, ClaimIdx, ClaimState};
pub use error::ClaimError;
pub use escrow::{EscrowError, EscrowManager, Movement};
pub use events::{ClaimEvent, EventNotifier};
pub use handler::{ClaimHandler, NewClaim};

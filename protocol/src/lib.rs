// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tribune Protocol: Shared Primitives
//!
//! Everything the claim contracts and the node agree on before any dispute
//! logic runs: what an address looks like, what an amount is, how long the
//! dispute windows are, and the two collaborators custody depends on.
//!
//! ## Modules
//!
//! - **types**: `Address`, `Amount`, `Timestamp`.
//! - **config**: Protocol constants: dispute windows, default stake, ports.
//! - **token**: The `TokenLedger` interface and an in-memory ledger.
//! - **access**: The `AccessControl` interface and an owner-managed registry.
//!
//! The token and access modules define *interfaces* first. The in-memory
//! implementations exist so the contracts can be exercised end to end and
//! so a devnet node has something to stand on.

pub mod access;
pub mod config;
pub mod token;
pub mod types;

pub use types::{Address, Amount, Timestamp};

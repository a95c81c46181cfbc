//! # Protocol Configuration & Constants
//!
//! Every magic number in Tribune lives here. If a window length or a default
//! stake is hardcoded anywhere else, that's a bug with a paper trail.
//!
//! The dispute windows in particular are part of the contract with users:
//! changing them changes who can take whose money, and when. Treat edits here
//! like a schema migration.

use chrono::Duration;

use crate::types::Address;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full protocol version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Version of the node's on-disk ledger layout, kept in the store's
/// metadata. Bump when the persisted form of claims, custody or the admin
/// set changes.
pub const SNAPSHOT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Dispute Windows
// ---------------------------------------------------------------------------

/// Hours a requester must wait after creating a claim before a close is
/// allowed while the claim is still unaccepted.
pub const ACCEPTANCE_WINDOW_HOURS: i64 = 72;

/// Hours a requester must wait after acceptance before a close is allowed
/// while the respondent has not resolved.
pub const RESOLUTION_WINDOW_HOURS: i64 = 72;

/// Hours after resolution during which a close counts as an explicit
/// confirmation rather than a timeout.
pub const CONFIRMATION_WINDOW_HOURS: i64 = 24;

/// [`ACCEPTANCE_WINDOW_HOURS`] as a duration.
pub fn acceptance_window() -> Duration {
    Duration::hours(ACCEPTANCE_WINDOW_HOURS)
}

/// [`RESOLUTION_WINDOW_HOURS`] as a duration.
pub fn resolution_window() -> Duration {
    Duration::hours(RESOLUTION_WINDOW_HOURS)
}

/// [`CONFIRMATION_WINDOW_HOURS`] as a duration.
pub fn confirmation_window() -> Duration {
    Duration::hours(CONFIRMATION_WINDOW_HOURS)
}

// ---------------------------------------------------------------------------
// Stake Parameters
// ---------------------------------------------------------------------------

/// Decimal places of the staking token.
pub const TOKEN_DECIMALS: u8 = 5;

/// Default minimum stake for opening a claim: 150 whole tokens.
pub const DEFAULT_MIN_STAKE: u64 = 150 * 10u64.pow(TOKEN_DECIMALS as u32);

// ---------------------------------------------------------------------------
// Node Parameters
// ---------------------------------------------------------------------------

/// Default REST/WebSocket API port.
pub const DEFAULT_API_PORT: u16 = 9841;

/// Default metrics (Prometheus) port.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

/// Custody address a devnet node uses when none is configured. The bytes
/// spell `tribune-custody`, so nobody holds a key for it.
pub const DEFAULT_CUSTODY_ADDRESS: Address = Address::from_bytes(*b"tribune-custody\0\0\0\0\0");

/// Broadcast channel capacity for live claim events. Large enough to absorb
/// a burst of transitions without dropping events for slow WebSocket clients.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

//! # Node State
//!
//! The ledger the node hosts, the clock it stamps calls with, and the sled
//! store that carries both across restarts.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                  | Value                          |
//! |------------|----------------------|--------------------------------|
//! | `claims`   | `claim_idx` (8B BE)  | `bincode(Claim)`               |
//! | `escrow`   | `state`              | `bincode(EscrowManager)`       |
//! | `access`   | `state`              | `bincode(AdminRegistry)`       |
//! | `metadata` | key (UTF-8)          | version, `saved_at`, settings  |
//!
//! Claim indices are big-endian so sled's key order is creation order.
//!
//! ## Atomicity
//!
//! Each committed call is written as one transaction across all four trees:
//! the claims it touched, custody, the admin set and the metadata land
//! together or not at all.

use chrono::{SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Batch, Db, Transactional, Tree};
use std::convert::Infallible;
use std::path::Path;
use thiserror::Error;

use tribune_contracts::admin::AdminConfig;
use tribune_contracts::registry::ClaimRegistry;
use tribune_contracts::{Claim, ClaimHandler, ClaimIdx, EscrowManager};
use tribune_protocol::access::AdminRegistry;
use tribune_protocol::config::SNAPSHOT_VERSION;
use tribune_protocol::token::InMemoryToken;
use tribune_protocol::Timestamp;

/// The claim handler as hosted by the node.
pub type NodeLedger = ClaimHandler<InMemoryToken, AdminRegistry>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unsupported store version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("corrupt store: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Ledger Clock
// ---------------------------------------------------------------------------

/// Issues non-decreasing, whole-second timestamps.
///
/// Wall-clock time is used when it moves forward; if the system clock steps
/// back, the last issued time is repeated until it catches up.
#[derive(Debug, Clone, Default)]
pub struct LedgerClock {
    last: Option<Timestamp>,
}

impl LedgerClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock that never issues anything earlier than `last`.
    pub fn resume(last: Timestamp) -> Self {
        Self { last: Some(last) }
    }

    /// The next call timestamp.
    pub fn now(&mut self) -> Timestamp {
        self.tick(Utc::now())
    }

    fn tick(&mut self, wall: Timestamp) -> Timestamp {
        let wall = wall.trunc_subsecs(0);
        let issued = match self.last {
            Some(last) if last > wall => last,
            _ => wall,
        };
        self.last = Some(issued);
        issued
    }

    pub fn last(&self) -> Option<Timestamp> {
        self.last
    }
}

// ---------------------------------------------------------------------------
// Metadata Keys
// ---------------------------------------------------------------------------

const META_VERSION: &[u8] = b"version";
const META_SAVED_AT: &[u8] = b"saved_at";
const META_CONFIG: &[u8] = b"config";

/// Key of the single record in the `escrow` and `access` trees.
const KEY_STATE: &[u8] = b"state";

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// A ledger read back from disk.
#[derive(Debug)]
pub struct StoredLedger {
    /// Clock value of the last committed write.
    pub saved_at: Timestamp,
    pub ledger: NodeLedger,
}

/// Persistent home of the hosted ledger.
///
/// Cheap to clone: every handle shares the same sled database.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    db: Db,
    claims: Tree,
    escrow: Tree,
    access: Tree,
    metadata: Tree,
}

impl LedgerStore {
    /// Opens or creates the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// An in-memory store removed on drop.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let claims = db.open_tree("claims")?;
        let escrow = db.open_tree("escrow")?;
        let access = db.open_tree("access")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            claims,
            escrow,
            access,
            metadata,
        })
    }

    /// Reads the ledger back, or `None` if nothing was ever written.
    pub fn load(&self) -> StoreResult<Option<StoredLedger>> {
        let Some(version) = self.metadata.get(META_VERSION)? else {
            return Ok(None);
        };
        let found = u32::from_be_bytes(
            version
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::Corrupt("invalid version bytes".to_string()))?,
        );
        if found != SNAPSHOT_VERSION {
            return Err(StoreError::Version {
                found,
                expected: SNAPSHOT_VERSION,
            });
        }

        let saved_at: Timestamp = get_required(&self.metadata, META_SAVED_AT, "saved_at")?;
        let config: AdminConfig = get_required(&self.metadata, META_CONFIG, "config")?;
        let escrow: EscrowManager<InMemoryToken> =
            get_required(&self.escrow, KEY_STATE, "escrow")?;
        let access: AdminRegistry = get_required(&self.access, KEY_STATE, "access")?;

        let mut claims: Vec<Claim> = Vec::with_capacity(self.claims.len());
        for entry in self.claims.iter() {
            let (key, value) = entry?;
            let idx = decode_idx(&key)?;
            if idx != claims.len() as ClaimIdx {
                return Err(StoreError::Corrupt(format!(
                    "claim {} missing before claim {}",
                    claims.len(),
                    idx
                )));
            }
            claims.push(decode(&value)?);
        }

        let ledger =
            ClaimHandler::from_parts(escrow, access, config, ClaimRegistry::from_claims(claims));
        Ok(Some(StoredLedger { saved_at, ledger }))
    }

    /// Writes every part of `ledger`. Used once, when a fresh ledger is
    /// created.
    pub fn persist_all(&self, ledger: &NodeLedger, saved_at: Timestamp) -> StoreResult<()> {
        let ids: Vec<ClaimIdx> = ledger.claims().map(|(id, _)| id).collect();
        self.persist(ledger, &ids, saved_at)
    }

    /// Writes the claims in `touched` together with custody, the admin set,
    /// the settings and `saved_at`, in one transaction.
    ///
    /// The write reaches sled's log before this returns; call
    /// [`flush`](Self::flush) to make it durable.
    pub fn persist(
        &self,
        ledger: &NodeLedger,
        touched: &[ClaimIdx],
        saved_at: Timestamp,
    ) -> StoreResult<()> {
        let mut claim_batch = Batch::default();
        for &id in touched {
            let claim = ledger
                .claim(id)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            claim_batch.insert(&id.to_be_bytes(), encode(claim)?);
        }

        let mut meta_batch = Batch::default();
        meta_batch.insert(META_VERSION, &SNAPSHOT_VERSION.to_be_bytes());
        meta_batch.insert(META_SAVED_AT, encode(&saved_at)?);
        meta_batch.insert(META_CONFIG, encode(ledger.config())?);

        let escrow_bytes = encode(ledger.escrow())?;
        let access_bytes = encode(ledger.access())?;

        (&self.claims, &self.escrow, &self.access, &self.metadata)
            .transaction(|(claims, escrow, access, metadata)| {
                claims.apply_batch(&claim_batch)?;
                escrow.insert(KEY_STATE, escrow_bytes.as_slice())?;
                access.insert(KEY_STATE, access_bytes.as_slice())?;
                metadata.apply_batch(&meta_batch)?;
                Ok::<(), ConflictableTransactionError<Infallible>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(never) => match never {},
                TransactionError::Storage(e) => StoreError::Sled(e),
            })?;

        tracing::debug!(
            touched = touched.len(),
            claims = ledger.claims_count(),
            "ledger persisted"
        );
        Ok(())
    }

    /// Waits until all written data is durable.
    pub async fn flush(&self) -> StoreResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

}

fn get_required<T: DeserializeOwned>(tree: &Tree, key: &[u8], what: &str) -> StoreResult<T> {
    match tree.get(key)? {
        Some(bytes) => decode(&bytes),
        None => Err(StoreError::Corrupt(format!("{what} record missing"))),
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode_idx(bytes: &[u8]) -> StoreResult<ClaimIdx> {
    Ok(ClaimIdx::from_be_bytes(bytes.try_into().map_err(|_| {
        StoreError::Corrupt("invalid claim key bytes".to_string())
    })?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tribune_contracts::{ClaimState, NewClaim};
    use tribune_protocol::access::AccessControl;
    use tribune_protocol::token::TokenLedger;
    use tribune_protocol::Address;

    const OWNER: Address = Address::from_low_u8(1);
    const ALICE: Address = Address::from_low_u8(2);
    const BOB: Address = Address::from_low_u8(3);
    const CUSTODY: Address = Address::from_low_u8(0xcc);

    fn new_claim(deal_id: u64) -> NewClaim {
        NewClaim {
            deal_id,
            reason_note: "broken".into(),
            requester_id: "alice".into(),
            respondent_id: "bob".into(),
            amount: 400,
        }
    }

    fn ledger_with_claim(now: Timestamp) -> NodeLedger {
        let mut token = InMemoryToken::new(OWNER);
        token.mint(OWNER, ALICE, 1_000).unwrap();
        token.approve(ALICE, CUSTODY, 1_000);
        token.mint(OWNER, BOB, 1_000).unwrap();
        token.approve(BOB, CUSTODY, 1_000);
        let mut access = AdminRegistry::new(OWNER);
        access.set_administrator(OWNER, BOB, true).unwrap();
        let mut ledger = ClaimHandler::new(token, access, CUSTODY, 100);
        ledger.create(ALICE, now, new_claim(9)).unwrap();
        ledger
    }

    #[test]
    fn clock_never_goes_backwards() {
        let t = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let mut clock = LedgerClock::resume(t);
        assert_eq!(clock.tick(t - Duration::hours(1)), t);
        assert_eq!(clock.tick(t + Duration::seconds(5)), t + Duration::seconds(5));
        assert_eq!(clock.tick(t), t + Duration::seconds(5));
    }

    #[test]
    fn clock_truncates_to_whole_seconds() {
        let mut clock = LedgerClock::new();
        let wall = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 7).unwrap() + Duration::milliseconds(900);
        let issued = clock.tick(wall);
        assert_eq!(issued, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 7).unwrap());
        assert_eq!(clock.last(), Some(issued));
    }

    #[test]
    fn empty_store_loads_nothing() {
        let store = LedgerStore::open_temporary().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn persisted_ledger_loads_back() {
        let store = LedgerStore::open_temporary().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap();
        let ledger = ledger_with_claim(now);

        store.persist_all(&ledger, now).unwrap();
        let stored = store.load().unwrap().unwrap();

        assert_eq!(stored.saved_at, now);
        assert_eq!(stored.ledger.claims_count(), 1);
        assert_eq!(stored.ledger.custody_held(), 400);
        assert_eq!(stored.ledger.min_stake(), 100);
        assert_eq!(stored.ledger.custody(), CUSTODY);
        assert_eq!(stored.ledger.token().balance_of(ALICE), 600);
        assert!(stored.ledger.access().is_administrator(BOB));
        assert_eq!(stored.ledger.claim(0).unwrap(), ledger.claim(0).unwrap());
        assert!(!stored.ledger.claim(0).unwrap().is_closed());
        assert!(stored.ledger.events().is_empty());
    }

    #[test]
    fn persist_writes_only_touched_claims() {
        let store = LedgerStore::open_temporary().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap();
        let mut ledger = ledger_with_claim(now);
        store.persist_all(&ledger, now).unwrap();

        let later = now + Duration::hours(1);
        ledger.accept(BOB, later, 0).unwrap();
        let id = ledger.create(ALICE, later, new_claim(10)).unwrap();
        store.persist(&ledger, &[0, id], later).unwrap();

        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.ledger.claims_count(), 2);
        assert_eq!(stored.saved_at, later);
        assert_eq!(
            stored.ledger.claim(0).unwrap().state,
            ClaimState::AwaitingResolution
        );
        assert_eq!(stored.ledger.claim(1).unwrap().deal_id, 10);
        assert_eq!(stored.ledger.custody_held(), 1_200);
    }

    #[test]
    fn reopened_store_keeps_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap();
        {
            let store = LedgerStore::open(dir.path()).unwrap();
            store.persist_all(&ledger_with_claim(now), now).unwrap();
            store.db.flush().unwrap();
        }

        let store = LedgerStore::open(dir.path()).unwrap();
        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.ledger.claims_count(), 1);
        assert_eq!(stored.ledger.custody_held(), 400);
    }

    #[test]
    fn store_under_a_regular_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"occupied").unwrap();

        assert!(LedgerStore::open(file.join("ledger")).is_err());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let store = LedgerStore::open_temporary().unwrap();
        let now = Utc::now();
        store.persist_all(&ledger_with_claim(now), now).unwrap();
        store
            .metadata
            .insert(META_VERSION, &(SNAPSHOT_VERSION + 1).to_be_bytes())
            .unwrap();

        assert!(matches!(store.load(), Err(StoreError::Version { .. })));
    }

    #[test]
    fn gap_in_claims_is_corrupt() {
        let store = LedgerStore::open_temporary().unwrap();
        let now = Utc::now();
        let ledger = ledger_with_claim(now);
        store.persist_all(&ledger, now).unwrap();
        let bytes = store.claims.remove(0u64.to_be_bytes()).unwrap().unwrap();
        store.claims.insert(1u64.to_be_bytes(), bytes).unwrap();

        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }
}

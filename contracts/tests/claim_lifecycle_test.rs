//! Integration tests for the claim lifecycle.
//!
//! Every test drives a `ClaimHandler` over the in-memory token and admin
//! registry, through the public API only, and checks balances, custody and
//! the emitted events after each step.

use chrono::{Duration, TimeZone, Utc};
use tribune_contracts::{
    ClaimError, ClaimEvent, ClaimHandler, ClaimIdx, ClaimState, EscrowError, NewClaim,
};
use tribune_protocol::access::AdminRegistry;
use tribune_protocol::config::DEFAULT_MIN_STAKE;
use tribune_protocol::token::{InMemoryToken, TokenLedger};
use tribune_protocol::{Address, Amount, Timestamp};

const OWNER: Address = Address::from_low_u8(0x01);
const ADMIN: Address = Address::from_low_u8(0x0a);
const REQUESTER: Address = Address::from_low_u8(0x02);
const RESPONDENT: Address = Address::from_low_u8(0x03);
const STRANGER: Address = Address::from_low_u8(0x04);
const CUSTODY: Address = Address::from_low_u8(0xcc);

const STAKE: Amount = 15_000_000;
const FUNDS: Amount = 100_000_000;

type Handler = ClaimHandler<InMemoryToken, AdminRegistry>;

fn t0() -> Timestamp {
    Utc.with_ymd_and_hms(2026, 2, 10, 8, 30, 0).unwrap()
}

/// A handler where requester, respondent and stranger are funded and have
/// authorized custody for their whole balance.
fn setup() -> Handler {
    let mut token = InMemoryToken::new(OWNER);
    for party in [REQUESTER, RESPONDENT, STRANGER] {
        token.mint(OWNER, party, FUNDS).unwrap();
        token.approve(party, CUSTODY, FUNDS);
    }
    let mut access = AdminRegistry::new(OWNER);
    access.set_administrator(OWNER, ADMIN, true).unwrap();
    ClaimHandler::new(token, access, CUSTODY, DEFAULT_MIN_STAKE)
}

fn new_claim(amount: Amount) -> NewClaim {
    NewClaim {
        deal_id: 1234,
        reason_note: "reason note".into(),
        requester_id: "requester".into(),
        respondent_id: "respondent".into(),
        amount,
    }
}

fn balance(h: &Handler, who: Address) -> Amount {
    h.token().balance_of(who)
}

/// Creates and accepts a claim at `t0`.
fn accepted(h: &mut Handler) -> ClaimIdx {
    let id = h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap();
    h.accept(RESPONDENT, t0(), id).unwrap();
    id
}

/// Custody held equals the sum of every claim's stake fields, and the
/// custody address's balance covers it.
fn assert_custody_consistent(h: &Handler) {
    let attributed: Amount = h.claims().map(|(_, c)| c.staked_total()).sum();
    assert_eq!(h.custody_held(), attributed);
    assert!(balance(h, CUSTODY) >= h.custody_held());
}

/// Captures everything a failed call must leave untouched.
fn fingerprint(h: &Handler) -> (Vec<Amount>, Amount, u64, usize, Vec<ClaimState>) {
    let balances = [REQUESTER, RESPONDENT, STRANGER, CUSTODY]
        .iter()
        .map(|a| balance(h, *a))
        .collect();
    let states = h.claims().map(|(_, c)| c.state).collect();
    (
        balances,
        h.custody_held(),
        h.claims_count(),
        h.events().len(),
        states,
    )
}

// ---------------------------------------------------------------------------
// Full Lifecycles
// ---------------------------------------------------------------------------

#[test]
fn confirmed_within_window_closes_and_refunds_both() {
    let mut h = setup();
    let id = accepted(&mut h);
    let resolved_at = t0() + Duration::hours(10);
    h.resolve(RESPONDENT, resolved_at, id, "delivered late, refunded".into())
        .unwrap();

    assert_eq!(balance(&h, RESPONDENT), FUNDS);
    assert_eq!(h.claim(id).unwrap().requester_staked, STAKE);

    let closed_at = resolved_at + Duration::hours(23) + Duration::minutes(59);
    h.close(REQUESTER, closed_at, id).unwrap();

    let claim = h.claim(id).unwrap();
    assert_eq!(claim.state, ClaimState::Closed);
    assert_eq!(claim.modified, closed_at);
    assert_eq!(claim.staked_total(), 0);
    assert_eq!(balance(&h, REQUESTER), FUNDS);
    assert_eq!(balance(&h, RESPONDENT), FUNDS);
    assert_eq!(balance(&h, CUSTODY), 0);
    assert_eq!(h.custody_held(), 0);

    let names: Vec<_> = h.events().iter().map(ClaimEvent::name).collect();
    assert_eq!(
        names,
        ["ClaimCreated", "ClaimAccepted", "ClaimResolved", "ClaimClosed"]
    );
}

#[test]
fn confirmation_after_window_moves_the_same_money() {
    let mut h = setup();
    let id = accepted(&mut h);
    let resolved_at = t0() + Duration::hours(1);
    h.resolve(RESPONDENT, resolved_at, id, "done".into()).unwrap();
    h.close(REQUESTER, resolved_at + Duration::hours(24), id)
        .unwrap();

    assert_eq!(
        h.claim(id).unwrap().state,
        ClaimState::ClosedAfterConfirmationExpired
    );
    assert_eq!(balance(&h, REQUESTER), FUNDS);
    assert_eq!(balance(&h, RESPONDENT), FUNDS);
    assert_eq!(h.custody_held(), 0);
    assert_eq!(
        h.events().last(),
        Some(&ClaimEvent::ClaimClosedAfterConfirmationExpired {
            deal_id: 1234,
            claim_idx: id
        })
    );
}

#[test]
fn unaccepted_claim_expires_at_exactly_72_hours() {
    let mut h = setup();
    let id = h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap();

    let err = h
        .close(REQUESTER, t0() + Duration::hours(71) + Duration::minutes(59), id)
        .unwrap_err();
    assert_eq!(
        err,
        ClaimError::TooEarly {
            available_at: t0() + Duration::hours(72)
        }
    );
    assert_eq!(h.claim(id).unwrap().state, ClaimState::AwaitingAcceptance);

    h.close(REQUESTER, t0() + Duration::hours(72), id).unwrap();
    assert_eq!(
        h.claim(id).unwrap().state,
        ClaimState::ClosedAfterAcceptanceExpired
    );
    assert_eq!(balance(&h, REQUESTER), FUNDS);
    assert_eq!(balance(&h, RESPONDENT), FUNDS);
    assert_eq!(h.custody_held(), 0);
}

#[test]
fn unresolved_claim_forfeits_respondent_stake_to_requester() {
    let mut h = setup();
    let id = accepted(&mut h);

    assert!(matches!(
        h.close(REQUESTER, t0() + Duration::hours(71), id),
        Err(ClaimError::TooEarly { .. })
    ));

    h.close(REQUESTER, t0() + Duration::hours(72), id).unwrap();
    let claim = h.claim(id).unwrap();
    assert_eq!(claim.state, ClaimState::ClosedAfterResolutionExpired);
    assert_eq!(claim.requester_staked, 0);
    assert_eq!(claim.respondent_staked, 0);
    assert_eq!(balance(&h, REQUESTER), FUNDS + STAKE);
    assert_eq!(balance(&h, RESPONDENT), FUNDS - STAKE);
    assert_eq!(balance(&h, CUSTODY), 0);
}

#[test]
fn late_accept_is_allowed_until_close() {
    let mut h = setup();
    let id = h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap();
    h.accept(RESPONDENT, t0() + Duration::days(30), id).unwrap();
    assert_eq!(h.claim(id).unwrap().state, ClaimState::AwaitingResolution);
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

#[test]
fn close_by_non_requester_is_always_unauthorized() {
    let mut h = setup();
    let waiting = h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap();
    let resolving = accepted(&mut h);
    let confirming = accepted(&mut h);
    h.resolve(RESPONDENT, t0(), confirming, String::new())
        .unwrap();
    let done = accepted(&mut h);
    h.resolve(RESPONDENT, t0(), done, String::new()).unwrap();
    h.close(REQUESTER, t0(), done).unwrap();

    let far = t0() + Duration::days(400);
    for id in [waiting, resolving, confirming, done] {
        for caller in [RESPONDENT, STRANGER, OWNER, ADMIN] {
            assert_eq!(
                h.close(caller, far, id).unwrap_err(),
                ClaimError::Unauthorized { caller },
                "claim {id}"
            );
        }
    }
}

#[test]
fn requester_cannot_accept_own_claim() {
    let mut h = setup();
    let id = h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap();
    assert_eq!(
        h.accept(REQUESTER, t0(), id).unwrap_err(),
        ClaimError::Unauthorized { caller: REQUESTER }
    );
}

#[test]
fn only_the_accepted_respondent_may_resolve() {
    let mut h = setup();
    let id = accepted(&mut h);
    for caller in [REQUESTER, STRANGER, ADMIN] {
        assert_eq!(
            h.resolve(caller, t0(), id, "not mine".into()).unwrap_err(),
            ClaimError::Unauthorized { caller }
        );
    }
    h.resolve(RESPONDENT, t0(), id, "mine".into()).unwrap();
}

#[test]
fn terminal_claims_reject_the_requester_with_invalid_state() {
    let mut h = setup();
    let id = h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap();
    let later = t0() + Duration::hours(72);
    h.close(REQUESTER, later, id).unwrap();

    assert_eq!(
        h.close(REQUESTER, later, id).unwrap_err(),
        ClaimError::InvalidState {
            current: ClaimState::ClosedAfterAcceptanceExpired,
            action: "close"
        }
    );
    assert!(matches!(
        h.accept(RESPONDENT, later, id),
        Err(ClaimError::InvalidState { .. })
    ));
}

// ---------------------------------------------------------------------------
// Stakes
// ---------------------------------------------------------------------------

#[test]
fn accept_pulls_exactly_the_requester_stake() {
    let mut h = setup();
    let id = h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap();
    h.token_mut().approve(RESPONDENT, CUSTODY, STAKE * 2);

    h.accept(RESPONDENT, t0(), id).unwrap();
    assert_eq!(balance(&h, RESPONDENT), FUNDS - STAKE);
    assert_eq!(h.token().allowance(RESPONDENT, CUSTODY), STAKE);
    assert_eq!(h.claim(id).unwrap().respondent_staked, STAKE);
    assert_eq!(h.claim(id).unwrap().respondent_address, Some(RESPONDENT));
    assert_custody_consistent(&h);
}

#[test]
fn accept_with_short_authorization_is_a_stake_mismatch() {
    let mut h = setup();
    let id = h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap();
    h.token_mut().approve(RESPONDENT, CUSTODY, STAKE - 1);

    assert_eq!(
        h.accept(RESPONDENT, t0(), id).unwrap_err(),
        ClaimError::StakeMismatch {
            required: STAKE,
            authorized: STAKE - 1
        }
    );
}

#[test]
fn accept_without_funds_fails_in_escrow() {
    let mut h = setup();
    let id = h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap();
    let poor = Address::from_low_u8(0x50);
    h.token_mut().approve(poor, CUSTODY, STAKE);

    assert!(matches!(
        h.accept(poor, t0(), id),
        Err(ClaimError::Escrow(EscrowError::InsufficientFunds { .. }))
    ));
}

#[test]
fn min_stake_change_only_affects_later_claims() {
    let mut h = setup();
    let early = h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap();

    assert_eq!(
        h.set_min_stake(STRANGER, 1).unwrap_err(),
        ClaimError::Unauthorized { caller: STRANGER }
    );
    assert_eq!(
        h.set_min_stake(OWNER, 1).unwrap_err(),
        ClaimError::Unauthorized { caller: OWNER }
    );
    h.set_min_stake(ADMIN, STAKE * 2).unwrap();

    assert_eq!(
        h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap_err(),
        ClaimError::StakeBelowMinimum {
            amount: STAKE,
            minimum: STAKE * 2
        }
    );
    // The earlier claim keeps its stake and proceeds normally.
    h.accept(RESPONDENT, t0(), early).unwrap();
    assert_eq!(h.claim(early).unwrap().respondent_staked, STAKE);
}

// ---------------------------------------------------------------------------
// Atomicity
// ---------------------------------------------------------------------------

#[test]
fn failed_calls_change_nothing_and_emit_nothing() {
    let mut h = setup();
    let id = accepted(&mut h);
    let before = fingerprint(&h);

    let failures = [
        h.close(STRANGER, t0(), id),
        h.close(REQUESTER, t0() + Duration::hours(1), id),
        h.accept(STRANGER, t0(), id),
        h.resolve(REQUESTER, t0(), id, "x".into()),
        h.resolve(RESPONDENT, t0() - Duration::seconds(1), id, "x".into()),
        h.accept(STRANGER, t0(), 99),
        h.set_min_stake(STRANGER, 0),
    ];
    assert!(failures.iter().all(Result::is_err));
    assert!(h.create(REQUESTER, t0(), new_claim(STAKE - 1)).is_err());

    assert_eq!(fingerprint(&h), before);
}

#[test]
fn custody_tracks_stakes_across_interleaved_claims() {
    let mut h = setup();
    let a = accepted(&mut h);
    let b = h.create(STRANGER, t0(), new_claim(STAKE * 2)).unwrap();
    assert_custody_consistent(&h);

    h.resolve(RESPONDENT, t0() + Duration::hours(2), a, "ok".into())
        .unwrap();
    assert_custody_consistent(&h);

    h.accept(RESPONDENT, t0() + Duration::hours(3), b).unwrap();
    assert_custody_consistent(&h);
    assert_eq!(h.custody_held(), STAKE + STAKE * 4);

    h.close(REQUESTER, t0() + Duration::hours(4), a).unwrap();
    h.close(STRANGER, t0() + Duration::hours(80), b).unwrap();
    assert_custody_consistent(&h);
    assert_eq!(h.custody_held(), 0);
    assert_eq!(balance(&h, CUSTODY), 0);

    let total: Amount = [REQUESTER, RESPONDENT, STRANGER]
        .iter()
        .map(|a| balance(&h, *a))
        .sum();
    assert_eq!(total, FUNDS * 3);
}

#[test]
fn claim_ids_are_sequential() {
    let mut h = setup();
    for expected in 0..4 {
        assert_eq!(h.create(REQUESTER, t0(), new_claim(STAKE)).unwrap(), expected);
    }
    assert_eq!(h.claims_count(), 4);
    assert_eq!(
        h.claim(4).unwrap_err(),
        ClaimError::NotFound { id: 4, count: 4 }
    );
}

//! # REST + WebSocket API
//!
//! Builds the axum router that exposes the claim handler over HTTP. All
//! endpoints share [`AppState`] through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                       | Description                            |
//! |--------|----------------------------|----------------------------------------|
//! | GET    | `/health`                  | Liveness probe                         |
//! | GET    | `/status`                  | Version, claim count, custody summary  |
//! | GET    | `/claims`                  | Number of claims ever created          |
//! | POST   | `/claims`                  | Open a claim                           |
//! | GET    | `/claims/:id`              | Full claim record                      |
//! | POST   | `/claims/:id/accept`       | Accept as respondent                   |
//! | POST   | `/claims/:id/resolve`      | Resolve as respondent                  |
//! | POST   | `/claims/:id/close`        | Close as requester                     |
//! | GET    | `/min-stake`               | Current minimum stake                  |
//! | PUT    | `/admin/min-stake`         | Change the minimum stake (admin only)  |
//! | GET    | `/token/balances/:address` | Balance and allowance toward custody   |
//! | POST   | `/token/approve`           | Authorize custody to pull stakes       |
//! | POST   | `/token/mint`              | Mint tokens (token owner only)         |
//! | GET    | `/ws`                      | Live stream of claim events            |
//!
//! Write bodies name the acting `caller`. The node does not authenticate
//! callers; it is a devnet host.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tribune_contracts::{Claim, ClaimError, ClaimEvent, ClaimIdx, EscrowError, NewClaim};
use tribune_protocol::token::{TokenError, TokenLedger};
use tribune_protocol::{Address, Amount, Timestamp};

use crate::metrics::SharedMetrics;
use crate::state::{LedgerClock, LedgerStore, NodeLedger, StoreError};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// The ledger and the clock that stamps calls against it. Always locked
/// together so timestamps are issued in commit order.
pub struct Node {
    pub ledger: NodeLedger,
    pub clock: LedgerClock,
    /// Set when a committed call could not be persisted. The in-memory ledger
    /// is then ahead of the store, so every later write is refused.
    pub halted: bool,
}

impl Node {
    pub fn new(ledger: NodeLedger, clock: LedgerClock) -> Self {
        Self {
            ledger,
            clock,
            halted: false,
        }
    }
}

/// Shared application state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Reported version string.
    pub version: String,
    /// The hosted ledger. Held for the whole of a call, never across an
    /// `.await`.
    pub node: Arc<Mutex<Node>>,
    /// Live claim events for WebSocket subscribers.
    pub event_tx: broadcast::Sender<ClaimEvent>,
    pub metrics: SharedMetrics,
    /// Ledger store; `None` keeps state in memory only.
    pub store: Option<LedgerStore>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Generic error body returned on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("ledger persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("node halted after a persistence failure; restart it to recover")]
    Halted,
}

impl ApiError {
    /// Metrics label for the rejection.
    fn reason(&self) -> &'static str {
        match self {
            ApiError::Claim(e) => e.reason(),
            ApiError::Token(TokenError::Unauthorized { .. }) => "token_unauthorized",
            ApiError::Token(_) => "token_rejected",
            ApiError::Persistence(_) => "persistence",
            ApiError::Halted => "halted",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Claim(e) => match e {
                ClaimError::NotFound { .. } => StatusCode::NOT_FOUND,
                ClaimError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                ClaimError::InvalidState { .. } => StatusCode::CONFLICT,
                ClaimError::TooEarly { .. } => StatusCode::TOO_EARLY,
                ClaimError::StakeMismatch { .. }
                | ClaimError::StakeBelowMinimum { .. }
                | ClaimError::WindowOverflow { .. }
                | ClaimError::Escrow(EscrowError::InsufficientAuthorization { .. })
                | ClaimError::Escrow(EscrowError::InsufficientFunds { .. }) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ClaimError::TimestampRegression { .. } | ClaimError::Escrow(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Token(TokenError::Unauthorized { .. }) => StatusCode::FORBIDDEN,
            ApiError::Token(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Halted => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateClaimRequest {
    pub caller: Address,
    #[serde(flatten)]
    pub claim: NewClaim,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallerRequest {
    pub caller: Address,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub caller: Address,
    pub resolution_note: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MinStakeRequest {
    pub caller: Address,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub caller: Address,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MintRequest {
    pub caller: Address,
    pub to: Address,
    pub amount: Amount,
}

/// A claim together with its identifier.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimView {
    pub claim_idx: ClaimIdx,
    #[serde(flatten)]
    pub claim: Claim,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceView {
    pub address: Address,
    pub balance: Amount,
    /// Allowance toward the custody address.
    pub authorized: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub claims_count: u64,
    pub min_stake: Amount,
    pub custody: Address,
    pub custody_held: Amount,
    /// Last timestamp issued to a call, if any.
    pub ledger_time: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full [`Router`] with all routes, CORS and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/claims", get(claims_count_handler).post(create_handler))
        .route("/claims/:id", get(claim_handler))
        .route("/claims/:id/accept", post(accept_handler))
        .route("/claims/:id/resolve", post(resolve_handler))
        .route("/claims/:id/close", post(close_handler))
        .route("/min-stake", get(min_stake_handler))
        .route("/admin/min-stake", put(set_min_stake_handler))
        .route("/token/balances/:address", get(balance_handler))
        .route("/token/approve", post(approve_handler))
        .route("/token/mint", post(mint_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Write Path
// ---------------------------------------------------------------------------

/// Runs one write against the ledger.
///
/// Under the lock: stamps the call with the ledger clock, runs it, and
/// writes the result to the store. After the lock is released: waits for
/// the store to flush, then forwards the emitted events to metrics and
/// WebSocket subscribers. A call is only acknowledged once it is durable;
/// a store failure halts all later writes.
async fn commit<R, E>(
    state: &AppState,
    op: impl FnOnce(&mut NodeLedger, Timestamp) -> Result<R, E>,
) -> Result<R, ApiError>
where
    E: Into<ApiError>,
{
    let timer = state.metrics.request_latency_seconds.start_timer();

    let (mut result, events) = run_locked(state, op);
    if result.is_ok() {
        if let Some(store) = &state.store {
            if let Err(e) = store.flush().await {
                tracing::error!(error = %e, "ledger flush failed; halting writes");
                state.node.lock().halted = true;
                result = Err(e.into());
            }
        }
    }

    match &result {
        Ok(_) => {
            for event in events {
                state
                    .metrics
                    .transitions_total
                    .with_label_values(&[event.name()])
                    .inc();
                // No subscribers is not an error.
                let _ = state.event_tx.send(event);
            }
        }
        Err(e) => {
            state
                .metrics
                .rejected_calls_total
                .with_label_values(&[e.reason()])
                .inc();
        }
    }

    timer.observe_duration();
    result
}

fn run_locked<R, E>(
    state: &AppState,
    op: impl FnOnce(&mut NodeLedger, Timestamp) -> Result<R, E>,
) -> (Result<R, ApiError>, Vec<ClaimEvent>)
where
    E: Into<ApiError>,
{
    let mut node = state.node.lock();
    if node.halted {
        return (Err(ApiError::Halted), Vec::new());
    }

    let now = node.clock.now();
    let result = op(&mut node.ledger, now).map_err(Into::into);
    let events = node.ledger.drain_events();

    let result = match (result, &state.store) {
        (Ok(value), Some(store)) => {
            let touched: Vec<ClaimIdx> = events.iter().filter_map(ClaimEvent::claim_idx).collect();
            match store.persist(&node.ledger, &touched, now) {
                Ok(()) => Ok(value),
                Err(e) => {
                    tracing::error!(error = %e, "ledger persist failed; halting writes");
                    node.halted = true;
                    Err(e.into())
                }
            }
        }
        (result, _) => result,
    };

    state
        .metrics
        .observe_ledger(node.ledger.claims_count(), node.ledger.custody_held());
    (result, events)
}

fn claim_view(ledger: &NodeLedger, id: ClaimIdx) -> Result<ClaimView, ClaimError> {
    Ok(ClaimView {
        claim_idx: id,
        claim: ledger.claim(id)?.clone(),
    })
}

fn balance_view(ledger: &NodeLedger, address: Address) -> BalanceView {
    BalanceView {
        address,
        balance: ledger.token().balance_of(address),
        authorized: ledger.token().allowance(address, ledger.custody()),
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: 200 while the process is up.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let node = state.node.lock();
    Json(StatusResponse {
        version: state.version.clone(),
        claims_count: node.ledger.claims_count(),
        min_stake: node.ledger.min_stake(),
        custody: node.ledger.custody(),
        custody_held: node.ledger.custody_held(),
        ledger_time: node.clock.last(),
    })
}

async fn claims_count_handler(State(state): State<AppState>) -> impl IntoResponse {
    let count = state.node.lock().ledger.claims_count();
    Json(serde_json::json!({ "claims_count": count }))
}

async fn claim_handler(
    State(state): State<AppState>,
    Path(id): Path<ClaimIdx>,
) -> Result<Json<ClaimView>, ApiError> {
    let node = state.node.lock();
    Ok(Json(claim_view(&node.ledger, id)?))
}

/// `POST /claims`: 201 with the new claim.
async fn create_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateClaimRequest>,
) -> Result<(StatusCode, Json<ClaimView>), ApiError> {
    let view = commit(&state, |ledger, now| {
        let id = ledger.create(req.caller, now, req.claim)?;
        claim_view(ledger, id)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn accept_handler(
    State(state): State<AppState>,
    Path(id): Path<ClaimIdx>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<ClaimView>, ApiError> {
    let view = commit(&state, |ledger, now| {
        ledger.accept(req.caller, now, id)?;
        claim_view(ledger, id)
    })
    .await?;
    Ok(Json(view))
}

async fn resolve_handler(
    State(state): State<AppState>,
    Path(id): Path<ClaimIdx>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ClaimView>, ApiError> {
    let view = commit(&state, |ledger, now| {
        ledger.resolve(req.caller, now, id, req.resolution_note)?;
        claim_view(ledger, id)
    })
    .await?;
    Ok(Json(view))
}

async fn close_handler(
    State(state): State<AppState>,
    Path(id): Path<ClaimIdx>,
    Json(req): Json<CallerRequest>,
) -> Result<Json<ClaimView>, ApiError> {
    let view = commit(&state, |ledger, now| {
        ledger.close(req.caller, now, id)?;
        claim_view(ledger, id)
    })
    .await?;
    Ok(Json(view))
}

async fn min_stake_handler(State(state): State<AppState>) -> impl IntoResponse {
    let min_stake = state.node.lock().ledger.min_stake();
    Json(serde_json::json!({ "min_stake": min_stake }))
}

async fn set_min_stake_handler(
    State(state): State<AppState>,
    Json(req): Json<MinStakeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let min_stake = commit(&state, |ledger, _| {
        ledger.set_min_stake(req.caller, req.amount)?;
        Ok::<_, ClaimError>(ledger.min_stake())
    })
    .await?;
    Ok(Json(serde_json::json!({ "min_stake": min_stake })))
}

async fn balance_handler(
    State(state): State<AppState>,
    Path(address): Path<Address>,
) -> Json<BalanceView> {
    let node = state.node.lock();
    Json(balance_view(&node.ledger, address))
}

async fn approve_handler(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<BalanceView>, ApiError> {
    let view = commit(&state, |ledger, _| {
        let custody = ledger.custody();
        ledger.token_mut().approve(req.caller, custody, req.amount);
        Ok::<_, TokenError>(balance_view(ledger, req.caller))
    })
    .await?;
    Ok(Json(view))
}

async fn mint_handler(
    State(state): State<AppState>,
    Json(req): Json<MintRequest>,
) -> Result<Json<BalanceView>, ApiError> {
    let view = commit(&state, |ledger, _| {
        ledger.token_mut().mint(req.caller, req.to, req.amount)?;
        Ok::<_, TokenError>(balance_view(ledger, req.to))
    })
    .await?;
    Ok(Json(view))
}

/// `GET /ws`: pushes each [`ClaimEvent`] as a JSON text message. Client
/// messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

//! RPC-style HTTP server exposing the points ledger.
//!
//! Run with: `cargo run --example server`
//!
//! The caller is identified by the `x-user-code` header, standing in for a
//! real session collaborator. Decimal inputs (`weight`, `amount`) are
//! strings.
//!
//! ## Endpoints
//!
//! - `POST /users` - Register a user (public, demo only)
//! - `POST /rpc/addRecyclingTransaction`
//! - `POST /rpc/addMoneyToCooperative`
//! - `POST /rpc/sendPointsP2P`
//! - `GET  /rpc/getUserTransactions`
//! - `GET  /rpc/getAvailableRewards` (public)
//! - `GET  /rpc/getUserRewards`
//! - `POST /rpc/exchangePointsForReward`
//! - `POST /rpc/createReward`
//! - `GET  /rpc/getUserPoints`
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:3000/users -H "Content-Type: application/json" \
//!   -d '{"fullName": "Ana", "email": "ana@example.com", "userCode": "ana", "userType": "normal", "canRedeemRewards": true}'
//!
//! curl -X POST http://localhost:3000/rpc/addRecyclingTransaction \
//!   -H "x-user-code: ana" -H "Content-Type: application/json" -d '{"weight": "2.5"}'
//!
//! curl http://localhost:3000/rpc/getUserPoints -H "x-user-code: ana"
//! ```

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use recycle_ledger::api::{
    AddMoneyToCooperative, AddRecyclingTransaction, CreateReward, ErrorBody,
    ExchangePointsForReward, SendPointsP2P,
};
use recycle_ledger::{
    Api, DepositReceipt, Engine, LedgerError, MemoryStore, NewUser, RedemptionReceipt, Reward,
    Session, TransactionView, TransferReceipt, User, UserCode, UserPoints, UserReward,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USER_CODE_HEADER: &str = "x-user-code";

// === Application State ===

/// Shared application state containing the ledger API.
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<Api<MemoryStore>>,
}

impl AppState {
    /// Resolves the caller from the user code header. A missing header or
    /// an unknown code yields no session.
    fn session(&self, headers: &HeaderMap) -> Result<Option<Session>, AppError> {
        let Some(code) = headers
            .get(USER_CODE_HEADER)
            .and_then(|value| value.to_str().ok())
        else {
            return Ok(None);
        };
        Ok(self.api.session_for_code(&UserCode::new(code))?)
    }
}

// === Error Handling ===

/// Wrapper for converting `LedgerError` into HTTP responses.
pub struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LedgerError::NotFound(_) | LedgerError::ReceiverNotFound => StatusCode::NOT_FOUND,
            LedgerError::RoleViolation => StatusCode::FORBIDDEN,
            LedgerError::InvalidAmount | LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LedgerError::InsufficientBalance | LedgerError::InsufficientPoints => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            LedgerError::SelfTransfer | LedgerError::DuplicateUser => StatusCode::CONFLICT,
            LedgerError::NotLoggedIn => StatusCode::UNAUTHORIZED,
            LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

// === Handlers ===

/// POST /users - Register a user.
async fn register_user(
    State(state): State<AppState>,
    Json(user): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = state.api.engine().register_user(user)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn add_recycling_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AddRecyclingTransaction>,
) -> Result<StatusCode, AppError> {
    let session = state.session(&headers)?;
    state
        .api
        .add_recycling_transaction(session.as_ref(), request)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_money_to_cooperative(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AddMoneyToCooperative>,
) -> Result<Json<DepositReceipt>, AppError> {
    let session = state.session(&headers)?;
    Ok(Json(
        state
            .api
            .add_money_to_cooperative(session.as_ref(), request)?,
    ))
}

async fn send_points_p2p(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendPointsP2P>,
) -> Result<Json<TransferReceipt>, AppError> {
    let session = state.session(&headers)?;
    Ok(Json(state.api.send_points_p2p(session.as_ref(), request)?))
}

async fn get_user_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<TransactionView>>, AppError> {
    let session = state.session(&headers)?;
    Ok(Json(state.api.get_user_transactions(session.as_ref())?))
}

async fn get_available_rewards(
    State(state): State<AppState>,
) -> Result<Json<Vec<Reward>>, AppError> {
    Ok(Json(state.api.get_available_rewards()?))
}

async fn get_user_rewards(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<UserReward>>, AppError> {
    let session = state.session(&headers)?;
    Ok(Json(state.api.get_user_rewards(session.as_ref())?))
}

async fn exchange_points_for_reward(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ExchangePointsForReward>,
) -> Result<Json<RedemptionReceipt>, AppError> {
    let session = state.session(&headers)?;
    Ok(Json(
        state
            .api
            .exchange_points_for_reward(session.as_ref(), request)?,
    ))
}

async fn create_reward(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateReward>,
) -> Result<StatusCode, AppError> {
    let session = state.session(&headers)?;
    state.api.create_reward(session.as_ref(), request)?;
    Ok(StatusCode::CREATED)
}

async fn get_user_points(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserPoints>, AppError> {
    let session = state.session(&headers)?;
    Ok(Json(state.api.get_user_points(session.as_ref())?))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(register_user))
        .route("/rpc/addRecyclingTransaction", post(add_recycling_transaction))
        .route("/rpc/addMoneyToCooperative", post(add_money_to_cooperative))
        .route("/rpc/sendPointsP2P", post(send_points_p2p))
        .route("/rpc/getUserTransactions", get(get_user_transactions))
        .route("/rpc/getAvailableRewards", get(get_available_rewards))
        .route("/rpc/getUserRewards", get(get_user_rewards))
        .route("/rpc/exchangePointsForReward", post(exchange_points_for_reward))
        .route("/rpc/createReward", post(create_reward))
        .route("/rpc/getUserPoints", get(get_user_points))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=info,recycle_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState {
        api: Arc::new(Api::new(Engine::in_memory())),
    };
    let app = create_router(state);

    let addr = std::env::var("LEDGER_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_owned());
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "ledger RPC server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Integration tests for the RPC server with concurrent requests.
//!
//! These tests verify that the server handles many concurrent requests
//! while keeping balances consistent.

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use recycle_ledger::api::{AddRecyclingTransaction, ErrorBody, SendPointsP2P};
use recycle_ledger::{
    Api, Engine, LedgerError, MemoryStore, NewUser, Session, TransferReceipt, User, UserCode,
    UserPoints, UserType,
};
use reqwest::Client;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

// === Server Setup (duplicated from the demo server for test isolation) ===

#[derive(Clone)]
pub struct AppState {
    pub api: Arc<Api<MemoryStore>>,
}

impl AppState {
    fn session(&self, headers: &HeaderMap) -> Result<Option<Session>, AppError> {
        let Some(code) = headers.get("x-user-code").and_then(|v| v.to_str().ok()) else {
            return Ok(None);
        };
        Ok(self.api.session_for_code(&UserCode::new(code))?)
    }
}

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

async fn register_user(
    State(state): State<AppState>,
    Json(user): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    Ok((StatusCode::CREATED, Json(state.api.engine().register_user(user)?)))
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

async fn send_points_p2p(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendPointsP2P>,
) -> Result<Json<TransferReceipt>, AppError> {
    let session = state.session(&headers)?;
    Ok(Json(state.api.send_points_p2p(session.as_ref(), request)?))
}

async fn get_user_points(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserPoints>, AppError> {
    let session = state.session(&headers)?;
    Ok(Json(state.api.get_user_points(session.as_ref())?))
}

async fn get_available_rewards(
    State(state): State<AppState>,
) -> Result<Json<Vec<recycle_ledger::Reward>>, AppError> {
    Ok(Json(state.api.get_available_rewards()?))
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(register_user))
        .route("/rpc/addRecyclingTransaction", post(add_recycling_transaction))
        .route("/rpc/sendPointsP2P", post(send_points_p2p))
        .route("/rpc/getUserPoints", get(get_user_points))
        .route("/rpc/getAvailableRewards", get(get_available_rewards))
        .with_state(state)
}

/// Test server that binds to an ephemeral port.
struct TestServer {
    base_url: String,
    api: Arc<Api<MemoryStore>>,
    client: Client,
}

impl TestServer {
    async fn new() -> Self {
        let api = Arc::new(Api::new(Engine::in_memory()));
        let app = create_router(AppState { api: api.clone() });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Loopback only; ignore any proxy configured in the environment
        let client = Client::builder().no_proxy().build().unwrap();

        // Wait for server to be ready by polling with retries
        let health_url = format!("{}/rpc/getAvailableRewards", base_url);
        for _ in 0..50 {
            match client.get(&health_url).send().await {
                Ok(_) => break,
                Err(_) => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
            }
        }

        TestServer {
            base_url,
            api,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn register(&self, code: &str, user_type: UserType) -> User {
        let response = self
            .client
            .post(self.url("/users"))
            .json(&NewUser::new(
                code,
                format!("User {code}"),
                format!("{code}@example.com"),
                user_type,
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED.as_u16());
        response.json().await.unwrap()
    }
}

// === Tests ===

#[tokio::test]
async fn unauthenticated_request_rejected() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/rpc/getUserPoints"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED.as_u16());

    let body: ErrorBody = response.json().await.unwrap();
    assert_eq!(body.code, "NOT_LOGGED_IN");
}

#[tokio::test]
async fn recycle_and_transfer_over_http() {
    let server = TestServer::new().await;
    let ana = server.register("ana", UserType::Normal).await;
    let bia = server.register("bia", UserType::Normal).await;

    let response = server
        .client
        .post(server.url("/rpc/addRecyclingTransaction"))
        .header("x-user-code", ana.user_code.as_str())
        .json(&serde_json::json!({ "weight": "10" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT.as_u16());

    let response = server
        .client
        .post(server.url("/rpc/sendPointsP2P"))
        .header("x-user-code", ana.user_code.as_str())
        .json(&serde_json::json!({ "receiverId": "bia", "amountPoints": 30 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK.as_u16());
    let receipt: TransferReceipt = response.json().await.unwrap();
    assert_eq!(receipt.receiver_id, bia.id);

    let points: UserPoints = server
        .client
        .get(server.url("/rpc/getUserPoints"))
        .header("x-user-code", "ana")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(points.points, 70);

    let response = server
        .client
        .post(server.url("/rpc/sendPointsP2P"))
        .header("x-user-code", "ana")
        .json(&serde_json::json!({ "receiverId": "ana", "amountPoints": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT.as_u16());
}

/// Concurrent recycling by many users.
/// Each user should hold exactly the sum of their deposits.
#[tokio::test]
async fn concurrent_recycling_by_many_users() {
    let server = TestServer::new().await;

    const NUM_USERS: usize = 20;
    const DEPOSITS_PER_USER: usize = 10;
    const BATCH_SIZE: usize = 50; // Limit concurrent connections

    let mut codes = Vec::with_capacity(NUM_USERS);
    for i in 0..NUM_USERS {
        codes.push(server.register(&format!("user{i}"), UserType::Normal).await.user_code);
    }

    let requests: Vec<UserCode> = codes
        .iter()
        .flat_map(|code| std::iter::repeat_n(code.clone(), DEPOSITS_PER_USER))
        .collect();

    let start = Instant::now();
    for batch in requests.chunks(BATCH_SIZE) {
        let handles: Vec<_> = batch
            .iter()
            .cloned()
            .map(|code| {
                let client = server.client.clone();
                let url = server.url("/rpc/addRecyclingTransaction");
                tokio::spawn(async move {
                    client
                        .post(&url)
                        .header("x-user-code", code.as_str())
                        .json(&serde_json::json!({ "weight": "1.5" }))
                        .send()
                        .await
                        .unwrap()
                        .status()
                })
            })
            .collect();

        for status in futures::future::join_all(handles).await {
            assert_eq!(status.unwrap(), StatusCode::NO_CONTENT.as_u16());
        }
    }
    println!(
        "{} recycling requests in {:?}",
        requests.len(),
        start.elapsed()
    );

    for user in server.api.engine().users().unwrap() {
        assert_eq!(user.total_points, 15 * DEPOSITS_PER_USER as i64);
    }
}

/// Concurrent transfers out of one balance never overdraw it.
#[tokio::test]
async fn concurrent_transfers_never_overdraw() {
    let server = TestServer::new().await;
    let ana = server.register("ana", UserType::Normal).await;
    server.register("bia", UserType::Normal).await;
    server
        .api
        .engine()
        .record_recycling(ana.id, rust_decimal::Decimal::TEN)
        .unwrap();

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let client = server.client.clone();
            let url = server.url("/rpc/sendPointsP2P");
            tokio::spawn(async move {
                client
                    .post(&url)
                    .header("x-user-code", "ana")
                    .json(&serde_json::json!({ "receiverId": "bia", "amountPoints": 7 }))
                    .send()
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();

    let statuses: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|status| status.unwrap())
        .collect();

    let accepted = statuses
        .iter()
        .filter(|status| **status == StatusCode::OK.as_u16())
        .count();
    let rejected = statuses
        .iter()
        .filter(|status| **status == StatusCode::UNPROCESSABLE_ENTITY.as_u16())
        .count();
    assert_eq!(accepted, 14);
    assert_eq!(accepted + rejected, statuses.len());

    let engine = server.api.engine();
    assert_eq!(engine.get_user_points(ana.id).unwrap().points, 2);
    let bia = engine.get_user_by_code(&UserCode::new("bia")).unwrap().unwrap();
    assert_eq!(bia.total_points, 98);
}

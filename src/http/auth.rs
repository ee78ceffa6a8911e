use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::extract::Json;
use super::session::{clear_cookie, session_cookie, session_token, CurrentUser};
use super::AppState;
use crate::error::{LedgerError, Result};
use crate::ledger::users::{self, SetupRequest};
use crate::model::{Actor, User};

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Serialize)]
pub struct SetupStatus {
    needs_setup: bool,
}

pub async fn setup_status(State(state): State<AppState>) -> Result<Json<SetupStatus>> {
    let needs_setup = state.db.call(|tx| users::needs_setup(tx)).await?;
    Ok(Json(SetupStatus { needs_setup }))
}

fn signed_in(state: &AppState, user: User, status: StatusCode) -> Response {
    let token = state.sessions.create(user.id);
    let cookie = session_cookie(&token, state.sessions.ttl(), state.config.secure_cookies);
    (status, [(SET_COOKIE, cookie)], Json(user)).into_response()
}

/// Creates the first administrator and signs them in.
pub async fn setup(State(state): State<AppState>, Json(req): Json<SetupRequest>) -> Result<Response> {
    let user = state.db.call(move |tx| users::setup_admin(tx, &req)).await?;
    info!("initial administrator {} created", user.username);
    Ok(signed_in(&state, user, StatusCode::CREATED))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Result<Response> {
    let username = req.username.clone();
    let result = state
        .db
        .call(move |tx| users::authenticate(tx, &req.username, &req.password))
        .await;
    match result {
        Ok(user) => {
            info!("user {} signed in", user.username);
            Ok(signed_in(&state, user, StatusCode::OK))
        }
        Err(LedgerError::InvalidCredentials) => {
            warn!("failed login for {username:?}");
            Err(LedgerError::InvalidCredentials)
        }
        Err(e) => Err(e),
    }
}

pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    headers: HeaderMap,
) -> Result<Response> {
    if let Some(token) = session_token(&headers) {
        state.sessions.revoke(&token);
    }
    let username = actor.username.clone();
    state.db.call(move |tx| users::record_logout(tx, &actor)).await?;
    info!("user {username} signed out");
    Ok((
        [(SET_COOKIE, clear_cookie(state.config.secure_cookies))],
        Json(json!({ "message": "signed out" })),
    )
        .into_response())
}

pub async fn me(CurrentUser(actor): CurrentUser) -> Json<Actor> {
    Json(actor)
}

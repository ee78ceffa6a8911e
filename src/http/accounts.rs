//! User administration and the caller's own profile.

use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::extract::{Json, Path};
use super::session::{AdminUser, CurrentUser};
use super::AppState;
use crate::error::Result;
use crate::ledger::users::{self, NewUser, PasswordChange, ProfileUpdate, UserEdit};
use crate::model::{Theme, User};

pub async fn list_users(State(state): State<AppState>, _admin: AdminUser) -> Result<Json<Vec<User>>> {
    Ok(Json(state.db.call(|tx| users::list_users(tx)).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<User>)> {
    let user = state.db.call(move |tx| users::create_user(tx, &actor, &req)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn edit_user(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<UserEdit>,
) -> Result<Json<User>> {
    Ok(Json(state.db.call(move |tx| users::edit_user(tx, &actor, id, &req)).await?))
}

#[derive(Serialize)]
pub struct PasswordReset {
    username: String,
    temporary_password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<PasswordReset>> {
    let (username, temporary_password) = state
        .db
        .call(move |tx| {
            let temp = users::reset_password(tx, &actor, id)?;
            Ok((users::get_user(tx, id)?.username, temp))
        })
        .await?;
    Ok(Json(PasswordReset {
        username,
        temporary_password,
    }))
}

/// Deletes the account and ends its sessions.
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<User>> {
    let user = state.db.call(move |tx| users::delete_user(tx, &actor, id)).await?;
    state.sessions.revoke_user(user.id);
    Ok(Json(user))
}

pub async fn profile(State(state): State<AppState>, CurrentUser(actor): CurrentUser) -> Result<Json<User>> {
    Ok(Json(state.db.call(move |tx| users::get_user(tx, actor.user_id)).await?))
}

pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(req): Json<ProfileUpdate>,
) -> Result<Json<User>> {
    Ok(Json(state.db.call(move |tx| users::update_profile(tx, &actor, &req)).await?))
}

pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(req): Json<PasswordChange>,
) -> Result<Json<Value>> {
    state.db.call(move |tx| users::change_password(tx, &actor, &req)).await?;
    Ok(Json(json!({ "message": "password changed" })))
}

#[derive(Deserialize)]
pub struct ThemeRequest {
    theme: String,
}

#[derive(Serialize)]
pub struct ThemeResponse {
    theme: Theme,
}

pub async fn set_theme(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(req): Json<ThemeRequest>,
) -> Result<Json<ThemeResponse>> {
    let theme = state.db.call(move |tx| users::set_theme(tx, &actor, &req.theme)).await?;
    Ok(Json(ThemeResponse { theme }))
}

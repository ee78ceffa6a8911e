use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

use super::extract::{Json, Path, Query};
use super::session::{AdminUser, CurrentUser};
use super::AppState;
use crate::error::Result;
use crate::ledger::catalog::{
    self, DeletedReferences, MergeOutcome, MergeRequest, ProductReferences, ProductUpdate, ReferenceSelection,
};
use crate::model::{Product, ProductUsage};

pub async fn list(State(state): State<AppState>, _user: CurrentUser) -> Result<Json<Vec<Product>>> {
    Ok(Json(state.db.call(|tx| catalog::list_products(tx)).await?))
}

#[derive(Deserialize)]
pub struct SuggestQuery {
    #[serde(default)]
    q: String,
}

pub async fn suggest(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<SuggestQuery>,
) -> Result<Json<Vec<Product>>> {
    Ok(Json(state.db.call(move |tx| catalog::suggest(tx, &query.q)).await?))
}

#[derive(Deserialize)]
pub struct NewProduct {
    name: String,
    brand: String,
}

pub async fn create(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Json(req): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>)> {
    let product = state
        .db
        .call(move |tx| catalog::create_product(tx, &actor, &req.name, &req.brand))
        .await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<i64>,
    Json(req): Json<ProductUpdate>,
) -> Result<Json<Product>> {
    Ok(Json(
        state.db.call(move |tx| catalog::update_product(tx, &actor, id, &req)).await?,
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<Product>> {
    Ok(Json(state.db.call(move |tx| catalog::delete_product(tx, &actor, id)).await?))
}

pub async fn usage(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<ProductUsage>> {
    Ok(Json(state.db.call(move |tx| catalog::usage(tx, id)).await?))
}

pub async fn references(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i64>,
) -> Result<Json<ProductReferences>> {
    Ok(Json(state.db.call(move |tx| catalog::references(tx, id)).await?))
}

pub async fn delete_references(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Path(id): Path<i64>,
    Json(selection): Json<ReferenceSelection>,
) -> Result<Json<DeletedReferences>> {
    Ok(Json(
        state
            .db
            .call(move |tx| catalog::delete_references(tx, &actor, id, &selection))
            .await?,
    ))
}

pub async fn merge(
    State(state): State<AppState>,
    AdminUser(actor): AdminUser,
    Json(req): Json<MergeRequest>,
) -> Result<Json<MergeOutcome>> {
    Ok(Json(state.db.call(move |tx| catalog::merge_products(tx, &actor, &req)).await?))
}

use axum::extract::State;
use axum::http::StatusCode;
use serde::Deserialize;

use super::extract::{Json, Path, Query};
use super::session::CurrentUser;
use super::AppState;
use crate::error::Result;
use crate::ledger::inventory::{self, ReceiptEditLine, ReceiptLineInput};
use crate::model::{DateRange, StockReceipt};

#[derive(Deserialize)]
pub struct RangeQuery {
    start: Option<String>,
    end: Option<String>,
}

pub async fn history(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<StockReceipt>>> {
    let range = DateRange::parse(query.start.as_deref(), query.end.as_deref())?;
    Ok(Json(state.db.call(move |tx| inventory::history(tx, &range)).await?))
}

#[derive(Deserialize)]
pub struct NewReceipt {
    items: Vec<ReceiptLineInput>,
}

pub async fn create(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(req): Json<NewReceipt>,
) -> Result<(StatusCode, Json<StockReceipt>)> {
    let receipt = state
        .db
        .call(move |tx| inventory::create_receipt(tx, &actor, &req.items))
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn detail(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<StockReceipt>> {
    Ok(Json(state.db.call(move |tx| inventory::get_receipt(tx, id)).await?))
}

#[derive(Deserialize)]
pub struct ReceiptEdit {
    items: Vec<ReceiptEditLine>,
}

pub async fn edit(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<ReceiptEdit>,
) -> Result<Json<StockReceipt>> {
    Ok(Json(
        state
            .db
            .call(move |tx| inventory::edit_receipt(tx, &actor, id, &req.items))
            .await?,
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<StockReceipt>> {
    Ok(Json(state.db.call(move |tx| inventory::delete_receipt(tx, &actor, id)).await?))
}

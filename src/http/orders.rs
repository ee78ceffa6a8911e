use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;

use super::extract::{Json, Path};
use super::session::CurrentUser;
use super::{blocking, pdf_response, AppState};
use crate::error::Result;
use crate::ledger::orders::{self, NewOrder, OrderEdit};
use crate::model::{OrderDetail, OrderSummary};
use crate::report;

pub async fn list(State(state): State<AppState>, _user: CurrentUser) -> Result<Json<Vec<OrderSummary>>> {
    Ok(Json(state.db.call(|tx| orders::list_orders(tx)).await?))
}

pub async fn create(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(req): Json<NewOrder>,
) -> Result<(StatusCode, Json<OrderDetail>)> {
    let order = state.db.call(move |tx| orders::create_order(tx, &actor, &req)).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn detail(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<OrderDetail>> {
    Ok(Json(state.db.call(move |tx| orders::order_detail(tx, id)).await?))
}

pub async fn by_number(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(number): Path<String>,
) -> Result<Json<OrderDetail>> {
    Ok(Json(
        state.db.call(move |tx| orders::order_detail_by_number(tx, &number)).await?,
    ))
}

pub async fn edit(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<OrderEdit>,
) -> Result<Json<OrderDetail>> {
    Ok(Json(state.db.call(move |tx| orders::edit_order(tx, &actor, id, &req)).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<OrderSummary>> {
    Ok(Json(state.db.call(move |tx| orders::delete_order(tx, &actor, id)).await?))
}

pub async fn pdf(State(state): State<AppState>, _user: CurrentUser, Path(id): Path<i64>) -> Result<Response> {
    let order = state.db.call(move |tx| orders::order_detail(tx, id)).await?;
    let file_name = format!("order_{}.pdf", order.number.replace(['/', '\\', '"'], "_"));
    let photos = state.photos.clone();
    let bytes = blocking(move || report::order_pdf(&order, &photos)).await?;
    Ok(pdf_response(file_name, bytes))
}

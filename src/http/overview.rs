use axum::extract::State;

use super::extract::{Json, Query};
use super::session::CurrentUser;
use super::AppState;
use crate::error::Result;
use crate::ledger::audit::{self, LogFilter};
use crate::ledger::dashboard::{self, DashboardStats};
use crate::model::LogEntry;

pub async fn dashboard(State(state): State<AppState>, _user: CurrentUser) -> Result<Json<DashboardStats>> {
    let threshold = state.config.critical_stock;
    Ok(Json(state.db.call(move |tx| dashboard::stats(tx, threshold)).await?))
}

pub async fn logs(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(filter): Query<LogFilter>,
) -> Result<Json<Vec<LogEntry>>> {
    Ok(Json(state.db.call(move |tx| audit::query(tx, &filter)).await?))
}

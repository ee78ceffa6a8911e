use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::Response;
use log::info;

use super::extract::{Json, Path, Query};
use super::session::CurrentUser;
use super::{blocking, pdf_response, AppState};
use crate::error::{LedgerError, Result};
use crate::ledger::dispatch::{self, DispatchEdit, DispatchFilter, DispatchOutcome, NewDispatch};
use crate::model::{DispatchBatch, DispatchPhoto, PhotoStage};
use crate::report;

pub async fn history(
    State(state): State<AppState>,
    _user: CurrentUser,
    Query(filter): Query<DispatchFilter>,
) -> Result<Json<Vec<DispatchBatch>>> {
    Ok(Json(state.db.call(move |tx| dispatch::history(tx, &filter)).await?))
}

pub async fn create(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Json(req): Json<NewDispatch>,
) -> Result<(StatusCode, Json<DispatchOutcome>)> {
    let outcome = state
        .db
        .call(move |tx| dispatch::create_dispatch(tx, &actor, &req))
        .await?;
    if !outcome.warnings.is_empty() {
        info!("dispatch #{} shipped short on {} line(s)", outcome.batch_id, outcome.warnings.len());
    }
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn detail(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<DispatchBatch>> {
    Ok(Json(state.db.call(move |tx| dispatch::get_dispatch(tx, id)).await?))
}

pub async fn edit(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<DispatchEdit>,
) -> Result<Json<DispatchBatch>> {
    Ok(Json(
        state.db.call(move |tx| dispatch::edit_dispatch(tx, &actor, id, &req)).await?,
    ))
}

/// Deletes the batch, then its photo files once the rows are gone.
pub async fn delete(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<DispatchBatch>> {
    let batch = state.db.call(move |tx| dispatch::delete_dispatch(tx, &actor, id)).await?;
    let photos = state.photos.clone();
    let paths: Vec<String> = batch.photos.iter().map(|p| p.path.clone()).collect();
    blocking(move || paths.iter().for_each(|p| photos.remove(p))).await?;
    Ok(Json(batch))
}

pub async fn photos(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<DispatchPhoto>>> {
    Ok(Json(
        state
            .db
            .call(move |tx| {
                dispatch::ensure_exists(tx, id)?;
                dispatch::list_photos(tx, id)
            })
            .await?,
    ))
}

fn bad_upload(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::validation(format!("malformed upload: {e}"))
}

/// Multipart upload with a `stage` field (exit or delivery) and a `photo`
/// file field.
pub async fn upload_photo(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<i64>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<DispatchPhoto>)> {
    let mut multipart = multipart.map_err(bad_upload)?;
    let mut stage = None;
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_upload)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("stage") => stage = Some(field.text().await.map_err(bad_upload)?),
            Some("photo") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(bad_upload)?;
                upload = Some((file_name, bytes));
            }
            _ => {}
        }
    }
    let stage = stage
        .as_deref()
        .and_then(PhotoStage::parse)
        .ok_or_else(|| LedgerError::validation("stage must be 'exit' or 'delivery'"))?;
    let (file_name, bytes) = upload.ok_or_else(|| LedgerError::validation("no photo was uploaded"))?;

    state.db.call(move |tx| dispatch::ensure_exists(tx, id)).await?;
    let photos = state.photos.clone();
    let stored = blocking(move || photos.save(id, stage, &file_name, &bytes)).await??;

    // The file is written before the row; drop it if the row never commits.
    let path = stored.clone();
    let photo = match state
        .db
        .call(move |tx| dispatch::add_photo(tx, &actor, id, stage, &path))
        .await
    {
        Ok(photo) => photo,
        Err(e) => {
            let photos = state.photos.clone();
            blocking(move || photos.remove(&stored)).await?;
            return Err(e);
        }
    };
    Ok((StatusCode::CREATED, Json(photo)))
}

pub async fn delete_photo(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    Path((id, photo_id)): Path<(i64, i64)>,
) -> Result<Json<DispatchPhoto>> {
    let photo = state
        .db
        .call(move |tx| dispatch::remove_photo(tx, &actor, id, photo_id))
        .await?;
    let photos = state.photos.clone();
    let path = photo.path.clone();
    blocking(move || photos.remove(&path)).await?;
    Ok(Json(photo))
}

pub async fn pdf(State(state): State<AppState>, _user: CurrentUser, Path(id): Path<i64>) -> Result<Response> {
    let batch = state.db.call(move |tx| dispatch::get_dispatch(tx, id)).await?;
    let photos = state.photos.clone();
    let bytes = blocking(move || report::dispatch_pdf(&batch, &photos)).await?;
    Ok(pdf_response(format!("dispatch_{id}.pdf"), bytes))
}

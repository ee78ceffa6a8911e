//! JSON API over the ledger services.

mod accounts;
mod auth;
mod dispatches;
pub mod error;
mod extract;
mod orders;
mod overview;
mod products;
mod receipts;
pub mod session;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use log::{log, Level};
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::db::Database;
use crate::error::{LedgerError, Result};
use crate::photos::PhotoStore;
use session::{CurrentUser, SessionStore};

/// Shared handles every request needs.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub photos: PhotoStore,
    pub sessions: SessionStore,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Database, photos: PhotoStore, config: Config) -> Self {
        AppState {
            db,
            photos,
            sessions: SessionStore::new(config.session_ttl),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let uploads = Router::new()
        .nest_service("/uploads", ServeDir::new(state.photos.dir()))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_login));

    Router::new()
        .route("/healthz", get(auth::healthz))
        .route("/api/setup", get(auth::setup_status).post(auth::setup))
        .route("/api/login", post(auth::login))
        .route("/api/logout", post(auth::logout))
        .route("/api/me", get(auth::me))
        .route("/api/dashboard", get(overview::dashboard))
        .route("/api/logs", get(overview::logs))
        .route("/api/products", get(products::list).post(products::create))
        .route("/api/products/suggest", get(products::suggest))
        .route("/api/products/merge", post(products::merge))
        .route("/api/products/:id", put(products::update).delete(products::delete))
        .route("/api/products/:id/usage", get(products::usage))
        .route("/api/products/:id/references", get(products::references))
        .route("/api/products/:id/references/delete", post(products::delete_references))
        .route("/api/receipts", get(receipts::history).post(receipts::create))
        .route(
            "/api/receipts/:id",
            get(receipts::detail).put(receipts::edit).delete(receipts::delete),
        )
        .route("/api/dispatches", get(dispatches::history).post(dispatches::create))
        .route(
            "/api/dispatches/:id",
            get(dispatches::detail).put(dispatches::edit).delete(dispatches::delete),
        )
        .route(
            "/api/dispatches/:id/photos",
            get(dispatches::photos).post(dispatches::upload_photo),
        )
        .route(
            "/api/dispatches/:id/photos/:photo_id",
            axum::routing::delete(dispatches::delete_photo),
        )
        .route("/api/dispatches/:id/pdf", get(dispatches::pdf))
        .route("/api/orders", get(orders::list).post(orders::create))
        .route("/api/orders/number/:number", get(orders::by_number))
        .route(
            "/api/orders/:id",
            get(orders::detail).put(orders::edit).delete(orders::delete),
        )
        .route("/api/orders/:id/pdf", get(orders::pdf))
        .route("/api/users", get(accounts::list_users).post(accounts::create_user))
        .route(
            "/api/users/:id",
            put(accounts::edit_user).delete(accounts::delete_user),
        )
        .route("/api/users/:id/reset-password", post(accounts::reset_password))
        .route("/api/profile", get(accounts::profile).put(accounts::update_profile))
        .route("/api/profile/password", post(accounts::change_password))
        .route("/api/profile/theme", post(accounts::set_theme))
        .merge(uploads)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

async fn require_login(_user: CurrentUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    let status = response.status();
    let elapsed = started.elapsed().as_millis();
    log!(request_level(status), "{method} {path} -> {status} ({elapsed} ms)");
    response
}

/// Rejected and failed requests are logged at `warn`.
fn request_level(status: StatusCode) -> Level {
    if status.is_client_error() || status.is_server_error() {
        Level::Warn
    } else {
        Level::Info
    }
}

/// Runs CPU- or disk-bound work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LedgerError::Internal(format!("background task failed: {e}")))
}

fn pdf_response(file_name: String, bytes: Vec<u8>) -> Response {
    (
        [
            (CONTENT_TYPE, "application/pdf".to_string()),
            (CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
        ],
        bytes,
    )
        .into_response()
}

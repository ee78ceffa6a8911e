use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;

use crate::error::LedgerError;

impl LedgerError {
    pub fn status(&self) -> StatusCode {
        match self {
            LedgerError::Validation(_) | LedgerError::InsufficientStock { .. } => StatusCode::BAD_REQUEST,
            LedgerError::InvalidCredentials | LedgerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            LedgerError::Forbidden => StatusCode::FORBIDDEN,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::ProductInUse { .. } | LedgerError::Conflict(_) => StatusCode::CONFLICT,
            LedgerError::Database(_)
            | LedgerError::Io(_)
            | LedgerError::PasswordHash(_)
            | LedgerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `{"error": "..."}`, plus the reference counts when a product is in use.
/// Server-side failures are logged and reported without their details.
impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            LedgerError::ProductInUse { usage, .. } => json!({ "error": self.to_string(), "usage": usage }),
            _ if status.is_server_error() => {
                error!("request failed: {self}");
                json!({ "error": "internal server error" })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProductUsage;

    #[test]
    fn maps_variants_to_status_codes() {
        assert_eq!(LedgerError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            LedgerError::InsufficientStock { line: 1, product: "p".into(), requested: 2, available: 1 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(LedgerError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(LedgerError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(LedgerError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            LedgerError::ProductInUse { product_id: 1, usage: ProductUsage::new(1, 0, 0) }.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(LedgerError::Internal("boom".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

use thiserror::Error;

use crate::model::ProductUsage;

/// Errors raised by the ledger services. The HTTP layer maps each variant
/// onto a status code; see `http::error`.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("authentication required")]
    Unauthenticated,

    #[error("administrator privileges required")]
    Forbidden,

    /// A line would leave the product with negative stock.
    #[error("line {line}: insufficient stock for {product} (requested {requested}, available {available})")]
    InsufficientStock {
        line: usize,
        product: String,
        requested: i64,
        available: i64,
    },

    /// Delete refused while transactional records still point at the product.
    #[error("product {product_id} is referenced by {} record(s); merge it into another product first", .usage.total)]
    ProductInUse { product_id: i64, usage: ProductUsage },

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        LedgerError::NotFound(msg.into())
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

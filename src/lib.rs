//! Warehouse ledger: products, stock receipts, dispatches with photo
//! evidence, purchase orders and an audit trail, served as a JSON API.

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod ledger;
pub mod model;
pub mod photos;
pub mod report;

pub use config::Config;
pub use db::Database;
pub use error::{LedgerError, Result};
pub use http::{build_router, AppState};

//! Business operations over the warehouse database.
//!
//! Every function takes a `&Connection` (pass the `Transaction` from
//! [`crate::db::Database::transaction`]) and, for mutations, the acting
//! user. Stock changes and their audit rows land in the caller's
//! transaction, so a failed request leaves nothing behind.

pub mod audit;
pub mod catalog;
pub mod clients;
pub mod dashboard;
pub mod dispatch;
pub mod inventory;
pub mod orders;
pub mod users;

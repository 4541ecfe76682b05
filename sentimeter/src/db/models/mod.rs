//! Database record models.
//!
//! Row structs deriving `sqlx::FromRow` stay private to their repository in
//! [`crate::db::handlers`]; this module holds the request and outcome types repositories
//! exchange with callers.

pub mod balances;

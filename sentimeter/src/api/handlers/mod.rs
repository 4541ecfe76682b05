//! HTTP request handlers for all API endpoints.
//!
//! Handlers deserialize the request, call into the [`crate::analyzer::Analyzer`] or
//! the shared ledger and cache, and serialize the outcome. Errors are returned as
//! [`crate::errors::Error`], which renders the JSON error body.
//!
//! # Handler Modules
//!
//! - [`analyze`]: single and batch analysis, billed per host
//! - [`hosts`]: host balances, credits, status, transactions and refunds
//! - [`cache`]: cache statistics and pattern invalidation

pub mod analyze;
pub mod cache;
pub mod hosts;

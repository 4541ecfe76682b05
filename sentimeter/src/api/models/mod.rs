//! API request and response data models.
//!
//! - [`analysis`]: analyze and batch payloads, plus the cached analysis shape
//! - [`hosts`]: balance administration payloads
//! - [`cache`]: cache administration payloads
//! - [`pagination`]: offset pagination shared by list endpoints

pub mod analysis;
pub mod cache;
pub mod hosts;
pub mod pagination;

//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Analysis** (`/api/analyze`, `/api/batch`): metered classification
//! - **Hosts** (`/admin/api/v1/hosts/*`, `/admin/api/v1/transactions/*`): prepaid balances
//! - **Cache** (`/admin/api/v1/cache/*`): statistics and invalidation
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa` annotations. The analysis API is
//! browsable at `/docs` and the admin API at `/admin/docs`.

pub mod handlers;
pub mod models;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct CacheDeleteQuery {
    /// Glob over analysis keys (`*`, `?`, `[..]`). Keys outside the analysis namespace
    /// are never deleted.
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CacheDeleteResponse {
    pub pattern: String,
    pub deleted: u64,
}

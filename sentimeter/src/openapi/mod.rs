//! OpenAPI documentation configuration.
//!
//! This module provides OpenAPI documentation for the two API surfaces:
//! - [`analysis::AnalysisApiDoc`]: metered analysis API at `/api/*`, served at `/docs`
//! - [`admin::AdminApiDoc`]: balance and cache administration at `/admin/api/v1/*`,
//!   served at `/admin/docs`

pub mod admin;
pub mod analysis;

pub use admin::AdminApiDoc;
pub use analysis::AnalysisApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use utoipa::OpenApi;

    #[test]
    fn test_documents_list_every_route() {
        let analysis = AnalysisApiDoc::openapi();
        assert!(analysis.paths.paths.contains_key("/api/analyze"));
        assert!(analysis.paths.paths.contains_key("/api/batch"));

        let admin = AdminApiDoc::openapi();
        for path in [
            "/hosts",
            "/hosts/{host}",
            "/hosts/{host}/credits",
            "/hosts/{host}/transactions",
            "/transactions/{id}/refund",
            "/cache/stats",
            "/cache",
        ] {
            assert!(admin.paths.paths.contains_key(path), "missing {path}");
        }
    }
}

//! OpenAPI documentation for the admin API.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/admin/api/v1", description = "Admin API server")
    ),
    paths(
        api::handlers::hosts::list_hosts,
        api::handlers::hosts::get_host,
        api::handlers::hosts::add_credits,
        api::handlers::hosts::update_host,
        api::handlers::hosts::list_host_transactions,
        api::handlers::hosts::refund_transaction,
        api::handlers::cache::get_cache_stats,
        api::handlers::cache::delete_cache_entries,
    ),
    components(schemas(
        api::models::hosts::CreditsCreate,
        api::models::hosts::HostStatusUpdate,
        api::models::hosts::RefundCreate,
        api::models::cache::CacheDeleteResponse,
        crate::ledger::HostBalance,
        crate::ledger::BalanceTransaction,
        crate::ledger::TransactionType,
        crate::ledger::Credit,
        crate::ledger::Refund,
        crate::cache::CacheStats,
    )),
    tags(
        (name = "hosts", description = "Prepaid host balances: credits, status, transaction history and refunds"),
        (name = "cache", description = "Analysis cache statistics and invalidation"),
    ),
    info(
        title = "Sentimeter Admin API",
        description = "Balance and cache administration",
    )
)]
pub struct AdminApiDoc;

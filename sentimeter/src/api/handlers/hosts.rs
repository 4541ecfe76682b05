//! HTTP handlers for host balance administration.

use crate::{
    AppState,
    api::models::{
        hosts::{CreditsCreate, HostStatusUpdate, RefundCreate},
        pagination::{PaginatedResponse, Pagination},
    },
    errors::{Error, Result},
    ledger::{BalanceTransaction, Credit, CreditGrant, HostBalance, Refund},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

/// List all host balances
#[utoipa::path(
    get,
    path = "/hosts",
    tag = "hosts",
    summary = "List host balances",
    responses(
        (status = 200, description = "All known hosts", body = Vec<HostBalance>),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_hosts(State(state): State<AppState>) -> Result<(StatusCode, Json<Vec<HostBalance>>)> {
    let hosts = state.ledger.get_all_hosts().await?;
    Ok((StatusCode::OK, Json(hosts)))
}

/// Get one host's balance
#[utoipa::path(
    get,
    path = "/hosts/{host}",
    tag = "hosts",
    summary = "Get a host balance",
    params(("host" = String, Path, description = "Host identifier")),
    responses(
        (status = 200, description = "Host balance", body = HostBalance),
        (status = 404, description = "Host not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_host(State(state): State<AppState>, Path(host): Path<String>) -> Result<(StatusCode, Json<HostBalance>)> {
    let balance = state.ledger.get_host_balance(&host).await?.ok_or_else(|| Error::NotFound {
        resource: "Host".to_string(),
        id: host.clone(),
    })?;
    Ok((StatusCode::OK, Json(balance)))
}

/// Add credits to a host, creating its account if needed
#[utoipa::path(
    post,
    path = "/hosts/{host}/credits",
    tag = "hosts",
    summary = "Add credits",
    description = "Credit a host's prepaid balance. The first credit for an unknown host opens its account.",
    params(("host" = String, Path, description = "Host identifier")),
    request_body = CreditsCreate,
    responses(
        (status = 201, description = "Credits added", body = Credit),
        (status = 400, description = "Amount must be positive and the balance must stay below 10^14"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn add_credits(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Json(data): Json<CreditsCreate>,
) -> Result<(StatusCode, Json<Credit>)> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::Validation {
            message: "host is required".to_string(),
        });
    }

    let grant = CreditGrant {
        host: host.to_string(),
        amount: data.amount,
        description: data.description,
        reference: data.reference,
        performed_by: data.performed_by,
    };
    let credit = state.ledger.add_credits(&grant).await?;

    Ok((StatusCode::CREATED, Json(credit)))
}

/// Activate or deactivate a host
#[utoipa::path(
    patch,
    path = "/hosts/{host}",
    tag = "hosts",
    summary = "Update host status",
    params(("host" = String, Path, description = "Host identifier")),
    request_body = HostStatusUpdate,
    responses(
        (status = 200, description = "Updated host balance", body = HostBalance),
        (status = 404, description = "Host not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_host(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Json(data): Json<HostStatusUpdate>,
) -> Result<(StatusCode, Json<HostBalance>)> {
    let balance = state.ledger.update_host_status(&host, data.active, data.notes.as_deref()).await?;
    Ok((StatusCode::OK, Json(balance)))
}

/// List a host's transactions, newest first
#[utoipa::path(
    get,
    path = "/hosts/{host}/transactions",
    tag = "hosts",
    summary = "List host transactions",
    params(("host" = String, Path, description = "Host identifier"), Pagination),
    responses(
        (status = 200, description = "Paginated transactions", body = PaginatedResponse<BalanceTransaction>),
        (status = 404, description = "Host not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_host_transactions(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Query(pagination): Query<Pagination>,
) -> Result<(StatusCode, Json<PaginatedResponse<BalanceTransaction>>)> {
    if state.ledger.get_host_balance(&host).await?.is_none() {
        return Err(Error::NotFound {
            resource: "Host".to_string(),
            id: host,
        });
    }

    let (skip, limit) = pagination.params();
    let page = state.ledger.get_transaction_history(&host, skip, limit).await?;

    Ok((
        StatusCode::OK,
        Json(PaginatedResponse::new(page.transactions, page.total_count, skip, limit)),
    ))
}

/// Refund a deduction
#[utoipa::path(
    post,
    path = "/transactions/{id}/refund",
    tag = "hosts",
    summary = "Refund a deduction",
    description = "Return the amount of a deduction to its host. Each deduction can be refunded once.",
    params(("id" = uuid::Uuid, Path, description = "Deduction transaction ID")),
    request_body(content = RefundCreate, description = "Optional reason and operator"),
    responses(
        (status = 200, description = "Refund applied", body = Refund),
        (status = 400, description = "Transaction is not a deduction"),
        (status = 404, description = "Transaction not found"),
        (status = 409, description = "Transaction already refunded"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn refund_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    data: Option<Json<RefundCreate>>,
) -> Result<(StatusCode, Json<Refund>)> {
    let data = data.map(|Json(data)| data).unwrap_or_default();
    let refund = state
        .ledger
        .refund_transaction(id, data.reason.as_deref(), data.performed_by.as_deref())
        .await?;
    Ok((StatusCode::OK, Json(refund)))
}

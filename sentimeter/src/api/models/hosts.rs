//! Balance administration payloads.

use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreditsCreate {
    /// Amount in USD, must be positive
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub amount: Decimal,
    pub description: Option<String>,
    /// External reference, e.g. an invoice or payment id
    pub reference: Option<String>,
    pub performed_by: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct HostStatusUpdate {
    pub active: bool,
    /// Replaces the current notes when present
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RefundCreate {
    pub reason: Option<String>,
    pub performed_by: Option<String>,
}

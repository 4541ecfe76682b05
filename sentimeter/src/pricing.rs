//! Per-model token pricing and cost/price derivation.
//!
//! The [`PricingTable`] is built once from configuration and shared read-only behind an
//! `Arc`. It is the only place a [`CostBreakdown`] is produced, so every amount that
//! reaches a response, the ledger or the analytics tables goes through the same
//! rounding rules.

use crate::config::{BillingConfig, PricingConfig};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Number of decimal places kept on every monetary amount.
pub const MONEY_SCALE: u32 = 6;

const TOKENS_PER_RATE_UNIT: i64 = 1000;
const CHARS_PER_TOKEN: usize = 4;

/// Round an amount to [`MONEY_SCALE`] places, halves away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Input/output rates in USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelRates {
    pub input_per_1k: Decimal,
    pub output_per_1k: Decimal,
}

impl ModelRates {
    pub fn new(input_per_1k: Decimal, output_per_1k: Decimal) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }
}

/// Token counts for one classification call.
///
/// `total_tokens` is always derived from the other two, never taken from upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Upstream cost and billed price of one classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub input_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub output_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub input_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub output_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub total_price: Decimal,
    pub currency: String,
}

impl CostBreakdown {
    pub fn profit(&self) -> Decimal {
        self.total_price - self.total_cost
    }
}

#[derive(Debug, Clone)]
pub struct PricingTable {
    default_model: String,
    models: BTreeMap<String, ModelRates>,
    markup_multiplier: Decimal,
}

impl PricingTable {
    pub fn new(default_model: impl Into<String>, models: BTreeMap<String, ModelRates>, markup_percent: Decimal) -> Self {
        Self {
            default_model: default_model.into(),
            models,
            markup_multiplier: Decimal::ONE + markup_percent / Decimal::ONE_HUNDRED,
        }
    }

    pub fn from_config(pricing: &PricingConfig, billing: &BillingConfig) -> Self {
        Self::new(pricing.default_model.clone(), pricing.models.clone(), billing.markup_percent)
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Rates for `model`, falling back to the default model's rates for unknown ids.
    pub fn rates(&self, model: &str) -> ModelRates {
        self.models
            .get(model)
            .or_else(|| self.models.get(&self.default_model))
            .copied()
            .unwrap_or(ModelRates::new(Decimal::ZERO, Decimal::ZERO))
    }

    /// Rough token estimate used before the upstream call: one token per four characters.
    pub fn estimate_tokens(text: &str) -> u64 {
        text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
    }

    /// Pre-call cost estimate, charging the estimated tokens at both the input and the
    /// output rate.
    pub fn estimate_cost(&self, text: &str, model: &str) -> Decimal {
        let rates = self.rates(model);
        let tokens = Decimal::from(Self::estimate_tokens(text));
        round_money(tokens / Decimal::from(TOKENS_PER_RATE_UNIT) * (rates.input_per_1k + rates.output_per_1k))
    }

    pub fn cost_for(&self, model: &str, usage: &TokenUsage) -> CostBreakdown {
        let rates = self.rates(model);
        let per_unit = Decimal::from(TOKENS_PER_RATE_UNIT);

        let input_cost = round_money(Decimal::from(usage.prompt_tokens) / per_unit * rates.input_per_1k);
        let output_cost = round_money(Decimal::from(usage.completion_tokens) / per_unit * rates.output_per_1k);
        let input_price = round_money(input_cost * self.markup_multiplier);
        let output_price = round_money(output_cost * self.markup_multiplier);

        CostBreakdown {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
            input_price,
            output_price,
            total_price: input_price + output_price,
            currency: "USD".to_string(),
        }
    }
}

/// Rates shipped as the default pricing table.
pub fn default_model_rates() -> BTreeMap<String, ModelRates> {
    [
        ("gpt-4o-mini", ModelRates::new(Decimal::new(15, 5), Decimal::new(6, 4))),
        ("gpt-4o", ModelRates::new(Decimal::new(25, 4), Decimal::new(1, 2))),
        ("gpt-4-turbo", ModelRates::new(Decimal::new(1, 2), Decimal::new(3, 2))),
        ("gpt-4", ModelRates::new(Decimal::new(3, 2), Decimal::new(6, 2))),
        ("gpt-3.5-turbo", ModelRates::new(Decimal::new(5, 4), Decimal::new(15, 4))),
    ]
    .into_iter()
    .map(|(model, rates)| (model.to_string(), rates))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn table() -> PricingTable {
        PricingTable::new("gpt-4o-mini", default_model_rates(), Decimal::from(25))
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(PricingTable::estimate_tokens(""), 0);
        assert_eq!(PricingTable::estimate_tokens("abc"), 1);
        assert_eq!(PricingTable::estimate_tokens("abcd"), 1);
        assert_eq!(PricingTable::estimate_tokens("abcde"), 2);
        // Counts characters, not bytes
        assert_eq!(PricingTable::estimate_tokens("héllo wörld"), 3);
    }

    #[test]
    fn test_estimate_cost_uses_both_rates() {
        let text = "x".repeat(4000); // 1000 tokens
        assert_eq!(table().estimate_cost(&text, "gpt-4o-mini"), dec("0.00075"));
        assert_eq!(table().estimate_cost(&text, "gpt-4"), dec("0.09"));
    }

    #[test]
    fn test_unknown_model_uses_default_rates() {
        let table = table();
        assert_eq!(table.rates("not-a-model"), table.rates("gpt-4o-mini"));
    }

    #[test]
    fn test_cost_for_applies_markup() {
        let cost = table().cost_for("gpt-4o-mini", &TokenUsage::new(1000, 1000));

        assert_eq!(cost.input_cost, dec("0.00015"));
        assert_eq!(cost.output_cost, dec("0.0006"));
        assert_eq!(cost.total_cost, dec("0.00075"));
        assert_eq!(cost.input_price, dec("0.000188"));
        assert_eq!(cost.output_price, dec("0.00075"));
        assert_eq!(cost.total_price, dec("0.000938"));
        assert_eq!(cost.currency, "USD");
        assert!(cost.total_price >= cost.total_cost);
    }

    #[test]
    fn test_cost_breakdown_is_additive() {
        let cost = table().cost_for("gpt-4o", &TokenUsage::new(123, 45));

        assert_eq!(cost.total_cost, cost.input_cost + cost.output_cost);
        assert_eq!(cost.total_price, cost.input_price + cost.output_price);
        assert!(cost.total_cost.scale() <= MONEY_SCALE);
        assert!(cost.total_price.scale() <= MONEY_SCALE);
    }

    #[test]
    fn test_zero_usage_costs_nothing() {
        let cost = table().cost_for("gpt-4", &TokenUsage::default());
        assert_eq!(cost.total_cost, Decimal::ZERO);
        assert_eq!(cost.total_price, Decimal::ZERO);
    }

    #[test]
    fn test_token_usage_derives_total() {
        let usage = TokenUsage::new(10, 5);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn test_cost_breakdown_serializes_numbers() {
        let cost = table().cost_for("gpt-4o-mini", &TokenUsage::new(1000, 0));
        let json = serde_json::to_value(&cost).unwrap();
        assert_eq!(json["inputCost"], serde_json::json!(0.00015));
        assert_eq!(json["currency"], "USD");
    }
}

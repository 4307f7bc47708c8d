// SPDX-License-Identifier: MIT

//! Usage ledger: per-step token usage plus a running total
//!
//! The total is recomputed from the records on every append. Its cost is
//! priced from the summed token counts, never summed from per-record
//! costs, so rounding cannot drift across many small calls.

use crate::adk::model::TokenUsage;
use serde::{Deserialize, Serialize};

/// Per-token pricing with fixed-precision rounding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Pricing {
    /// Price per one million input tokens
    pub input_per_million: f64,
    /// Price per one million output tokens
    pub output_per_million: f64,
    /// Decimal places kept after rounding
    pub decimals: u32,
    pub currency: String,
}

impl Default for Pricing {
    /// gpt-4o-mini list price converted to KRW
    fn default() -> Self {
        Self {
            input_per_million: 210.0,
            output_per_million: 840.0,
            decimals: 2,
            currency: "원".to_string(),
        }
    }
}

impl Pricing {
    /// Price a pair of token counts, rounded to `decimals`
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let raw = input_tokens as f64 * self.input_per_million / 1_000_000.0
            + output_tokens as f64 * self.output_per_million / 1_000_000.0;
        let scale = 10f64.powi(self.decimals as i32);
        (raw * scale).round() / scale
    }

    /// e.g. `0.02원(2340 tokens)`
    pub fn format(&self, cost: f64, total_tokens: u64) -> String {
        format!(
            "{:.*}{}({} tokens)",
            self.decimals as usize, cost, self.currency, total_tokens
        )
    }
}

/// Usage of one model call, priced when recorded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub step: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub cost_formatted: String,
}

/// Running total over all records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UsageTotal {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub cost_formatted: String,
}

/// Append-only usage ledger owned by one run
#[derive(Debug, Clone, Serialize)]
pub struct UsageLedger {
    #[serde(skip)]
    pricing: Pricing,
    records: Vec<UsageRecord>,
    total: UsageTotal,
}

impl UsageLedger {
    pub fn new(pricing: Pricing) -> Self {
        let total = UsageTotal {
            cost_formatted: pricing.format(0.0, 0),
            ..Default::default()
        };
        Self {
            pricing,
            records: Vec::new(),
            total,
        }
    }

    /// Append a record for `step` and recompute the total
    pub fn record(&mut self, step: &str, usage: TokenUsage) -> &UsageRecord {
        let cost = self.pricing.cost(usage.input_tokens, usage.output_tokens);
        self.records.push(UsageRecord {
            step: step.to_string(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total(),
            cost,
            cost_formatted: self.pricing.format(cost, usage.total()),
        });
        self.recompute();

        &self.records[self.records.len() - 1]
    }

    fn recompute(&mut self) {
        let input_tokens: u64 = self.records.iter().map(|r| r.input_tokens).sum();
        let output_tokens: u64 = self.records.iter().map(|r| r.output_tokens).sum();
        let total_tokens = input_tokens + output_tokens;
        let cost = self.pricing.cost(input_tokens, output_tokens);

        self.total = UsageTotal {
            input_tokens,
            output_tokens,
            total_tokens,
            cost,
            cost_formatted: self.pricing.format(cost, total_tokens),
        };
    }

    pub fn records(&self) -> &[UsageRecord] {
        &self.records
    }

    pub fn total(&self) -> &UsageTotal {
        &self.total
    }

    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new(Pricing::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn per_token_pricing() -> Pricing {
        Pricing {
            input_per_million: 1_000.0,
            output_per_million: 3_000.0,
            decimals: 2,
            currency: "원".to_string(),
        }
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = UsageLedger::default();
        assert!(ledger.records().is_empty());
        assert_eq!(ledger.total().total_tokens, 0);
        assert_eq!(ledger.total().cost_formatted, "0.00원(0 tokens)");
    }

    #[test]
    fn test_record_appends_in_order() {
        let mut ledger = UsageLedger::new(per_token_pricing());
        ledger.record("evaluate_query", TokenUsage::new(100, 20));
        ledger.record("rewrite_and_extract", TokenUsage::new(50, 10));

        let steps: Vec<&str> = ledger.records().iter().map(|r| r.step.as_str()).collect();
        assert_eq!(steps, vec!["evaluate_query", "rewrite_and_extract"]);
        assert_eq!(ledger.total().input_tokens, 150);
        assert_eq!(ledger.total().output_tokens, 30);
        assert_eq!(ledger.total().total_tokens, 180);
    }

    #[test]
    fn test_total_cost_is_recomputed_not_summed() {
        // 4 input tokens cost 0.004 each call, which rounds to 0.00 per record,
        // while 16 tokens overall cost 0.016 and round to 0.02.
        let pricing = per_token_pricing();
        let mut ledger = UsageLedger::new(pricing.clone());
        for step in ["a", "b", "c", "d"] {
            ledger.record(step, TokenUsage::new(4, 0));
        }

        let naive: f64 = ledger.records().iter().map(|r| r.cost).sum();
        assert_eq!(naive, 0.0);
        assert_eq!(ledger.total().cost, pricing.cost(16, 0));
        assert!((ledger.total().cost - naive).abs() > 0.01);
        assert_eq!(ledger.total().cost_formatted, "0.02원(16 tokens)");
    }

    #[test]
    fn test_total_matches_price_of_sums_for_arbitrary_pairs() {
        let pricing = Pricing::default();
        let mut ledger = UsageLedger::new(pricing.clone());
        let pairs = [(1234, 56), (7, 3), (99_999, 1), (0, 4321), (13, 13), (500, 250)];

        let (mut sum_in, mut sum_out) = (0u64, 0u64);
        for (i, (input, output)) in pairs.iter().enumerate() {
            ledger.record(&format!("step_{}", i), TokenUsage::new(*input, *output));
            sum_in += input;
            sum_out += output;

            assert_eq!(ledger.total().cost, pricing.cost(sum_in, sum_out));
            assert_eq!(ledger.total().total_tokens, sum_in + sum_out);
        }
        assert_eq!(ledger.records().len(), pairs.len());
    }

    #[test]
    fn test_pricing_rounds_to_decimals() {
        let pricing = Pricing::default();
        // 2340 input tokens at 210/M = 0.4914
        assert_eq!(pricing.cost(2340, 0), 0.49);
        assert_eq!(pricing.format(0.49, 2340), "0.49원(2340 tokens)");
    }

    #[test]
    fn test_pricing_deserializes_with_defaults() {
        let pricing: Pricing = serde_yaml::from_str("decimals: 4").unwrap();
        assert_eq!(pricing.decimals, 4);
        assert_eq!(pricing.input_per_million, 210.0);
    }
}

//! Per-model token prices

use super::TokenUsage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Release suffixes appended to a base model id: `-2024-07-18`, `-002`,
/// `-20240307-v1:0`, `-latest`, `@20241022`
static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[-@](?:\d+|v\d+(?::\d+)?|latest))+$").expect("version suffix pattern")
});

/// Price of one model, per 1,000 tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl ModelPrice {
    pub fn new(prompt_per_1k: f64, completion_per_1k: f64) -> Self {
        Self {
            prompt_per_1k,
            completion_per_1k,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 / 1000.0) * self.prompt_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * self.completion_per_1k
    }
}

/// Mapping from model identifier to token prices
///
/// Lookups try an exact match first, then the longest configured key that
/// the requested model extends with only a release suffix (so `gpt-4o-mini`
/// also prices `gpt-4o-mini-2024-07-18`, but `gpt-4` does not price
/// `gpt-4o-mini`). Unknown models have no price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: add or replace a model price
    pub fn with_price(
        mut self,
        model: impl Into<String>,
        prompt_per_1k: f64,
        completion_per_1k: f64,
    ) -> Self {
        self.insert(model, ModelPrice::new(prompt_per_1k, completion_per_1k));
        self
    }

    pub fn insert(&mut self, model: impl Into<String>, price: ModelPrice) {
        self.prices.insert(model.into(), price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ModelPrice)> {
        self.prices.iter()
    }

    /// Price for a model, if configured
    pub fn lookup(&self, model: &str) -> Option<&ModelPrice> {
        if let Some(price) = self.prices.get(model) {
            return Some(price);
        }

        self.prices
            .iter()
            .filter(|(key, _)| {
                model
                    .strip_prefix(key.as_str())
                    .is_some_and(|suffix| VERSION_SUFFIX.is_match(suffix))
            })
            .max_by_key(|(key, _)| key.len())
            .map(|(_, price)| price)
    }

    /// Cost of a call, omitted for unknown models
    pub fn cost(&self, model: &str, usage: &TokenUsage) -> Option<f64> {
        self.lookup(model).map(|price| price.cost(usage))
    }
}

impl FromIterator<(String, ModelPrice)> for PriceTable {
    fn from_iter<I: IntoIterator<Item = (String, ModelPrice)>>(iter: I) -> Self {
        Self {
            prices: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_prefix_lookup() {
        let table = PriceTable::new()
            .with_price("gpt-4o", 2.5, 10.0)
            .with_price("gpt-4o-mini", 0.15, 0.6);

        assert_eq!(table.lookup("gpt-4o").unwrap().prompt_per_1k, 2.5);
        // Longest prefix wins for dated variants
        assert_eq!(
            table.lookup("gpt-4o-mini-2024-07-18").unwrap().prompt_per_1k,
            0.15
        );
        assert!(table.lookup("claude-3-haiku").is_none());
    }

    #[test]
    fn test_prefix_needs_release_suffix() {
        let table = PriceTable::new()
            .with_price("gpt-4", 30.0, 60.0)
            .with_price("claude-3-haiku", 0.25, 1.25)
            .with_price("anthropic.claude-3-haiku", 0.25, 1.25);

        let usage = TokenUsage::new(1000, 1000);
        assert_eq!(table.cost("gpt-4o-mini", &usage), None);
        assert_eq!(table.cost("gpt-4-turbo", &usage), None);
        assert_eq!(table.cost("gpt-40", &usage), None);
        assert_eq!(table.cost("gpt-4-0613", &usage), Some(90.0));
        assert!(table.lookup("claude-3-haiku-20240307").is_some());
        assert!(table.lookup("claude-3-haiku@20240307").is_some());
        assert!(table.lookup("anthropic.claude-3-haiku-20240307-v1:0").is_some());
        assert!(table.lookup("claude-3-haiku-latest").is_some());
    }

    #[test]
    fn test_cost_computation() {
        let table = PriceTable::new().with_price("m", 1.0, 2.0);
        let cost = table.cost("m", &TokenUsage::new(500, 250)).unwrap();
        assert!((cost - 1.0).abs() < 1e-9);
        assert_eq!(table.cost("other", &TokenUsage::new(500, 250)), None);
    }

    #[test]
    fn test_deserializes_from_map() {
        let table: PriceTable = toml::from_str(
            r#"
            ["gemini-1.5-flash"]
            prompt_per_1k = 0.075
            completion_per_1k = 0.3
            "#,
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.lookup("gemini-1.5-flash-002").is_some());
    }
}

//! Provider-agnostic token usage extraction
//!
//! LLM providers report token consumption under different shapes. Rather than
//! probing arbitrary response trees, this module keeps a small ordered list of
//! named [`ExtractionStrategy`] variants. Each one looks at a fixed set of keys
//! at most two levels deep and either matches completely or not at all. The
//! first matching strategy wins.
//!
//! ```rust
//! use kansatsu::usage::{TokenUsageExtractor, TokenUsage};
//! use serde_json::json;
//!
//! let extractor = TokenUsageExtractor::new();
//! let response = json!({
//!     "model": "gpt-4o-mini",
//!     "usage": { "prompt_tokens": 12, "completion_tokens": 30, "total_tokens": 42 }
//! });
//!
//! assert_eq!(extractor.extract(&response), Some(TokenUsage::new(12, 30)));
//! assert_eq!(extractor.extract(&json!({"rows": 3})), None);
//! ```

pub mod pricing;

pub use pricing::{ModelPrice, PriceTable};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Keys that may carry the model identifier of a response
const MODEL_KEYS: &[&str] = &["model", "modelVersion", "model_version", "model_id", "modelId"];

/// Token counts reported by a single LLM call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Usage with the total derived from both directions
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Usage with a provider-reported total
    pub fn with_total(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// Known provider response shapes, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// `usage_metadata.{prompt_token_count, candidates_token_count, total_token_count}`
    GeminiUsageMetadata,
    /// `usage.{prompt_tokens, completion_tokens, total_tokens}`
    OpenAiChatUsage,
    /// `usage.{input_tokens, output_tokens}`
    AnthropicUsage,
    /// `usage.{inputTokens, outputTokens, totalTokens}`
    BedrockConverseUsage,
    /// Token fields directly on the response object
    FlatTokenFields,
}

impl ExtractionStrategy {
    /// Default probing order
    pub const DEFAULT_ORDER: [ExtractionStrategy; 5] = [
        Self::GeminiUsageMetadata,
        Self::OpenAiChatUsage,
        Self::AnthropicUsage,
        Self::BedrockConverseUsage,
        Self::FlatTokenFields,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeminiUsageMetadata => "gemini_usage_metadata",
            Self::OpenAiChatUsage => "openai_chat_usage",
            Self::AnthropicUsage => "anthropic_usage",
            Self::BedrockConverseUsage => "bedrock_converse_usage",
            Self::FlatTokenFields => "flat_token_fields",
        }
    }

    /// Try this strategy against a response
    pub fn apply(&self, response: &Value) -> Option<TokenUsage> {
        match self {
            Self::GeminiUsageMetadata => {
                let usage = field(response, &["usage_metadata", "usageMetadata"])?;
                let prompt = count(usage, &["prompt_token_count", "promptTokenCount"])?;
                let completion = count(usage, &["candidates_token_count", "candidatesTokenCount"])?;
                Some(with_optional_total(
                    prompt,
                    completion,
                    count(usage, &["total_token_count", "totalTokenCount"]),
                ))
            }
            Self::OpenAiChatUsage => {
                let usage = field(response, &["usage"])?;
                let prompt = count(usage, &["prompt_tokens"])?;
                let completion = count(usage, &["completion_tokens"])?;
                Some(with_optional_total(
                    prompt,
                    completion,
                    count(usage, &["total_tokens"]),
                ))
            }
            Self::AnthropicUsage => {
                let usage = field(response, &["usage"])?;
                let prompt = count(usage, &["input_tokens"])?;
                let completion = count(usage, &["output_tokens"])?;
                Some(TokenUsage::new(prompt, completion))
            }
            Self::BedrockConverseUsage => {
                let usage = field(response, &["usage"])?;
                let prompt = count(usage, &["inputTokens"])?;
                let completion = count(usage, &["outputTokens"])?;
                Some(with_optional_total(
                    prompt,
                    completion,
                    count(usage, &["totalTokens"]),
                ))
            }
            Self::FlatTokenFields => {
                if let (Some(prompt), Some(completion)) = (
                    count(response, &["prompt_tokens"]),
                    count(response, &["completion_tokens"]),
                ) {
                    return Some(with_optional_total(
                        prompt,
                        completion,
                        count(response, &["total_tokens"]),
                    ));
                }
                let prompt = count(response, &["input_tokens"])?;
                let completion = count(response, &["output_tokens"])?;
                Some(TokenUsage::new(prompt, completion))
            }
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything the extractor learned from one response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub usage: TokenUsage,
    pub strategy: ExtractionStrategy,
    pub model: Option<String>,
    /// Omitted when the model is unknown to the price table
    pub cost: Option<f64>,
}

/// Locates token and cost information in provider responses
#[derive(Debug, Clone)]
pub struct TokenUsageExtractor {
    strategies: Vec<ExtractionStrategy>,
    prices: PriceTable,
}

impl Default for TokenUsageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenUsageExtractor {
    /// Extractor with the default strategy order and an empty price table
    pub fn new() -> Self {
        Self {
            strategies: ExtractionStrategy::DEFAULT_ORDER.to_vec(),
            prices: PriceTable::new(),
        }
    }

    /// Replace the price table used for cost computation
    pub fn with_prices(mut self, prices: PriceTable) -> Self {
        self.prices = prices;
        self
    }

    /// Override the probing order
    pub fn with_strategies(mut self, strategies: Vec<ExtractionStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn strategies(&self) -> &[ExtractionStrategy] {
        &self.strategies
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Token usage from the first matching strategy, `None` when nothing matches
    pub fn extract(&self, response: &Value) -> Option<TokenUsage> {
        self.matching_strategy(response).map(|(_, usage)| usage)
    }

    /// Token usage plus model and cost
    pub fn report(&self, response: &Value) -> Option<UsageReport> {
        let (strategy, usage) = self.matching_strategy(response)?;
        let model = model_id(response).map(str::to_string);
        let cost = model
            .as_deref()
            .and_then(|model| self.prices.cost(model, &usage));

        Some(UsageReport {
            usage,
            strategy,
            model,
            cost,
        })
    }

    fn matching_strategy(&self, response: &Value) -> Option<(ExtractionStrategy, TokenUsage)> {
        self.strategies
            .iter()
            .find_map(|strategy| strategy.apply(response).map(|usage| (*strategy, usage)))
    }
}

/// Model identifier carried by a response, if any
pub fn model_id(response: &Value) -> Option<&str> {
    field(response, MODEL_KEYS)
        .and_then(Value::as_str)
        .filter(|model| !model.is_empty())
}

fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let object = value.as_object()?;
    keys.iter().find_map(|key| object.get(*key))
}

fn count(value: &Value, keys: &[&str]) -> Option<u64> {
    field(value, keys).and_then(Value::as_u64)
}

fn with_optional_total(prompt: u64, completion: u64, total: Option<u64>) -> TokenUsage {
    match total {
        Some(total) => TokenUsage::with_total(prompt, completion, total),
        None => TokenUsage::new(prompt, completion),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_shape() {
        let response = json!({
            "usage": {"prompt_tokens": 100, "completion_tokens": 200, "total_tokens": 300}
        });
        assert_eq!(
            ExtractionStrategy::OpenAiChatUsage.apply(&response),
            Some(TokenUsage::with_total(100, 200, 300))
        );
    }

    #[test]
    fn test_gemini_shape_both_casings() {
        let snake = json!({
            "usage_metadata": {
                "prompt_token_count": 5,
                "candidates_token_count": 7,
                "total_token_count": 12
            }
        });
        let camel = json!({
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 7}
        });

        let extractor = TokenUsageExtractor::new();
        assert_eq!(extractor.extract(&snake), Some(TokenUsage::new(5, 7)));
        assert_eq!(extractor.extract(&camel), Some(TokenUsage::new(5, 7)));
    }

    #[test]
    fn test_anthropic_total_is_sum() {
        let response = json!({"usage": {"input_tokens": 10, "output_tokens": 4}});
        let report = TokenUsageExtractor::new().report(&response).unwrap();
        assert_eq!(report.strategy, ExtractionStrategy::AnthropicUsage);
        assert_eq!(report.usage.total_tokens, 14);
    }

    #[test]
    fn test_bedrock_shape() {
        let response = json!({
            "usage": {"inputTokens": 3, "outputTokens": 9, "totalTokens": 12}
        });
        let report = TokenUsageExtractor::new().report(&response).unwrap();
        assert_eq!(report.strategy, ExtractionStrategy::BedrockConverseUsage);
        assert_eq!(report.usage, TokenUsage::with_total(3, 9, 12));
    }

    #[test]
    fn test_flat_fields() {
        let response = json!({"input_tokens": 2, "output_tokens": 3});
        assert_eq!(
            TokenUsageExtractor::new().extract(&response),
            Some(TokenUsage::new(2, 3))
        );
    }

    #[test]
    fn test_unknown_shapes_return_none() {
        let extractor = TokenUsageExtractor::new();
        for response in [
            json!(null),
            json!("text"),
            json!(42),
            json!([1, 2, 3]),
            json!({"usage": "lots"}),
            json!({"usage": {"prompt_tokens": -1, "completion_tokens": 2}}),
            json!({"usage": {"prompt_tokens": 1}}),
            json!({"status": "success", "rows": 42}),
        ] {
            assert_eq!(extractor.extract(&response), None, "{}", response);
        }
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = TokenUsageExtractor::new();
        let response = json!({"usage": {"prompt_tokens": 1, "completion_tokens": 1}});
        assert_eq!(extractor.extract(&response), extractor.extract(&response));
    }

    #[test]
    fn test_priority_order() {
        // Gemini metadata wins over a usage object on the same response
        let response = json!({
            "usage_metadata": {"prompt_token_count": 1, "candidates_token_count": 1},
            "usage": {"prompt_tokens": 50, "completion_tokens": 50}
        });
        let report = TokenUsageExtractor::new().report(&response).unwrap();
        assert_eq!(report.strategy, ExtractionStrategy::GeminiUsageMetadata);
    }

    #[test]
    fn test_cost_requires_known_model() {
        let prices = PriceTable::new().with_price("gpt-4o-mini", 0.15, 0.6);
        let extractor = TokenUsageExtractor::new().with_prices(prices);

        let known = json!({
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 1000, "completion_tokens": 2000}
        });
        let report = extractor.report(&known).unwrap();
        let cost = report.cost.unwrap();
        assert!((cost - 1.35).abs() < 1e-9);

        let unknown = json!({
            "model": "mystery-model",
            "usage": {"prompt_tokens": 1000, "completion_tokens": 2000}
        });
        assert_eq!(extractor.report(&unknown).unwrap().cost, None);

        let no_model = json!({"usage": {"prompt_tokens": 1, "completion_tokens": 2}});
        assert_eq!(extractor.report(&no_model).unwrap().cost, None);
    }
}

//! Span attribute names
//!
//! Token counts are written under both the `llm.usage.*` keys read by the
//! Kansatsu dashboard and the OpenTelemetry GenAI semantic convention keys:
//! <https://opentelemetry.io/docs/specs/semconv/gen-ai/>

/// Attribute keys used on instrumented-call spans
pub mod attrs {
    // ========================================================================
    // Token usage
    // ========================================================================

    pub const LLM_PROMPT_TOKENS: &str = "llm.usage.prompt_tokens";

    pub const LLM_COMPLETION_TOKENS: &str = "llm.usage.completion_tokens";

    pub const LLM_TOTAL_TOKENS: &str = "llm.usage.total_tokens";

    /// Estimated cost from the configured price table
    pub const LLM_COST: &str = "llm.usage.cost";

    /// Which response shape the token counts came from
    pub const LLM_USAGE_SOURCE: &str = "llm.usage.source";

    /// Input tokens (OTEL GenAI)
    pub const USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";

    /// Output tokens (OTEL GenAI)
    pub const USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";

    /// Model reported by the response
    pub const RESPONSE_MODEL: &str = "gen_ai.response.model";

    // ========================================================================
    // Call
    // ========================================================================

    /// Instrumented function name
    pub const FUNCTION_NAME: &str = "code.function";

    pub const DURATION_MS: &str = "duration.ms";

    /// Type name of the returned error or `panic`
    pub const ERROR_TYPE: &str = "error.type";

    // ========================================================================
    // Sensitive-content scans
    // ========================================================================

    pub const RAI_PII_FOUND: &str = "rai.pii_found";

    pub const RAI_FINDINGS_COUNT: &str = "rai.findings_count";

    /// Entity type of one `rai_alert` event
    pub const RAI_ENTITY_TYPE: &str = "rai.entity_type";

    /// Byte offset of the finding in the scanned text
    pub const RAI_START: &str = "rai.start";

    // ========================================================================
    // Session
    // ========================================================================

    pub const SERVICE_NAME: &str = "service.name";

    pub const SERVICE_VERSION: &str = "service.version";

    pub const SESSION_ID: &str = "session.id";

    pub const SESSION_TOTAL_CALLS: &str = "kansatsu.session.total_calls";

    pub const SESSION_TOTAL_ERRORS: &str = "kansatsu.session.total_errors";

    pub const SESSION_TOTAL_TOKENS: &str = "kansatsu.session.total_tokens";

    pub const SESSION_TOTAL_COST: &str = "kansatsu.session.total_cost";

    pub const SESSION_FUNCTIONS: &str = "kansatsu.session.functions";
}

/// Name of the span emitted once at shutdown
pub const SESSION_SPAN_NAME: &str = "kansatsu.session";

/// Name of the span emitted for each sensitive-content scan
pub const RAI_SCAN_SPAN_NAME: &str = "rai.scan";

/// Span event added once per finding of a scan
pub const RAI_ALERT_EVENT: &str = "rai_alert";

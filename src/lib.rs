//! In-process observability for functions that call LLM and tool APIs.
//!
//! Kansatsu wraps your functions to time them, trace them, pull token usage
//! and cost out of whatever response shape your provider returns, and
//! aggregate everything into per-function statistics that a live dashboard
//! can pull or have pushed to it. Returned text can be scanned for personal
//! or health information and redacted.
//!
//! # Quick Start
//!
//! ```no_run
//! use kansatsu::{monitor, Kansatsu, KansatsuConfig};
//! use once_cell::sync::Lazy;
//! use serde_json::{json, Value};
//!
//! static AGENT: Lazy<Kansatsu> = Lazy::new(|| {
//!     Kansatsu::new(KansatsuConfig::new("physio-assistant")).expect("valid config")
//! });
//!
//! #[monitor(agent = AGENT, span_name = "llm.generate", track_tokens)]
//! async fn generate(prompt: &str) -> Result<Value, String> {
//!     Ok(json!({
//!         "text": format!("echo: {prompt}"),
//!         "usage_metadata": {"prompt_token_count": 8, "candidates_token_count": 4, "total_token_count": 12}
//!     }))
//! }
//!
//! #[tokio::main]
//! async fn main() -> kansatsu::Result<()> {
//!     AGENT.start_publisher()?;
//!     generate("How do I stretch my hamstring?").await.ok();
//!     AGENT.record_quality_feedback(5)?;
//!     if let Some(summary) = AGENT.shutdown().await {
//!         println!("{summary}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture Overview
//!
//! - **[`Kansatsu`]** - Facade owning the registry, tracer, scanner and
//!   publisher, with an explicit shutdown
//! - **[`instrument`]** - Call wrapping with a finalization guard covering
//!   success, error, panic and cancellation
//! - **[`metrics`]** - Thread-safe per-function statistics and snapshots
//! - **[`usage`]** - Provider-agnostic token extraction and pricing
//! - **[`rai`]** - Sensitive-content detection and redaction
//! - **[`publisher`]** - Interval push of snapshots to dashboard sinks
//! - **[`telemetry`]** - Spans, span exporters and logging setup
//!
//! # Module Organization
//!
//! - [`agent`] - The [`Kansatsu`] facade and its builder
//! - [`config`] - File and environment configuration
//! - [`error`] - Crate error type and classification helpers

pub mod agent;
pub mod config;
pub mod error;
pub mod instrument;
pub mod metrics;
pub mod publisher;
pub mod rai;
pub mod telemetry;
pub mod usage;

pub use agent::{Kansatsu, KansatsuBuilder};
pub use config::KansatsuConfig;
pub use error::KansatsuError;
pub use instrument::{CallOutcome, InstrumentConfig, Instrumentation, Instrumented};
pub use metrics::{MetricsRegistry, Snapshot};
pub use rai::{EntityType, Finding, ScanResult, SensitiveContentScanner};
pub use usage::{TokenUsage, TokenUsageExtractor};

pub use kansatsu_macros::monitor;

pub type Result<T> = std::result::Result<T, KansatsuError>;

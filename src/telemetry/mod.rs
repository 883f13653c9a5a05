//! Span tracing for instrumented calls and process logging.
//!
//! Every instrumented call produces one span carrying its duration, outcome
//! and token usage. Spans are exported best-effort through a [`SpanExporter`];
//! nothing in this module can fail or slow down the instrumented function
//! beyond queueing a span in memory.
//!
//! # Key Types
//!
//! - [`TelemetryConfig`] - Which exporter to use and how spans are batched
//! - [`Tracer`] / [`Span`] - Span creation and the pending-span queue
//! - [`SpanExporter`] - Export backend trait with console and in-memory
//!   reference implementations
//! - [`logging`] - Optional global `tracing` subscriber setup

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod exporter;
pub mod genai;
pub mod logging;
pub mod tracer;

pub use exporter::{
    AttributeValue, ConsoleExporter, ExportError, InMemoryExporter, NoOpExporter, SpanData,
    SpanEvent, SpanExporter, SpanKind, SpanStatus,
};
pub use genai::attrs;
pub use logging::{init_logging, LoggingConfig, LoggingGuard};
pub use tracer::{Span, Tracer};

/// Built-in span export targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExporterKind {
    /// Discard spans
    #[default]
    None,
    /// Pretty-printed JSON on stdout
    Console,
}

impl std::str::FromStr for ExporterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "noop" | "off" => Ok(Self::None),
            "console" | "stdout" => Ok(Self::Console),
            other => Err(format!("Unknown span exporter: {}", other)),
        }
    }
}

/// Span export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub exporter: ExporterKind,
    /// Finished spans queued before a background export starts
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    tracer::DEFAULT_BATCH_SIZE
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            exporter: ExporterKind::default(),
            batch_size: default_batch_size(),
        }
    }
}

impl TelemetryConfig {
    /// Export spans to stdout
    pub fn with_console_export(mut self) -> Self {
        self.exporter = ExporterKind::Console;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Exporter for the configured kind
    pub fn build_exporter(&self) -> Arc<dyn SpanExporter> {
        match self.exporter {
            ExporterKind::None => Arc::new(NoOpExporter),
            ExporterKind::Console => Arc::new(ConsoleExporter),
        }
    }

    /// Tracer over the configured exporter
    pub fn build_tracer(&self) -> Tracer {
        Tracer::new(self.build_exporter()).with_batch_size(self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_kind_parsing() {
        assert_eq!("console".parse::<ExporterKind>(), Ok(ExporterKind::Console));
        assert_eq!("NOOP".parse::<ExporterKind>(), Ok(ExporterKind::None));
        assert!("jaeger".parse::<ExporterKind>().is_err());
    }

    #[test]
    fn test_default_config_discards_spans() {
        let config = TelemetryConfig::default();
        assert_eq!(config.exporter, ExporterKind::None);
        assert_eq!(config.batch_size, tracer::DEFAULT_BATCH_SIZE);
        assert!(config.build_tracer().is_healthy());
    }
}

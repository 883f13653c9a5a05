//! Span exporter traits and implementations
//!
//! This module defines the `SpanExporter` trait through which finished spans
//! leave the process. Export is best-effort: callers log failures and move on.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Error during span export
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Network error during export
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The exporter was already shut down
    #[error("Exporter is shut down")]
    Shutdown,
}

/// Data for a single span to be exported
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanData {
    /// Unique trace ID (128-bit hex string)
    pub trace_id: String,
    /// Unique span ID (64-bit hex string)
    pub span_id: String,
    /// Parent span ID (if this is a child span)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    /// Operation name (the instrumented function or span override)
    pub name: String,
    pub kind: SpanKind,
    /// Start time in nanoseconds since Unix epoch
    pub start_time_unix_nano: u64,
    /// End time in nanoseconds since Unix epoch
    pub end_time_unix_nano: u64,
    pub attributes: HashMap<String, AttributeValue>,
    pub status: SpanStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SpanEvent>,
}

impl SpanData {
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(
            self.end_time_unix_nano
                .saturating_sub(self.start_time_unix_nano),
        )
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

/// Kind of span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// Internal operation
    Internal,
}

/// Status of a span
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error { message: String },
}

impl SpanStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Value of a span attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    StringArray(Vec<String>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Int(i)
    }
}

impl From<u64> for AttributeValue {
    fn from(i: u64) -> Self {
        AttributeValue::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<usize> for AttributeValue {
    fn from(i: usize) -> Self {
        AttributeValue::from(i as u64)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Float(f)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(values: Vec<String>) -> Self {
        AttributeValue::StringArray(values)
    }
}

/// Event that occurred during a span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanEvent {
    pub name: String,
    /// Time of the event in nanoseconds since Unix epoch
    pub time_unix_nano: u64,
    pub attributes: HashMap<String, AttributeValue>,
}

/// Trait for exporting spans to observability backends
///
/// # Example
///
/// ```ignore
/// use kansatsu::telemetry::{ExportError, SpanData, SpanExporter};
///
/// #[derive(Debug)]
/// struct MyExporter;
///
/// #[async_trait::async_trait]
/// impl SpanExporter for MyExporter {
///     async fn export(&self, spans: Vec<SpanData>) -> Result<(), ExportError> {
///         // Send spans to backend
///         Ok(())
///     }
///
///     async fn shutdown(&self) -> Result<(), ExportError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait SpanExporter: Send + Sync + std::fmt::Debug {
    /// Export a batch of spans to the backend
    ///
    /// Implementations should not panic on export failure.
    async fn export(&self, spans: Vec<SpanData>) -> Result<(), ExportError>;

    /// Gracefully shutdown the exporter, releasing resources
    async fn shutdown(&self) -> Result<(), ExportError>;

    /// Returns true if the exporter is ready to accept spans
    fn is_healthy(&self) -> bool {
        true
    }
}

/// No-op exporter that discards all spans
#[derive(Debug, Clone, Default)]
pub struct NoOpExporter;

#[async_trait]
impl SpanExporter for NoOpExporter {
    async fn export(&self, _spans: Vec<SpanData>) -> Result<(), ExportError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Writes each span as pretty-printed JSON to stdout
#[derive(Debug, Clone, Default)]
pub struct ConsoleExporter;

#[async_trait]
impl SpanExporter for ConsoleExporter {
    async fn export(&self, spans: Vec<SpanData>) -> Result<(), ExportError> {
        for span in &spans {
            let json = serde_json::to_string_pretty(span)
                .map_err(|e| ExportError::Serialization(e.to_string()))?;
            println!("{}", json);
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        std::io::stdout()
            .flush()
            .map_err(|e| ExportError::Network(e.to_string()))
    }
}

/// Keeps exported spans in memory for inspection
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
    export_calls: Arc<Mutex<usize>>,
    shut_down: Arc<Mutex<bool>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything exported so far
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Spans with the given name
    pub fn spans_named(&self, name: &str) -> Vec<SpanData> {
        self.spans()
            .into_iter()
            .filter(|span| span.name == name)
            .collect()
    }

    /// Number of non-empty export batches received
    pub fn export_calls(&self) -> usize {
        self.export_calls.lock().map(|c| *c).unwrap_or(0)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.lock().map(|s| *s).unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

#[async_trait]
impl SpanExporter for InMemoryExporter {
    async fn export(&self, spans: Vec<SpanData>) -> Result<(), ExportError> {
        if self.is_shut_down() {
            return Err(ExportError::Shutdown);
        }
        if spans.is_empty() {
            return Ok(());
        }
        if let Ok(mut calls) = self.export_calls.lock() {
            *calls += 1;
        }
        if let Ok(mut stored) = self.spans.lock() {
            stored.extend(spans);
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ExportError> {
        if let Ok(mut shut_down) = self.shut_down.lock() {
            *shut_down = true;
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !self.is_shut_down()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_span(name: &str) -> SpanData {
        let mut attributes = HashMap::new();
        attributes.insert("duration.ms".to_string(), AttributeValue::Float(12.5));
        attributes.insert("llm.usage.total_tokens".to_string(), AttributeValue::Int(30));
        SpanData {
            trace_id: "0123456789abcdef0123456789abcdef".to_string(),
            span_id: "0123456789abcdef".to_string(),
            parent_span_id: None,
            name: name.to_string(),
            kind: SpanKind::Internal,
            start_time_unix_nano: 1_000_000_000,
            end_time_unix_nano: 1_012_500_000,
            attributes,
            status: SpanStatus::Ok,
            events: Vec::new(),
        }
    }

    #[test]
    fn test_attribute_value_from() {
        assert_eq!(
            AttributeValue::from("test"),
            AttributeValue::String("test".to_string())
        );
        assert_eq!(AttributeValue::from(true), AttributeValue::Bool(true));
        assert_eq!(AttributeValue::from(42i64), AttributeValue::Int(42));
        assert_eq!(AttributeValue::from(u64::MAX), AttributeValue::Int(i64::MAX));
        assert_eq!(AttributeValue::from(1.5), AttributeValue::Float(1.5));
    }

    #[test]
    fn test_span_status() {
        assert!(!SpanStatus::Ok.is_error());
        assert!(SpanStatus::Error {
            message: "boom".to_string()
        }
        .is_error());
    }

    #[test]
    fn test_span_serializes_to_json() {
        let json = serde_json::to_value(sample_span("call_llm")).unwrap();
        assert_eq!(json["name"], "call_llm");
        assert_eq!(json["kind"], "internal");
        assert_eq!(json["status"]["code"], "ok");
        assert_eq!(json["attributes"]["llm.usage.total_tokens"], 30);
        assert!(json.get("parent_span_id").is_none());
    }

    #[test]
    fn test_span_duration() {
        assert_eq!(
            sample_span("x").duration(),
            Duration::from_micros(12_500)
        );
    }

    #[tokio::test]
    async fn test_noop_exporter() {
        let exporter = NoOpExporter;
        assert!(exporter.export(vec![sample_span("x")]).await.is_ok());
        assert!(exporter.shutdown().await.is_ok());
        assert!(exporter.is_healthy());
    }

    #[tokio::test]
    async fn test_in_memory_exporter_collects_spans() {
        let exporter = InMemoryExporter::new();
        let handle = exporter.clone();

        exporter
            .export(vec![sample_span("a"), sample_span("b")])
            .await
            .unwrap();
        exporter.export(Vec::new()).await.unwrap();

        assert_eq!(handle.spans().len(), 2);
        assert_eq!(handle.spans_named("a").len(), 1);
        assert_eq!(handle.export_calls(), 1);

        exporter.shutdown().await.unwrap();
        assert!(!handle.is_healthy());
        assert!(matches!(
            exporter.export(vec![sample_span("c")]).await,
            Err(ExportError::Shutdown)
        ));
    }
}

//! Tracer and span types for instrumented calls
//!
//! Finished spans are queued in memory and leave the process through the
//! configured [`SpanExporter`], either in batches on a background task or when
//! [`Tracer::flush`] is awaited. Nothing here ever fails an instrumented call.

use super::exporter::{AttributeValue, SpanData, SpanEvent, SpanExporter, SpanKind, SpanStatus};
use super::genai::attrs;
use crate::usage::UsageReport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

/// Spans queued before a background export is started
pub const DEFAULT_BATCH_SIZE: usize = 512;

/// Spans kept when no runtime is available to export them
pub const DEFAULT_MAX_PENDING: usize = 8192;

/// Generate a random 128-bit trace ID as hex string
fn generate_trace_id() -> String {
    format!("{:032x}", fastrand::u128(..))
}

/// Generate a random 64-bit span ID as hex string
fn generate_span_id() -> String {
    format!("{:016x}", fastrand::u64(..))
}

/// Get current time in nanoseconds since Unix epoch
fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[derive(Debug, Clone, Copy)]
struct QueueLimits {
    batch_size: usize,
    max_pending: usize,
}

/// Creates spans and owns the pending-span queue
#[derive(Debug, Clone)]
pub struct Tracer {
    exporter: Arc<dyn SpanExporter>,
    /// Trace shared by every span of this session
    trace_id: Arc<Mutex<Option<String>>>,
    pending_spans: Arc<Mutex<Vec<SpanData>>>,
    dropped_spans: Arc<AtomicU64>,
    /// Background batch exports not yet awaited
    exports: Arc<Mutex<Vec<JoinHandle<()>>>>,
    limits: QueueLimits,
}

impl Tracer {
    pub fn new(exporter: Arc<dyn SpanExporter>) -> Self {
        Self {
            exporter,
            trace_id: Arc::new(Mutex::new(None)),
            pending_spans: Arc::new(Mutex::new(Vec::new())),
            dropped_spans: Arc::new(AtomicU64::new(0)),
            exports: Arc::new(Mutex::new(Vec::new())),
            limits: QueueLimits {
                batch_size: DEFAULT_BATCH_SIZE,
                max_pending: DEFAULT_MAX_PENDING,
            },
        }
    }

    /// Builder pattern: adjust the background batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.limits.batch_size = batch_size.max(1);
        self
    }

    fn get_or_create_trace_id(&self) -> String {
        match self.trace_id.lock() {
            Ok(mut trace_id) => trace_id.get_or_insert_with(generate_trace_id).clone(),
            Err(_) => generate_trace_id(),
        }
    }

    /// Start a new trace, so following spans get a fresh trace id
    pub fn start_trace(&self) {
        if let Ok(mut trace_id) = self.trace_id.lock() {
            *trace_id = Some(generate_trace_id());
        }
    }

    pub fn current_trace_id(&self) -> Option<String> {
        self.trace_id.lock().ok().and_then(|t| t.clone())
    }

    /// Start a root-level span
    pub fn start_span(&self, name: &str) -> Span {
        self.start_span_with_parent(name, None)
    }

    /// Start a span under an existing span id
    pub fn start_span_with_parent(&self, name: &str, parent_span_id: Option<&str>) -> Span {
        Span {
            data: SpanData {
                trace_id: self.get_or_create_trace_id(),
                span_id: generate_span_id(),
                parent_span_id: parent_span_id.map(str::to_string),
                name: name.to_string(),
                kind: SpanKind::Internal,
                start_time_unix_nano: now_nanos(),
                end_time_unix_nano: 0,
                attributes: HashMap::new(),
                status: SpanStatus::Unset,
                events: Vec::new(),
            },
            pending_spans: Arc::clone(&self.pending_spans),
            exporter: Arc::clone(&self.exporter),
            dropped_spans: Arc::clone(&self.dropped_spans),
            exports: Arc::clone(&self.exports),
            limits: self.limits,
            finished: false,
        }
    }

    pub fn pending_spans_count(&self) -> usize {
        self.pending_spans.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Spans discarded because the queue was full
    pub fn dropped_spans(&self) -> u64 {
        self.dropped_spans.load(Ordering::Relaxed)
    }

    /// Wait for background batch exports, then export pending spans
    pub async fn flush(&self) -> Result<(), super::exporter::ExportError> {
        let in_flight = match self.exports.lock() {
            Ok(mut exports) => std::mem::take(&mut *exports),
            Err(_) => Vec::new(),
        };
        for export in in_flight {
            if let Err(e) = export.await {
                tracing::warn!("Background span export did not complete: {}", e);
            }
        }

        let spans = match self.pending_spans.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => Vec::new(),
        };

        tracing::debug!("Flushing {} pending spans", spans.len());

        if !spans.is_empty() {
            self.exporter.export(spans).await?;
        }

        Ok(())
    }

    /// Flush pending spans, then shut the exporter down
    pub async fn shutdown(&self) -> Result<(), super::exporter::ExportError> {
        let flushed = self.flush().await;
        let closed = self.exporter.shutdown().await;
        tracing::debug!("Tracer shutdown complete");
        flushed.and(closed)
    }

    pub fn is_healthy(&self) -> bool {
        self.exporter.is_healthy()
    }
}

/// A span representing one instrumented call
///
/// Unfinished spans are finished and queued when dropped.
#[derive(Debug)]
pub struct Span {
    data: SpanData,
    pending_spans: Arc<Mutex<Vec<SpanData>>>,
    exporter: Arc<dyn SpanExporter>,
    dropped_spans: Arc<AtomicU64>,
    exports: Arc<Mutex<Vec<JoinHandle<()>>>>,
    limits: QueueLimits,
    finished: bool,
}

impl Span {
    pub fn trace_id(&self) -> &str {
        &self.data.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.data.span_id
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// Data recorded so far
    pub fn data(&self) -> &SpanData {
        &self.data
    }

    /// Set an attribute on the span
    pub fn set_attribute(&mut self, key: &str, value: impl Into<AttributeValue>) {
        if !self.finished {
            self.data.attributes.insert(key.to_string(), value.into());
        }
    }

    /// Record a failure with its error type and message
    pub fn record_error(&mut self, error_type: &str, message: &str) {
        if !self.finished {
            self.set_attribute(attrs::ERROR_TYPE, error_type);
            self.data.status = SpanStatus::Error {
                message: message.to_string(),
            };
            let mut attributes = HashMap::new();
            attributes.insert("exception.type".to_string(), error_type.into());
            attributes.insert("exception.message".to_string(), message.into());
            self.add_event("exception", attributes);
        }
    }

    pub fn set_success(&mut self) {
        if !self.finished {
            self.data.status = SpanStatus::Ok;
        }
    }

    pub fn add_event(&mut self, name: &str, attributes: HashMap<String, AttributeValue>) {
        if !self.finished {
            self.data.events.push(SpanEvent {
                name: name.to_string(),
                time_unix_nano: now_nanos(),
                attributes,
            });
        }
    }

    /// Record token usage, model and cost
    pub fn record_usage(&mut self, report: &UsageReport) {
        let usage = &report.usage;
        self.set_attribute(attrs::LLM_PROMPT_TOKENS, usage.prompt_tokens);
        self.set_attribute(attrs::LLM_COMPLETION_TOKENS, usage.completion_tokens);
        self.set_attribute(attrs::LLM_TOTAL_TOKENS, usage.total_tokens);
        self.set_attribute(attrs::USAGE_INPUT_TOKENS, usage.prompt_tokens);
        self.set_attribute(attrs::USAGE_OUTPUT_TOKENS, usage.completion_tokens);
        self.set_attribute(attrs::LLM_USAGE_SOURCE, report.strategy.as_str());
        if let Some(model) = &report.model {
            self.set_attribute(attrs::RESPONSE_MODEL, model.as_str());
        }
        if let Some(cost) = report.cost {
            self.set_attribute(attrs::LLM_COST, cost);
        }
    }

    /// Finish the span and queue for export
    pub fn finish(mut self) {
        self.end_at(now_nanos());
    }

    /// Finish with the measured duration instead of the wall clock
    pub fn finish_with_duration(mut self, duration: Duration) {
        let end = self.data.start_time_unix_nano + duration.as_nanos() as u64;
        self.end_at(end);
    }

    /// Drop the span without exporting it
    pub fn discard(mut self) {
        self.finished = true;
    }

    fn end_at(&mut self, end_time_unix_nano: u64) {
        if self.finished {
            return;
        }
        self.data.end_time_unix_nano = end_time_unix_nano;
        self.finished = true;
        enqueue(
            self.data.clone(),
            &self.pending_spans,
            &self.exporter,
            &self.dropped_spans,
            &self.exports,
            self.limits,
        );
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        self.end_at(now_nanos());
    }
}

fn enqueue(
    span: SpanData,
    pending_spans: &Mutex<Vec<SpanData>>,
    exporter: &Arc<dyn SpanExporter>,
    dropped_spans: &AtomicU64,
    exports: &Mutex<Vec<JoinHandle<()>>>,
    limits: QueueLimits,
) {
    let Ok(mut pending) = pending_spans.lock() else {
        return;
    };
    pending.push(span);

    if pending.len() >= limits.batch_size {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let batch = std::mem::take(&mut *pending);
            let exporter = Arc::clone(exporter);
            let export = handle.spawn(async move {
                if let Err(e) = exporter.export(batch).await {
                    tracing::warn!("Failed to export span batch: {}", e);
                }
            });
            if let Ok(mut exports) = exports.lock() {
                exports.retain(|export| !export.is_finished());
                exports.push(export);
            }
            return;
        }
    }

    if pending.len() > limits.max_pending {
        let overflow = pending.len() - limits.max_pending;
        pending.drain(..overflow);
        dropped_spans.fetch_add(overflow as u64, Ordering::Relaxed);
    }
}

//! The caller-facing observability agent.
//!
//! [`Kansatsu`] owns one [`MetricsRegistry`], one [`Tracer`], one
//! [`SensitiveContentScanner`] and one [`SnapshotPublisher`], and ties them
//! together with an explicit lifecycle: build, instrument calls, optionally
//! start pushing snapshots, then [`shutdown`](Kansatsu::shutdown).
//!
//! # Quick Start
//!
//! ```no_run
//! use kansatsu::{InstrumentConfig, Kansatsu, KansatsuConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> kansatsu::Result<()> {
//!     let agent = Kansatsu::new(KansatsuConfig::new("support-bot"))?;
//!
//!     let generate = agent.wrap(
//!         |prompt: &str| json!({"text": prompt, "usage": {"prompt_tokens": 12, "completion_tokens": 30}}),
//!         "generate",
//!         InstrumentConfig::new().tracking_tokens(),
//!     )?;
//!     let response = generate.call("Where is my order?");
//!
//!     let text = response["text"].as_str().unwrap_or_default();
//!     let scan = agent.check_sensitive_content(text)?;
//!     if scan.pii_found {
//!         println!("redacted: {}", scan.redact(text));
//!     }
//!
//!     agent.record_interaction_time(840.0)?;
//!     agent.record_quality_feedback(5)?;
//!
//!     if let Some(summary) = agent.shutdown().await {
//!         println!("{}", summary);
//!     }
//!     Ok(())
//! }
//! ```

use crate::config::KansatsuConfig;
use crate::instrument::{self, InstrumentConfig, Instrumentation, Instrumented};
use crate::metrics::{MetricsCollector, MetricsRegistry, RaiAlert, Snapshot};
use crate::publisher::{HttpDashboardSink, SnapshotPublisher, SnapshotSink};
use crate::rai::patterns::PatternRecognizer;
use crate::rai::{EntityRecognizer, Redaction, ScanResult, SensitiveContentScanner};
use crate::telemetry::genai::{RAI_ALERT_EVENT, RAI_SCAN_SPAN_NAME, SESSION_SPAN_NAME};
use crate::telemetry::{attrs, AttributeValue, ExportError, Span, SpanExporter, Tracer};
use crate::usage::TokenUsageExtractor;
use crate::{KansatsuError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// In-process observability agent for LLM and tool calls
#[derive(Debug)]
pub struct Kansatsu {
    config: KansatsuConfig,
    session_id: String,
    started_at: DateTime<Utc>,
    registry: Arc<MetricsRegistry>,
    tracer: Tracer,
    extractor: Arc<TokenUsageExtractor>,
    scanner: SensitiveContentScanner,
    publisher: SnapshotPublisher,
    session_span: Mutex<Option<Span>>,
    shut_down: AtomicBool,
}

impl Kansatsu {
    /// Agent with the built-in exporter, pattern recognizer and no collector
    pub fn new(config: KansatsuConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Agent configured from `KANSATSU_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(KansatsuConfig::from_env()?)
    }

    pub fn builder() -> KansatsuBuilder {
        KansatsuBuilder::new()
    }

    pub fn config(&self) -> &KansatsuConfig {
        &self.config
    }

    pub fn service_name(&self) -> &str {
        &self.config.service.name
    }

    /// Random id of this agent's session
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn scanner(&self) -> &SensitiveContentScanner {
        &self.scanner
    }

    pub fn publisher(&self) -> &SnapshotPublisher {
        &self.publisher
    }

    /// Validated call site for `name`
    pub fn instrument(&self, name: &str, config: InstrumentConfig) -> Result<Instrumentation> {
        Instrumentation::new(
            name,
            config,
            Arc::clone(&self.registry),
            self.tracer.clone(),
            Arc::clone(&self.extractor),
        )
    }

    /// Call site for a name already validated at compile time by `#[monitor]`
    #[doc(hidden)]
    pub fn monitor_site(&self, name: &str, config: InstrumentConfig) -> Instrumentation {
        Instrumentation::new_unchecked(
            name,
            config,
            Arc::clone(&self.registry),
            self.tracer.clone(),
            Arc::clone(&self.extractor),
        )
    }

    /// Wrap `function` so every call is timed, traced and recorded
    pub fn wrap<F>(
        &self,
        function: F,
        name: &str,
        config: InstrumentConfig,
    ) -> Result<Instrumented<F>> {
        Ok(self.instrument(name, config)?.wrap(function))
    }

    /// Record an end-to-end interaction time in milliseconds
    pub fn record_interaction_time(&self, duration_ms: f64) -> Result<()> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(KansatsuError::invalid_input(format!(
                "Interaction time must be a non-negative number of milliseconds, got {}",
                duration_ms
            )));
        }
        let duration = Duration::from_nanos((duration_ms * 1_000_000.0).round() as u64);
        self.registry.record_interaction(duration, None)?;
        debug!("Recorded interaction time of {:.2} ms", duration_ms);
        Ok(())
    }

    /// Record an interaction together with its quality score
    pub fn record_interaction(&self, duration: Duration, feedback: Option<u8>) -> Result<()> {
        self.registry.record_interaction(duration, feedback)
    }

    /// Record a 1-5 quality score for the latest interaction
    pub fn record_quality_feedback(&self, score: u8) -> Result<()> {
        self.registry.record_feedback(score)?;
        info!("Quality feedback received: {}/5", score);
        Ok(())
    }

    /// Scan text for sensitive content and record an alert per finding
    ///
    /// Each scan is traced as a `rai.scan` span, a child of the active
    /// instrumented call if there is one.
    pub fn check_sensitive_content(&self, text: &str) -> Result<ScanResult> {
        let mut span = self.start_scan_span();
        let result = match self.scanner.scan(text) {
            Ok(result) => result,
            Err(e) => return Err(Self::fail_scan_span(&mut span, e)),
        };
        Self::finish_scan_span(span, &result);
        self.report_findings(&result);
        Ok(result)
    }

    /// Scan, record alerts, and return the text with findings replaced
    pub fn redact_sensitive_content(&self, text: &str) -> Result<Redaction> {
        let mut span = self.start_scan_span();
        let redaction = match self.scanner.redact(text) {
            Ok(redaction) => redaction,
            Err(e) => return Err(Self::fail_scan_span(&mut span, e)),
        };
        Self::finish_scan_span(span, &redaction.result);
        self.report_findings(&redaction.result);
        Ok(redaction)
    }

    fn start_scan_span(&self) -> Span {
        let parent = instrument::active_span_id(self.registry.id());
        self.tracer
            .start_span_with_parent(RAI_SCAN_SPAN_NAME, parent.as_deref())
    }

    fn finish_scan_span(mut span: Span, result: &ScanResult) {
        span.set_attribute(attrs::RAI_PII_FOUND, result.pii_found);
        span.set_attribute(attrs::RAI_FINDINGS_COUNT, result.findings.len());
        for finding in &result.findings {
            let mut attributes = HashMap::new();
            attributes.insert(
                attrs::RAI_ENTITY_TYPE.to_string(),
                AttributeValue::from(finding.entity_type.as_str()),
            );
            attributes.insert(attrs::RAI_START.to_string(), AttributeValue::from(finding.start));
            span.add_event(RAI_ALERT_EVENT, attributes);
        }
        span.set_success();
        span.finish();
    }

    fn fail_scan_span(span: &mut Span, error: KansatsuError) -> KansatsuError {
        let error_type = if error.is_backend_unavailable() {
            "backend_unavailable"
        } else {
            "scan_failed"
        };
        span.record_error(error_type, &error.to_string());
        error
    }

    /// Record one responsible-AI alert per finding, returning how many
    pub fn report_findings(&self, result: &ScanResult) -> usize {
        for finding in &result.findings {
            self.registry.record_alert(RaiAlert::new(
                finding.entity_type.as_str(),
                format!("Found at index {}", finding.start),
            ));
        }
        if result.pii_found {
            warn!(
                "Sensitive content detected: {} finding(s) of {:?}",
                result.findings.len(),
                result
                    .categories()
                    .iter()
                    .map(|c| c.as_str().to_string())
                    .collect::<Vec<_>>()
            );
        }
        result.findings.len()
    }

    /// Current aggregated state
    pub fn snapshot(&self) -> Snapshot {
        self.registry.snapshot()
    }

    /// Register a sink for pushed snapshots
    pub fn subscribe(&self, sink: Arc<dyn SnapshotSink>) {
        self.publisher.subscribe(sink);
    }

    /// Start pushing snapshots on the configured interval
    pub fn start_publisher(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(KansatsuError::invalid_input("Agent is shut down"));
        }
        self.publisher.start()
    }

    /// Human-readable summary table of the current state
    pub fn summary(&self) -> String {
        self.snapshot().to_string()
    }

    /// Export every pending span now
    pub async fn flush_spans(&self) -> std::result::Result<(), ExportError> {
        self.tracer.flush().await
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop publishing and flush everything
    ///
    /// Only the first call does any work; it returns the final snapshot.
    /// Later calls return `None`. With `export_on_shutdown` the final
    /// snapshot goes to every sink and a session summary span is exported
    /// with the pending spans.
    pub async fn shutdown(&self) -> Option<Snapshot> {
        if self
            .shut_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Shutdown already performed; ignoring");
            return None;
        }

        info!("Shutting down kansatsu session {}", self.session_id);
        self.publisher.stop().await;
        let snapshot = self.registry.snapshot();

        let session_span = self.session_span.lock().ok().and_then(|mut span| span.take());
        if self.config.publisher.export_on_shutdown {
            let delivered = self.publisher.publish_final(&snapshot).await;
            debug!("Final snapshot delivered to {} sink(s)", delivered);

            if let Some(mut span) = session_span {
                Self::annotate_session_span(&mut span, &snapshot);
                span.finish();
            }
        } else if let Some(span) = session_span {
            span.discard();
        }

        if let Err(e) = self.tracer.shutdown().await {
            warn!("Span exporter shutdown failed: {}", e);
        }
        let dropped = self.tracer.dropped_spans();
        if dropped > 0 {
            warn!("{} span(s) were dropped because the export queue was full", dropped);
        }

        info!("Session summary:\n{}", snapshot);
        Some(snapshot)
    }

    fn annotate_session_span(span: &mut Span, snapshot: &Snapshot) {
        let totals = &snapshot.totals;
        span.set_attribute(attrs::SESSION_TOTAL_CALLS, totals.calls);
        span.set_attribute(attrs::SESSION_TOTAL_ERRORS, totals.errors);
        span.set_attribute(attrs::SESSION_TOTAL_TOKENS, totals.total_tokens);
        span.set_attribute(attrs::SESSION_TOTAL_COST, totals.cost);
        span.set_attribute(
            attrs::SESSION_FUNCTIONS,
            snapshot.functions.keys().cloned().collect::<Vec<String>>(),
        );
        span.set_success();
    }
}

impl Drop for Kansatsu {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::Acquire) {
            debug!(
                "Kansatsu session {} dropped without shutdown; the final snapshot was not published",
                self.session_id
            );
        }
    }
}

/// Builder for [`Kansatsu`]
#[derive(Default)]
pub struct KansatsuBuilder {
    config: KansatsuConfig,
    exporter: Option<Arc<dyn SpanExporter>>,
    recognizer: Option<Arc<dyn EntityRecognizer>>,
    collector: Option<Arc<dyn MetricsCollector>>,
    sinks: Vec<Arc<dyn SnapshotSink>>,
}

impl std::fmt::Debug for KansatsuBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KansatsuBuilder")
            .field("config", &self.config)
            .field("exporter", &self.exporter)
            .field("recognizer", &self.recognizer.as_ref().map(|r| r.name()))
            .field("collector", &self.collector)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl KansatsuBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: KansatsuConfig) -> Self {
        self.config = config;
        self
    }

    /// Export spans here instead of the configured built-in exporter
    pub fn exporter(mut self, exporter: Arc<dyn SpanExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Use this entity-recognition backend instead of the pattern recognizer
    pub fn recognizer(mut self, recognizer: Arc<dyn EntityRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Mirror every registry event into a metrics collector
    pub fn collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Subscribe a snapshot sink from the start
    pub fn sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> Result<Kansatsu> {
        let config = self.config;
        config.validate()?;

        let mut registry = MetricsRegistry::new(config.registry.clone())
            .with_service(config.service.name.clone(), config.service.version.clone());
        if let Some(collector) = self.collector {
            registry = registry.with_collector(collector);
        }
        let registry = Arc::new(registry);

        let tracer = match self.exporter {
            Some(exporter) => Tracer::new(exporter).with_batch_size(config.telemetry.batch_size),
            None => config.telemetry.build_tracer(),
        };
        let extractor = Arc::new(TokenUsageExtractor::new().with_prices(config.prices.clone()));

        let recognizer = self
            .recognizer
            .unwrap_or_else(|| Arc::new(PatternRecognizer::new()));
        let scanner =
            SensitiveContentScanner::new(recognizer).with_config(config.scanner.clone());

        let publisher = SnapshotPublisher::new(Arc::clone(&registry), config.publisher.push_interval);
        if let Some(url) = &config.publisher.dashboard_url {
            publisher.subscribe(Arc::new(HttpDashboardSink::new(
                url.as_str(),
                config.publisher.request_timeout,
            )?));
        }
        for sink in self.sinks {
            publisher.subscribe(sink);
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        tracer.start_trace();
        let mut session_span = tracer.start_span(SESSION_SPAN_NAME);
        session_span.set_attribute(attrs::SERVICE_NAME, config.service.name.as_str());
        session_span.set_attribute(attrs::SERVICE_VERSION, config.service.version.as_str());
        session_span.set_attribute(attrs::SESSION_ID, session_id.as_str());

        info!(
            "Kansatsu initialized for service '{}' v{} (session {})",
            config.service.name, config.service.version, session_id
        );

        Ok(Kansatsu {
            config,
            session_id,
            started_at: Utc::now(),
            registry,
            tracer,
            extractor,
            scanner,
            publisher,
            session_span: Mutex::new(Some(session_span)),
            shut_down: AtomicBool::new(false),
        })
    }
}

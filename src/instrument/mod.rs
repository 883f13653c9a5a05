//! Call instrumentation: timing, spans and metrics for wrapped functions.
//!
//! An [`Instrumentation`] is a validated call site: a display name, the
//! [`InstrumentConfig`] and handles to the registry, tracer and token
//! extractor it reports into. Wrapping a function with
//! [`Instrumentation::wrap`] yields an [`Instrumented`] callable with the
//! same argument and return types.
//!
//! Every call is finalized by a [`CallGuard`]. Success and `Err` are recorded
//! when the guard is finished with the call's outcome; a panic unwinding
//! through the wrapper or a future dropped before completion is recorded when
//! the guard is dropped. Either way the caller sees the original value,
//! error or panic.
//!
//! # Nesting
//!
//! Every call is recorded, including recursive calls and distinct functions
//! sharing a span name. Active calls are tracked per thread for synchronous
//! calls and per task (via a `tokio` task-local) for async calls, so a call
//! started under another one gets its span as parent.
//!
//! Instrumentation is applied once per function: an [`Instrumented`] is not
//! itself callable as a closure, so it cannot be wrapped again, and repeated
//! `#[monitor]` attributes on one function expand to a single wrapper.

use crate::metrics::MetricsRegistry;
use crate::telemetry::{attrs, AttributeValue, Span, Tracer};
use crate::usage::TokenUsageExtractor;
use crate::{KansatsuError, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

pub mod outcome;

pub use outcome::{CallFailure, CallOutcome};

/// Longest accepted function or span name
pub const MAX_NAME_LEN: usize = 256;

/// Logged inputs and outputs are cut to this many characters
pub const MAX_LOGGED_CHARS: usize = 1000;

/// Per-call-site switches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Extract token usage and cost from successful results
    #[serde(default)]
    pub track_tokens: bool,
    /// Record Debug-formatted arguments and the output text on the span
    #[serde(default)]
    pub log_io: bool,
    /// Name recorded in metrics and spans instead of the function name
    #[serde(default)]
    pub span_name: Option<String>,
}

impl InstrumentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracking_tokens(mut self) -> Self {
        self.track_tokens = true;
        self
    }

    pub fn logging_io(mut self) -> Self {
        self.log_io = true;
        self
    }

    pub fn with_span_name(mut self, span_name: impl Into<String>) -> Self {
        self.span_name = Some(span_name.into());
        self
    }
}

/// Check a function or span name
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(KansatsuError::instrumentation(name, "name must not be empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(KansatsuError::instrumentation(
            truncate(name, 32),
            format!("name must be at most {} characters", MAX_NAME_LEN),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(KansatsuError::instrumentation(
            name.escape_debug().to_string(),
            "name must not contain control characters",
        ));
    }
    Ok(())
}

/// First `max_chars` characters of `text`
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone)]
struct ActiveCall {
    registry: u64,
    span_id: String,
}

thread_local! {
    static SYNC_CALLS: RefCell<Vec<ActiveCall>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_CALLS: Vec<ActiveCall>;
}

fn active_calls() -> Vec<ActiveCall> {
    let mut calls = TASK_CALLS.try_with(Clone::clone).unwrap_or_default();
    SYNC_CALLS.with(|sync| calls.extend(sync.borrow().iter().cloned()));
    calls
}

/// Span id of the innermost active call recording into `registry_id`
pub(crate) fn active_span_id(registry_id: u64) -> Option<String> {
    active_calls()
        .into_iter()
        .rev()
        .find(|call| call.registry == registry_id)
        .map(|call| call.span_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallScope {
    Thread,
    Task,
}

struct Site {
    name: Arc<str>,
    span_name: Arc<str>,
    config: InstrumentConfig,
    registry: Arc<MetricsRegistry>,
    tracer: Tracer,
    extractor: Arc<TokenUsageExtractor>,
}

/// A validated call site bound to a registry and tracer
#[derive(Clone)]
pub struct Instrumentation {
    site: Arc<Site>,
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation")
            .field("name", &self.site.name)
            .field("span_name", &self.site.span_name)
            .field("config", &self.site.config)
            .field("registry", &self.site.registry.id())
            .finish()
    }
}

impl Instrumentation {
    /// Validate `name` and `config` and bind them to the given sinks
    pub fn new(
        name: &str,
        config: InstrumentConfig,
        registry: Arc<MetricsRegistry>,
        tracer: Tracer,
        extractor: Arc<TokenUsageExtractor>,
    ) -> Result<Self> {
        validate_name(name)?;
        if let Some(span_name) = &config.span_name {
            validate_name(span_name).map_err(|e| match e {
                KansatsuError::Instrumentation { message, .. } => KansatsuError::instrumentation(
                    name,
                    format!("span name override {}", message.replacen("name ", "", 1)),
                ),
                other => other,
            })?;
        }
        Ok(Self::new_unchecked(name, config, registry, tracer, extractor))
    }

    pub(crate) fn new_unchecked(
        name: &str,
        config: InstrumentConfig,
        registry: Arc<MetricsRegistry>,
        tracer: Tracer,
        extractor: Arc<TokenUsageExtractor>,
    ) -> Self {
        let name: Arc<str> = Arc::from(name);
        let span_name = match &config.span_name {
            Some(span_name) => Arc::from(span_name.as_str()),
            None => Arc::clone(&name),
        };
        Self {
            site: Arc::new(Site {
                name,
                span_name,
                config,
                registry,
                tracer,
                extractor,
            }),
        }
    }

    /// Display name of the wrapped function
    pub fn name(&self) -> &str {
        &self.site.name
    }

    /// Name calls are recorded under
    pub fn span_name(&self) -> &str {
        &self.site.span_name
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.site.config
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.site.registry
    }

    /// Wrap a function; see [`Instrumented::call`] and [`Instrumented::call_async`]
    pub fn wrap<F>(self, function: F) -> Instrumented<F> {
        Instrumented {
            instrumentation: self,
            function,
        }
    }

    /// Debug rendering of the arguments, only when I/O logging is on
    pub fn capture_input(&self, args: &dyn fmt::Debug) -> Option<String> {
        self.site
            .config
            .log_io
            .then(|| truncate(&format!("{:?}", args), MAX_LOGGED_CHARS))
    }

    /// Run a synchronous call under this site
    pub fn run<R, F>(&self, input: Option<String>, call: F) -> R
    where
        F: FnOnce() -> R,
        R: CallOutcome,
    {
        let guard = self.begin(input, CallScope::Thread);
        let output = call();
        guard.finish(&output);
        output
    }

    /// Run an asynchronous call under this site
    ///
    /// Timing starts at the first poll. Dropping the returned future before
    /// it completes records a failed call.
    pub fn run_async<Fut>(
        &self,
        input: Option<String>,
        call: Fut,
    ) -> impl Future<Output = Fut::Output>
    where
        Fut: Future,
        Fut::Output: CallOutcome,
    {
        let this = self.clone();
        async move {
            let mut guard = this.begin(input, CallScope::Task);
            let output = match guard.task_calls.take() {
                Some(calls) => TASK_CALLS.scope(calls, call).await,
                None => call.await,
            };
            guard.finish(&output);
            output
        }
    }

    fn begin(&self, input: Option<String>, scope: CallScope) -> CallGuard {
        let site = &self.site;
        let registry_id = site.registry.id();
        let mut active = active_calls();
        let parent = active
            .iter()
            .rev()
            .find(|call| call.registry == registry_id)
            .map(|call| call.span_id.clone());
        let mut span = site
            .tracer
            .start_span_with_parent(&site.span_name, parent.as_deref());
        span.set_attribute(attrs::FUNCTION_NAME, &*site.name);
        if let Some(input) = input {
            let mut attributes = HashMap::new();
            attributes.insert("input".to_string(), AttributeValue::from(input));
            span.add_event("function_input", attributes);
        }

        let entry = ActiveCall {
            registry: registry_id,
            span_id: span.span_id().to_string(),
        };
        let task_calls = match scope {
            CallScope::Thread => {
                SYNC_CALLS.with(|sync| sync.borrow_mut().push(entry.clone()));
                None
            }
            CallScope::Task => {
                active.push(entry.clone());
                Some(active)
            }
        };

        CallGuard {
            site: Some(Arc::clone(&self.site)),
            span: Some(span),
            start: Instant::now(),
            span_id: Some(entry.span_id),
            task_calls,
            scope,
        }
    }
}

/// Finalizes one call on every exit path
///
/// [`CallGuard::finish`] records the call's outcome. A guard dropped without
/// being finished records a failure: `panic` while unwinding, `cancelled`
/// otherwise.
#[must_use = "a call guard records a failure when dropped unfinished"]
pub struct CallGuard {
    /// Taken once the call is recorded
    site: Option<Arc<Site>>,
    span: Option<Span>,
    start: Instant,
    span_id: Option<String>,
    task_calls: Option<Vec<ActiveCall>>,
    scope: CallScope,
}

impl fmt::Debug for CallGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallGuard")
            .field("name", &self.site.as_ref().map(|site| &site.span_name))
            .field("elapsed", &self.start.elapsed())
            .finish()
    }
}

impl CallGuard {
    /// Record the call's outcome
    pub fn finish<R: CallOutcome + ?Sized>(mut self, outcome: &R) {
        let Some(site) = self.site.take() else {
            return;
        };
        let elapsed = self.start.elapsed();
        self.leave();
        let mut span = self.span.take();

        if let Some(failure) = outcome.failure() {
            Self::record_failure(&site, span, elapsed, &failure);
            return;
        }

        let report = if site.config.track_tokens {
            outcome
                .response()
                .and_then(|response| site.extractor.report(&response))
        } else {
            None
        };

        if let Some(span) = span.as_mut() {
            span.set_success();
            if let Some(report) = &report {
                span.record_usage(report);
            }
            if site.config.log_io {
                if let Some(text) = outcome.output_text() {
                    let mut attributes = HashMap::new();
                    attributes.insert(
                        "output".to_string(),
                        AttributeValue::from(truncate(&text, MAX_LOGGED_CHARS)),
                    );
                    span.add_event("function_output", attributes);
                }
            }
        }

        site.registry.record_call(
            &site.span_name,
            elapsed,
            true,
            report.as_ref().map(|report| &report.usage),
            report.as_ref().and_then(|report| report.cost),
        );
        Self::close_span(span, elapsed);
        tracing::debug!(
            "'{}' finished in {:.2} ms",
            site.span_name,
            elapsed.as_nanos() as f64 / 1_000_000.0
        );
    }

    fn record_failure(
        site: &Site,
        span: Option<Span>,
        elapsed: std::time::Duration,
        failure: &CallFailure,
    ) {
        let mut span = span;
        if let Some(span) = span.as_mut() {
            span.record_error(&failure.error_type, &failure.message);
        }
        site.registry
            .record_call(&site.span_name, elapsed, false, None, None);
        Self::close_span(span, elapsed);
        tracing::error!(
            "Error in '{}' after {:.2} ms: {} ({})",
            site.span_name,
            elapsed.as_nanos() as f64 / 1_000_000.0,
            failure.message,
            failure.error_type
        );
    }

    fn close_span(span: Option<Span>, elapsed: std::time::Duration) {
        if let Some(mut span) = span {
            span.set_attribute(attrs::DURATION_MS, elapsed.as_nanos() as f64 / 1_000_000.0);
            span.finish_with_duration(elapsed);
        }
    }

    /// Remove this call from the thread's active-call stack
    fn leave(&mut self) {
        if self.scope != CallScope::Thread {
            return;
        }
        if let Some(span_id) = self.span_id.take() {
            SYNC_CALLS.with(|sync| {
                let mut sync = sync.borrow_mut();
                if let Some(position) = sync.iter().rposition(|call| call.span_id == span_id) {
                    sync.remove(position);
                }
            });
        }
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let Some(site) = self.site.take() else {
            return;
        };
        let elapsed = self.start.elapsed();
        self.leave();
        let failure = if std::thread::panicking() {
            CallFailure::new("panic", "call panicked")
        } else {
            CallFailure::new("cancelled", "call dropped before completion")
        };
        Self::record_failure(&site, self.span.take(), elapsed, &failure);
    }
}

/// A function wrapped with an [`Instrumentation`]
///
/// Arguments are passed as a single value; use a tuple for several.
pub struct Instrumented<F> {
    instrumentation: Instrumentation,
    function: F,
}

impl<F> fmt::Debug for Instrumented<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumented")
            .field("instrumentation", &self.instrumentation)
            .finish_non_exhaustive()
    }
}

impl<F> Instrumented<F> {
    /// Display name of the wrapped function
    pub fn name(&self) -> &str {
        self.instrumentation.name()
    }

    pub fn instrumentation(&self) -> &Instrumentation {
        &self.instrumentation
    }

    /// Unwrap the original function
    pub fn into_inner(self) -> F {
        self.function
    }

    /// Invoke a synchronous function
    ///
    /// Arguments are never recorded; see [`Instrumented::call_logged`].
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
        R: CallOutcome,
    {
        self.instrumentation.run(None, || (self.function)(args))
    }

    /// Invoke a synchronous function, recording its arguments when the site
    /// logs I/O
    pub fn call_logged<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
        A: fmt::Debug,
        R: CallOutcome,
    {
        let input = self.instrumentation.capture_input(&args);
        self.instrumentation.run(input, || (self.function)(args))
    }

    /// Invoke an asynchronous function
    pub fn call_async<A, Fut>(&self, args: A) -> impl Future<Output = Fut::Output>
    where
        F: Fn(A) -> Fut,
        Fut: Future,
        Fut::Output: CallOutcome,
    {
        self.instrumentation.run_async(None, (self.function)(args))
    }

    /// Async counterpart of [`Instrumented::call_logged`]
    pub fn call_async_logged<A, Fut>(&self, args: A) -> impl Future<Output = Fut::Output>
    where
        F: Fn(A) -> Fut,
        A: fmt::Debug,
        Fut: Future,
        Fut::Output: CallOutcome,
    {
        let input = self.instrumentation.capture_input(&args);
        self.instrumentation.run_async(input, (self.function)(args))
    }
}

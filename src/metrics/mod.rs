//! Aggregated call statistics and quality signals.
//!
//! [`MetricsRegistry`] accumulates per-function counters from concurrent
//! instrumented calls. [`MetricsRegistry::snapshot`] returns an immutable
//! [`Snapshot`] that dashboards and sinks consume. Every recorded event can
//! additionally be mirrored into an OpenTelemetry pipeline through a
//! [`MetricsCollector`].

pub mod collector;
pub mod registry;
pub mod snapshot;

pub use collector::{MetricsCollector, OtelMetricsCollector};
pub use registry::{validate_feedback, MetricsRegistry, MAX_FEEDBACK_SCORE, MIN_FEEDBACK_SCORE};
pub use snapshot::{
    percentile, FunctionSnapshot, FunctionStats, InteractionSample, QualitySummary, RaiAlert,
    ServiceInfo, Snapshot, Totals,
};

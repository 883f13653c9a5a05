//! Mirrors registry events into an OpenTelemetry metrics pipeline

use crate::usage::TokenUsage;
use opentelemetry::{
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};
use std::time::Duration;

/// Receives every event the registry records
///
/// Implementors only need the three primitive methods; the event methods
/// map registry events onto named instruments.
pub trait MetricsCollector: Send + Sync + std::fmt::Debug {
    /// Record a counter metric (monotonically increasing values)
    fn record_counter(&self, name: &str, value: u64, labels: &[KeyValue]);

    /// Record a floating-point counter (accumulated cost)
    fn record_sum(&self, name: &str, value: f64, labels: &[KeyValue]);

    /// Record a histogram metric (latency, duration, size distributions)
    fn record_histogram(&self, name: &str, value: f64, labels: &[KeyValue]);

    /// Increment a counter by 1
    fn increment(&self, name: &str, labels: &[KeyValue]) {
        self.record_counter(name, 1, labels);
    }

    /// One instrumented call finished
    fn record_call(
        &self,
        function: &str,
        duration: Duration,
        succeeded: bool,
        usage: Option<&TokenUsage>,
        cost: Option<f64>,
    ) {
        let status = if succeeded { "success" } else { "error" };
        let labels = [
            KeyValue::new("function", function.to_string()),
            KeyValue::new("status", status),
        ];

        self.increment("kansatsu_calls_total", &labels);
        self.record_histogram(
            "kansatsu_call_duration",
            duration.as_nanos() as f64 / 1_000_000.0,
            &labels,
        );
        if !succeeded {
            self.increment("kansatsu_errors_total", &labels[..1]);
        }

        if let Some(usage) = usage {
            let labels = &labels[..1];
            self.record_counter("kansatsu_tokens_prompt_total", usage.prompt_tokens, labels);
            self.record_counter(
                "kansatsu_tokens_completion_total",
                usage.completion_tokens,
                labels,
            );
            self.record_counter("kansatsu_tokens_total", usage.total_tokens, labels);
        }
        if let Some(cost) = cost {
            self.record_sum("kansatsu_cost_total", cost, &labels[..1]);
        }
    }

    fn record_interaction(&self, duration: Duration) {
        self.record_histogram(
            "kansatsu_interaction_duration",
            duration.as_nanos() as f64 / 1_000_000.0,
            &[],
        );
    }

    fn record_feedback(&self, score: u8) {
        self.record_histogram("kansatsu_feedback_score", f64::from(score), &[]);
    }

    fn record_alert(&self, alert_type: &str) {
        self.increment(
            "kansatsu_rai_alerts_total",
            &[KeyValue::new("type", alert_type.to_string())],
        );
    }
}

/// OpenTelemetry-based metrics collector implementation
#[derive(Clone, Debug)]
pub struct OtelMetricsCollector {
    meter: Meter,

    // Cached instruments
    calls_counter: Counter<u64>,
    errors_counter: Counter<u64>,
    call_duration_histogram: Histogram<f64>,
    prompt_tokens_counter: Counter<u64>,
    completion_tokens_counter: Counter<u64>,
    total_tokens_counter: Counter<u64>,
    cost_counter: Counter<f64>,
    interaction_duration_histogram: Histogram<f64>,
    feedback_histogram: Histogram<f64>,
    alerts_counter: Counter<u64>,
}

impl OtelMetricsCollector {
    /// Create a collector on the given meter
    pub fn new(meter: Meter) -> Self {
        let calls_counter = meter
            .u64_counter("kansatsu_calls_total")
            .with_description("Instrumented calls completed")
            .init();

        let errors_counter = meter
            .u64_counter("kansatsu_errors_total")
            .with_description("Instrumented calls that failed")
            .init();

        let call_duration_histogram = meter
            .f64_histogram("kansatsu_call_duration")
            .with_description("Duration of instrumented calls")
            .with_unit("ms")
            .init();

        let prompt_tokens_counter = meter
            .u64_counter("kansatsu_tokens_prompt_total")
            .with_description("Prompt tokens reported by instrumented calls")
            .with_unit("tokens")
            .init();

        let completion_tokens_counter = meter
            .u64_counter("kansatsu_tokens_completion_total")
            .with_description("Completion tokens reported by instrumented calls")
            .with_unit("tokens")
            .init();

        let total_tokens_counter = meter
            .u64_counter("kansatsu_tokens_total")
            .with_description("Total tokens reported by instrumented calls")
            .with_unit("tokens")
            .init();

        let cost_counter = meter
            .f64_counter("kansatsu_cost_total")
            .with_description("Estimated cost of instrumented calls")
            .init();

        let interaction_duration_histogram = meter
            .f64_histogram("kansatsu_interaction_duration")
            .with_description("End-to-end interaction time reported by the caller")
            .with_unit("ms")
            .init();

        let feedback_histogram = meter
            .f64_histogram("kansatsu_feedback_score")
            .with_description("User quality feedback scores (1-5)")
            .init();

        let alerts_counter = meter
            .u64_counter("kansatsu_rai_alerts_total")
            .with_description("Responsible-AI alerts recorded")
            .init();

        Self {
            meter,
            calls_counter,
            errors_counter,
            call_duration_histogram,
            prompt_tokens_counter,
            completion_tokens_counter,
            total_tokens_counter,
            cost_counter,
            interaction_duration_histogram,
            feedback_histogram,
            alerts_counter,
        }
    }

    /// Collector on the globally registered meter provider
    pub fn global() -> Self {
        Self::new(opentelemetry::global::meter("kansatsu"))
    }
}

impl MetricsCollector for OtelMetricsCollector {
    fn record_counter(&self, name: &str, value: u64, labels: &[KeyValue]) {
        match name {
            "kansatsu_calls_total" => self.calls_counter.add(value, labels),
            "kansatsu_errors_total" => self.errors_counter.add(value, labels),
            "kansatsu_tokens_prompt_total" => self.prompt_tokens_counter.add(value, labels),
            "kansatsu_tokens_completion_total" => {
                self.completion_tokens_counter.add(value, labels)
            }
            "kansatsu_tokens_total" => self.total_tokens_counter.add(value, labels),
            "kansatsu_rai_alerts_total" => self.alerts_counter.add(value, labels),
            _ => {
                let counter = self.meter.u64_counter(name.to_string()).init();
                counter.add(value, labels);
            }
        }
    }

    fn record_sum(&self, name: &str, value: f64, labels: &[KeyValue]) {
        match name {
            "kansatsu_cost_total" => self.cost_counter.add(value, labels),
            _ => {
                let counter = self.meter.f64_counter(name.to_string()).init();
                counter.add(value, labels);
            }
        }
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[KeyValue]) {
        match name {
            "kansatsu_call_duration" => self.call_duration_histogram.record(value, labels),
            "kansatsu_interaction_duration" => {
                self.interaction_duration_histogram.record(value, labels)
            }
            "kansatsu_feedback_score" => self.feedback_histogram.record(value, labels),
            _ => {
                let histogram = self.meter.f64_histogram(name.to_string()).init();
                histogram.record(value, labels);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Collector that remembers what it was given
    #[derive(Debug, Default)]
    pub(crate) struct RecordingCollector {
        pub counters: Mutex<Vec<(String, u64)>>,
        pub sums: Mutex<Vec<(String, f64)>>,
        pub histograms: Mutex<Vec<(String, f64)>>,
    }

    impl RecordingCollector {
        pub fn counter_total(&self, name: &str) -> u64 {
            self.counters
                .lock()
                .unwrap()
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, v)| v)
                .sum()
        }
    }

    impl MetricsCollector for RecordingCollector {
        fn record_counter(&self, name: &str, value: u64, _labels: &[KeyValue]) {
            self.counters.lock().unwrap().push((name.to_string(), value));
        }
        fn record_sum(&self, name: &str, value: f64, _labels: &[KeyValue]) {
            self.sums.lock().unwrap().push((name.to_string(), value));
        }
        fn record_histogram(&self, name: &str, value: f64, _labels: &[KeyValue]) {
            self.histograms.lock().unwrap().push((name.to_string(), value));
        }
    }

    #[test]
    fn test_record_call_maps_to_instruments() {
        let collector = RecordingCollector::default();
        collector.record_call(
            "call_llm",
            Duration::from_millis(40),
            false,
            Some(&TokenUsage::new(3, 4)),
            Some(0.25),
        );

        assert_eq!(collector.counter_total("kansatsu_calls_total"), 1);
        assert_eq!(collector.counter_total("kansatsu_errors_total"), 1);
        assert_eq!(collector.counter_total("kansatsu_tokens_total"), 7);
        assert_eq!(
            collector.sums.lock().unwrap()[0],
            ("kansatsu_cost_total".to_string(), 0.25)
        );
        assert_eq!(
            collector.histograms.lock().unwrap()[0],
            ("kansatsu_call_duration".to_string(), 40.0)
        );
    }

    #[test]
    fn test_otel_collector_on_noop_meter() {
        // Without an SDK provider the global meter is a no-op; recording must not panic
        let collector = OtelMetricsCollector::global();
        collector.record_call("f", Duration::from_millis(1), true, None, None);
        collector.record_interaction(Duration::from_millis(5));
        collector.record_feedback(4);
        collector.record_alert("EMAIL");
        collector.record_counter("custom_total", 1, &[]);
    }
}

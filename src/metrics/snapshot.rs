//! Point-in-time views of the registry
//!
//! A [`Snapshot`] owns all of its data. It serializes to the JSON the
//! dashboard consumes and renders as a plain-text summary through `Display`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Serde helpers writing durations as fractional milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(crate) fn to_millis(duration: &Duration) -> f64 {
        duration.as_nanos() as f64 / 1_000_000.0
    }

    pub(crate) fn from_millis(millis: f64) -> Duration {
        Duration::from_nanos((millis.max(0.0) * 1_000_000.0).round() as u64)
    }

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(to_millis(duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Ok(from_millis(millis))
    }

    pub mod option {
        use super::{from_millis, to_millis};
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(d) => serializer.serialize_some(&to_millis(d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let millis = Option::<f64>::deserialize(deserializer)?;
            Ok(millis.map(from_millis))
        }
    }
}

/// Nearest-rank percentile over unsorted samples
///
/// The result is the smallest sample with at least `percentile`% of the
/// samples at or below it.
pub fn percentile(samples: &[Duration], percentile: f64) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort();

    let rank = ((percentile.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;

    Some(sorted[index])
}

/// Accumulated statistics of one instrumented function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionStats {
    pub name: String,
    pub call_count: u64,
    pub error_count: u64,
    #[serde(rename = "total_duration_ms", with = "duration_ms")]
    pub total_duration: Duration,
    #[serde(rename = "min_duration_ms", with = "duration_ms")]
    pub min_duration: Duration,
    #[serde(rename = "max_duration_ms", with = "duration_ms")]
    pub max_duration: Duration,
    #[serde(rename = "last_duration_ms", with = "duration_ms")]
    pub last_duration: Duration,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

impl FunctionStats {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            call_count: 0,
            error_count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            last_duration: Duration::ZERO,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            total_tokens: 0,
            total_cost: 0.0,
        }
    }

    pub fn success_count(&self) -> u64 {
        self.call_count - self.error_count
    }

    pub fn average_duration(&self) -> Duration {
        if self.call_count == 0 {
            Duration::ZERO
        } else {
            self.total_duration.div_f64(self.call_count as f64)
        }
    }

    pub fn average_tokens(&self) -> f64 {
        if self.call_count == 0 {
            0.0
        } else {
            self.total_tokens as f64 / self.call_count as f64
        }
    }
}

/// Statistics of one function plus duration percentiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSnapshot {
    #[serde(flatten)]
    pub stats: FunctionStats,
    #[serde(rename = "p50_duration_ms", with = "duration_ms::option")]
    pub p50_duration: Option<Duration>,
    #[serde(rename = "p95_duration_ms", with = "duration_ms::option")]
    pub p95_duration: Option<Duration>,
}

/// One end-to-end interaction reported by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionSample {
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    /// 1 to 5, when the user rated the interaction
    pub quality_feedback_score: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

/// A recorded responsible-AI alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaiAlert {
    /// Category name, e.g. `EMAIL`
    #[serde(rename = "type")]
    pub alert_type: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl RaiAlert {
    pub fn new(alert_type: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            alert_type: alert_type.into(),
            details: details.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Identity of the reporting process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
}

/// Process-wide totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub calls: u64,
    pub errors: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    /// Interactions ever recorded, including those evicted from the buffer
    pub interactions: u64,
    #[serde(
        rename = "average_interaction_ms",
        with = "duration_ms::option",
        default
    )]
    pub average_interaction: Option<Duration>,
}

/// Quality feedback summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    /// Mean of every score ever recorded
    pub average_feedback: Option<f64>,
    pub feedback_count: u64,
    /// Most recent scores, oldest first
    pub recent_scores: Vec<u8>,
}

/// Immutable copy of the registry's aggregated state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Increases by one per snapshot taken from the same registry
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub service: ServiceInfo,
    pub functions: BTreeMap<String, FunctionSnapshot>,
    /// Recent interactions, oldest first
    pub interactions: Vec<InteractionSample>,
    pub totals: Totals,
    pub quality: QualitySummary,
    /// Recent alerts, oldest first
    pub rai_alerts: Vec<RaiAlert>,
    /// Alerts ever recorded, including those evicted from the buffer
    pub rai_alert_count: u64,
}

impl Snapshot {
    pub fn function(&self, name: &str) -> Option<&FunctionSnapshot> {
        self.functions.get(name)
    }

    /// Functions ordered by total time spent, highest first
    pub fn functions_by_total_time(&self) -> Vec<&FunctionSnapshot> {
        let mut functions: Vec<_> = self.functions.values().collect();
        functions.sort_by(|a, b| {
            b.stats
                .total_duration
                .cmp(&a.stats.total_duration)
                .then_with(|| a.stats.name.cmp(&b.stats.name))
        });
        functions
    }

    pub fn to_json(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn millis(duration: Duration) -> f64 {
    duration_ms::to_millis(&duration)
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(82);
        writeln!(f, "{}", rule)?;
        writeln!(
            f,
            "Observability Summary: {} {}",
            self.service.name, self.service.version
        )?;
        writeln!(f, "{}", rule)?;

        writeln!(f, "\n--- General Stats ---")?;
        writeln!(f, "Total Monitored Calls: {}", self.totals.calls)?;
        writeln!(f, "Total Errors: {}", self.totals.errors)?;
        match self.totals.average_interaction {
            Some(average) => writeln!(
                f,
                "Average End-to-End Interaction Time: {:.2} ms (from {} interactions)",
                millis(average),
                self.totals.interactions
            )?,
            None => writeln!(
                f,
                "Average End-to-End Interaction Time: No full interactions completed."
            )?,
        }

        writeln!(f, "\n--- LLM Usage ---")?;
        writeln!(f, "Prompt Tokens: {}", self.totals.prompt_tokens)?;
        writeln!(f, "Completion Tokens: {}", self.totals.completion_tokens)?;
        writeln!(f, "Total Tokens: {}", self.totals.total_tokens)?;
        if self.totals.cost > 0.0 {
            writeln!(f, "Estimated Cost: ${:.6}", self.totals.cost)?;
        }

        writeln!(f, "\n--- Quality & Responsible AI ---")?;
        match self.quality.average_feedback {
            Some(average) => writeln!(
                f,
                "Average User Quality Score: {:.2} / 5.0 (from {} ratings)",
                average, self.quality.feedback_count
            )?,
            None => writeln!(f, "Average User Quality Score: No ratings provided.")?,
        }
        writeln!(f, "Responsible AI Alerts Found: {}", self.rai_alert_count)?;
        for (i, alert) in self.rai_alerts.iter().enumerate() {
            writeln!(
                f,
                "    {}. Type: {}, Details: {}",
                i + 1,
                alert.alert_type,
                alert.details
            )?;
        }

        writeln!(f, "\n--- Method Performance Summary (Sorted by Total Time) ---")?;
        if self.functions.is_empty() {
            writeln!(f, "No methods were monitored.")?;
        } else {
            writeln!(
                f,
                "{:<30} | {:>5} | {:>6} | {:>12} | {:>12} | {:>12}",
                "Method Name", "Calls", "Errors", "Avg Time", "p95 Time", "Total Tokens"
            )?;
            writeln!(f, "{}", "-".repeat(92))?;
            for function in self.functions_by_total_time() {
                let stats = &function.stats;
                writeln!(
                    f,
                    "{:<30} | {:>5} | {:>6} | {:>9.2} ms | {:>9.2} ms | {:>12}",
                    stats.name,
                    stats.call_count,
                    stats.error_count,
                    millis(stats.average_duration()),
                    millis(function.p95_duration.unwrap_or_default()),
                    stats.total_tokens
                )?;
            }
        }
        write!(f, "{}", rule)
    }
}

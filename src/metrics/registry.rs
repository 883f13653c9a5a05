//! Thread-safe accumulator of per-function statistics
//!
//! The name-to-entry map sits behind an `RwLock` whose write side is only
//! taken the first time a name is seen. Each entry has its own `Mutex`, held
//! just long enough to apply one call's increments, so concurrent calls to
//! different functions never contend.
//!
//! A poisoned lock means a bug inside the registry itself; it panics instead
//! of reporting numbers that may be inconsistent.

use super::collector::MetricsCollector;
use super::snapshot::{
    percentile, FunctionSnapshot, FunctionStats, InteractionSample, QualitySummary, RaiAlert,
    ServiceInfo, Snapshot, Totals,
};
use crate::config::RegistryConfig;
use crate::usage::TokenUsage;
use crate::{KansatsuError, Result};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Lowest accepted quality score
pub const MIN_FEEDBACK_SCORE: u8 = 1;
/// Highest accepted quality score
pub const MAX_FEEDBACK_SCORE: u8 = 5;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("metrics registry lock poisoned"),
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(_) => panic!("metrics registry lock poisoned"),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(_) => panic!("metrics registry lock poisoned"),
    }
}

/// Validate a 1-5 quality score
pub fn validate_feedback(score: u8) -> Result<()> {
    if (MIN_FEEDBACK_SCORE..=MAX_FEEDBACK_SCORE).contains(&score) {
        Ok(())
    } else {
        Err(KansatsuError::invalid_input(format!(
            "Quality feedback score must be between {} and {}, got {}",
            MIN_FEEDBACK_SCORE, MAX_FEEDBACK_SCORE, score
        )))
    }
}

#[derive(Debug)]
struct FunctionEntry {
    stats: FunctionStats,
    recent_durations: VecDeque<Duration>,
}

#[derive(Debug, Default)]
struct InteractionState {
    samples: VecDeque<InteractionSample>,
    total_count: u64,
    total_duration: Duration,
}

#[derive(Debug, Default)]
struct FeedbackState {
    recent: VecDeque<u8>,
    total_count: u64,
    sum: u64,
}

#[derive(Debug, Default)]
struct AlertState {
    recent: VecDeque<RaiAlert>,
    total_count: u64,
}

/// Accumulates call statistics and quality signals
#[derive(Debug)]
pub struct MetricsRegistry {
    id: u64,
    config: RegistryConfig,
    service: ServiceInfo,
    functions: RwLock<HashMap<String, Arc<Mutex<FunctionEntry>>>>,
    interactions: Mutex<InteractionState>,
    feedback: Mutex<FeedbackState>,
    alerts: Mutex<AlertState>,
    sequence: AtomicU64,
    collector: Option<Arc<dyn MetricsCollector>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl MetricsRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            config,
            service: ServiceInfo::default(),
            functions: RwLock::new(HashMap::new()),
            interactions: Mutex::new(InteractionState::default()),
            feedback: Mutex::new(FeedbackState::default()),
            alerts: Mutex::new(AlertState::default()),
            sequence: AtomicU64::new(0),
            collector: None,
        }
    }

    /// Builder pattern: identity stamped on every snapshot
    pub fn with_service(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.service = ServiceInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    /// Builder pattern: mirror every event into a metrics collector
    pub fn with_collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Process-unique id of this registry
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn entry(&self, name: &str) -> Arc<Mutex<FunctionEntry>> {
        if let Some(entry) = read(&self.functions).get(name) {
            return Arc::clone(entry);
        }

        let mut functions = write(&self.functions);
        let entry = functions.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!("Registering metrics entry for '{}'", name);
            Arc::new(Mutex::new(FunctionEntry {
                stats: FunctionStats::new(name),
                recent_durations: VecDeque::with_capacity(self.config.duration_window.min(1024)),
            }))
        });
        Arc::clone(entry)
    }

    /// Record one completed call
    ///
    /// Tokens and cost are only accumulated for successful calls.
    pub fn record_call(
        &self,
        name: &str,
        duration: Duration,
        succeeded: bool,
        tokens: Option<&TokenUsage>,
        cost: Option<f64>,
    ) {
        let (tokens, cost) = if succeeded {
            (tokens, cost.filter(|c| c.is_finite() && *c >= 0.0))
        } else {
            (None, None)
        };

        {
            let entry = self.entry(name);
            let mut entry = lock(&entry);
            let first_call = entry.stats.call_count == 0;
            let stats = &mut entry.stats;

            stats.call_count += 1;
            if !succeeded {
                stats.error_count += 1;
            }
            stats.total_duration += duration;
            stats.last_duration = duration;
            if first_call || duration < stats.min_duration {
                stats.min_duration = duration;
            }
            if duration > stats.max_duration {
                stats.max_duration = duration;
            }
            if let Some(usage) = tokens {
                stats.total_prompt_tokens += usage.prompt_tokens;
                stats.total_completion_tokens += usage.completion_tokens;
                stats.total_tokens += usage.total_tokens;
            }
            if let Some(cost) = cost {
                stats.total_cost += cost;
            }

            if entry.recent_durations.len() >= self.config.duration_window {
                entry.recent_durations.pop_front();
            }
            entry.recent_durations.push_back(duration);
        }

        if let Some(collector) = &self.collector {
            collector.record_call(name, duration, succeeded, tokens, cost);
        }
    }

    /// Append an end-to-end interaction sample, dropping the oldest when full
    pub fn record_interaction(&self, duration: Duration, feedback: Option<u8>) -> Result<()> {
        if let Some(score) = feedback {
            validate_feedback(score)?;
        }

        {
            let mut state = lock(&self.interactions);
            if state.samples.len() >= self.config.interaction_capacity {
                state.samples.pop_front();
            }
            state.samples.push_back(InteractionSample {
                duration,
                quality_feedback_score: feedback,
                timestamp: Utc::now(),
            });
            state.total_count += 1;
            state.total_duration += duration;
        }

        if let Some(collector) = &self.collector {
            collector.record_interaction(duration);
        }
        if let Some(score) = feedback {
            self.push_feedback(score);
        }
        Ok(())
    }

    /// Record a 1-5 quality score
    ///
    /// The score is also attached to the latest interaction if that one has
    /// not been rated yet.
    pub fn record_feedback(&self, score: u8) -> Result<()> {
        validate_feedback(score)?;

        {
            let mut state = lock(&self.interactions);
            if let Some(latest) = state.samples.back_mut() {
                if latest.quality_feedback_score.is_none() {
                    latest.quality_feedback_score = Some(score);
                }
            }
        }

        self.push_feedback(score);
        Ok(())
    }

    fn push_feedback(&self, score: u8) {
        {
            let mut state = lock(&self.feedback);
            if state.recent.len() >= self.config.feedback_capacity {
                state.recent.pop_front();
            }
            state.recent.push_back(score);
            state.total_count += 1;
            state.sum += u64::from(score);
        }

        if let Some(collector) = &self.collector {
            collector.record_feedback(score);
        }
    }

    /// Append a responsible-AI alert, dropping the oldest when full
    pub fn record_alert(&self, alert: RaiAlert) {
        if let Some(collector) = &self.collector {
            collector.record_alert(&alert.alert_type);
        }

        let mut state = lock(&self.alerts);
        if state.recent.len() >= self.config.alert_capacity {
            state.recent.pop_front();
        }
        state.recent.push_back(alert);
        state.total_count += 1;
    }

    /// Copy of one function's statistics
    pub fn function(&self, name: &str) -> Option<FunctionStats> {
        let entry = read(&self.functions).get(name).map(Arc::clone)?;
        let stats = lock(&entry).stats.clone();
        Some(stats)
    }

    /// Names of every function seen so far
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.functions).keys().cloned().collect();
        names.sort();
        names
    }

    /// Deep copy of the current state
    pub fn snapshot(&self) -> Snapshot {
        let entries: Vec<Arc<Mutex<FunctionEntry>>> =
            read(&self.functions).values().map(Arc::clone).collect();

        let mut functions = BTreeMap::new();
        let mut totals = Totals::default();
        for entry in entries {
            let (stats, recent) = {
                let entry = lock(&entry);
                (
                    entry.stats.clone(),
                    entry.recent_durations.iter().copied().collect::<Vec<_>>(),
                )
            };

            totals.calls += stats.call_count;
            totals.errors += stats.error_count;
            totals.prompt_tokens += stats.total_prompt_tokens;
            totals.completion_tokens += stats.total_completion_tokens;
            totals.total_tokens += stats.total_tokens;
            totals.cost += stats.total_cost;

            functions.insert(
                stats.name.clone(),
                FunctionSnapshot {
                    p50_duration: percentile(&recent, 50.0),
                    p95_duration: percentile(&recent, 95.0),
                    stats,
                },
            );
        }

        let interactions = {
            let state = lock(&self.interactions);
            totals.interactions = state.total_count;
            totals.average_interaction = (state.total_count > 0)
                .then(|| {
                    let nanos = state.total_duration.as_nanos() / u128::from(state.total_count);
                    Duration::from_nanos(nanos as u64)
                });
            state.samples.iter().cloned().collect()
        };

        let quality = {
            let state = lock(&self.feedback);
            QualitySummary {
                average_feedback: (state.total_count > 0)
                    .then(|| state.sum as f64 / state.total_count as f64),
                feedback_count: state.total_count,
                recent_scores: state.recent.iter().copied().collect(),
            }
        };

        let (rai_alerts, rai_alert_count) = {
            let state = lock(&self.alerts);
            (state.recent.iter().cloned().collect(), state.total_count)
        };

        Snapshot {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            captured_at: Utc::now(),
            service: self.service.clone(),
            functions,
            interactions,
            totals,
            quality,
            rai_alerts,
            rai_alert_count,
        }
    }
}

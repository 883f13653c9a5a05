//! Snapshot publishing: pull on demand, push on an interval.
//!
//! [`SnapshotPublisher::snapshot`] can be called at any time. Once
//! [`started`](SnapshotPublisher::start), a background task captures a
//! snapshot every `push_interval` and hands it to every subscribed
//! [`SnapshotSink`]. Deliveries never overlap: a tick that fires while the
//! previous delivery is still running is skipped and counted.
//!
//! Sink failures are logged, once per sink at `warn` level and afterwards at
//! `debug`, and never reach the caller.

use crate::metrics::{MetricsRegistry, Snapshot};
use crate::{KansatsuError, Result};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod sinks;

pub use sinks::{ChannelSink, HttpDashboardSink, SinkError, SnapshotSink};

#[derive(Debug)]
struct Subscriber {
    sink: Arc<dyn SnapshotSink>,
    warned: AtomicBool,
}

impl Subscriber {
    fn report(&self, result: std::result::Result<(), SinkError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                if !self.warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        "Snapshot sink '{}' failed: {}. Further failures are logged at debug level",
                        self.sink.name(),
                        e
                    );
                } else {
                    debug!("Snapshot sink '{}' failed: {}", self.sink.name(), e);
                }
                false
            }
        }
    }
}

#[derive(Debug, Default)]
struct PublishState {
    in_flight: AtomicBool,
    skipped_ticks: AtomicU64,
    deliveries: AtomicU64,
    failures: AtomicU64,
}

/// Delivers registry snapshots to subscribed sinks
#[derive(Debug)]
pub struct SnapshotPublisher {
    registry: Arc<MetricsRegistry>,
    push_interval: Duration,
    subscribers: Arc<RwLock<Vec<Arc<Subscriber>>>>,
    state: Arc<PublishState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotPublisher {
    pub fn new(registry: Arc<MetricsRegistry>, push_interval: Duration) -> Self {
        Self {
            registry,
            push_interval,
            subscribers: Arc::new(RwLock::new(Vec::new())),
            state: Arc::new(PublishState::default()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn push_interval(&self) -> Duration {
        self.push_interval
    }

    /// Capture a snapshot now
    pub fn snapshot(&self) -> Snapshot {
        self.registry.snapshot()
    }

    /// Register a sink for periodic and final deliveries
    pub fn subscribe(&self, sink: Arc<dyn SnapshotSink>) {
        info!("Subscribed snapshot sink '{}'", sink.name());
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push(Arc::new(Subscriber {
                sink,
                warned: AtomicBool::new(false),
            }));
        }
    }

    pub fn sink_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Ticks skipped because a delivery was still running
    pub fn skipped_ticks(&self) -> u64 {
        self.state.skipped_ticks.load(Ordering::Relaxed)
    }

    /// Successful sink deliveries
    pub fn deliveries(&self) -> u64 {
        self.state.deliveries.load(Ordering::Relaxed)
    }

    /// Failed sink deliveries
    pub fn failures(&self) -> u64 {
        self.state.failures.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Spawn the push task on the current tokio runtime
    ///
    /// Starting an already running publisher does nothing. A stopped
    /// publisher cannot be restarted.
    pub fn start(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(KansatsuError::invalid_input("Snapshot publisher was already stopped"));
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            KansatsuError::internal_error("Snapshot publisher requires a tokio runtime")
        })?;

        let mut task = self
            .task
            .lock()
            .map_err(|_| KansatsuError::internal_error("publisher task lock poisoned"))?;
        if task.is_some() {
            return Ok(());
        }

        let ticker = Ticker {
            registry: Arc::clone(&self.registry),
            subscribers: Arc::clone(&self.subscribers),
            state: Arc::clone(&self.state),
            cancel: self.cancel.clone(),
            push_interval: self.push_interval,
        };
        *task = Some(handle.spawn(ticker.run()));
        info!(
            "Snapshot publisher started with a {:?} push interval",
            self.push_interval
        );
        Ok(())
    }

    /// Stop the push task and wait for it, including any delivery in flight
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Snapshot publisher task ended abnormally: {}", e);
            }
            info!("Snapshot publisher stopped");
        }
    }

    /// Deliver one snapshot to every sink now, returning the successful count
    pub async fn publish(&self) -> usize {
        deliver_all(&self.subscribers, &self.state, &self.registry.snapshot(), false).await
    }

    /// Deliver the session's final snapshot
    pub async fn publish_final(&self, snapshot: &Snapshot) -> usize {
        deliver_all(&self.subscribers, &self.state, snapshot, true).await
    }
}

impl Drop for SnapshotPublisher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn deliver_all(
    subscribers: &RwLock<Vec<Arc<Subscriber>>>,
    state: &PublishState,
    snapshot: &Snapshot,
    session_end: bool,
) -> usize {
    let subscribers: Vec<Arc<Subscriber>> = match subscribers.read() {
        Ok(subscribers) => subscribers.clone(),
        Err(_) => return 0,
    };

    let results = join_all(subscribers.iter().map(|subscriber| async move {
        if session_end {
            subscriber.sink.session_end(snapshot).await
        } else {
            subscriber.sink.deliver(snapshot).await
        }
    }))
    .await;

    let mut delivered = 0;
    for (subscriber, result) in subscribers.iter().zip(results) {
        if subscriber.report(result) {
            delivered += 1;
            state.deliveries.fetch_add(1, Ordering::Relaxed);
        } else {
            state.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
    delivered
}

struct Ticker {
    registry: Arc<MetricsRegistry>,
    subscribers: Arc<RwLock<Vec<Arc<Subscriber>>>>,
    state: Arc<PublishState>,
    cancel: CancellationToken,
    push_interval: Duration,
}

impl Ticker {
    async fn run(self) {
        let start = tokio::time::Instant::now() + self.push_interval;
        let mut interval = tokio::time::interval_at(start, self.push_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut delivery: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => self.tick(&mut delivery),
            }
        }

        if let Some(delivery) = delivery {
            let _ = delivery.await;
        }
    }

    fn tick(&self, delivery: &mut Option<JoinHandle<()>>) {
        if self
            .state
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            let skipped = self.state.skipped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Previous snapshot delivery still running; skipped tick ({} total)", skipped);
            return;
        }

        let snapshot = self.registry.snapshot();
        let subscribers = Arc::clone(&self.subscribers);
        let state = Arc::clone(&self.state);
        *delivery = Some(tokio::spawn(async move {
            deliver_all(&subscribers, &state, &snapshot, false).await;
            state.in_flight.store(false, Ordering::Release);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct CountingSink {
        delay: Duration,
        fail: bool,
        delivered: AtomicUsize,
        session_ends: AtomicUsize,
        sequences: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl SnapshotSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn deliver(&self, snapshot: &Snapshot) -> std::result::Result<(), SinkError> {
            tokio::time::sleep(self.delay).await;
            self.delivered.fetch_add(1, Ordering::SeqCst);
            self.sequences.lock().unwrap().push(snapshot.sequence);
            if self.fail {
                Err(SinkError::Request("connection refused".to_string()))
            } else {
                Ok(())
            }
        }

        async fn session_end(&self, _snapshot: &Snapshot) -> std::result::Result<(), SinkError> {
            self.session_ends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn publisher(interval: Duration) -> SnapshotPublisher {
        SnapshotPublisher::new(Arc::new(MetricsRegistry::default()), interval)
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushes_every_interval() {
        let publisher = publisher(Duration::from_secs(1));
        let sink = Arc::new(CountingSink::default());
        publisher.subscribe(sink.clone());
        publisher.start().unwrap();
        assert!(publisher.is_running());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        publisher.stop().await;

        assert_eq!(sink.delivered.load(Ordering::SeqCst), 3);
        assert_eq!(publisher.deliveries(), 3);
        assert_eq!(publisher.skipped_ticks(), 0);
        assert!(!publisher.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sink_ticks_are_skipped_not_queued() {
        let publisher = publisher(Duration::from_secs(1));
        let sink = Arc::new(CountingSink {
            delay: Duration::from_millis(2500),
            ..Default::default()
        });
        publisher.subscribe(sink.clone());
        publisher.start().unwrap();

        // Deliveries start at 1s and 4s; ticks at 2s and 3s are skipped
        tokio::time::sleep(Duration::from_millis(4200)).await;
        publisher.stop().await;

        assert_eq!(publisher.skipped_ticks(), 2);
        // Stop waits for the delivery started at 4s
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_sink_never_propagates() {
        let publisher = publisher(Duration::from_millis(100));
        let failing = Arc::new(CountingSink {
            fail: true,
            ..Default::default()
        });
        let healthy = Arc::new(CountingSink::default());
        publisher.subscribe(failing.clone());
        publisher.subscribe(healthy.clone());
        publisher.start().unwrap();

        tokio::time::sleep(Duration::from_millis(550)).await;
        publisher.stop().await;

        assert_eq!(failing.delivered.load(Ordering::SeqCst), 5);
        assert_eq!(healthy.delivered.load(Ordering::SeqCst), 5);
        assert_eq!(publisher.failures(), 5);
        assert_eq!(publisher.deliveries(), 5);
    }

    #[tokio::test]
    async fn test_publish_final_uses_session_end() {
        let publisher = publisher(Duration::from_secs(1));
        let sink = Arc::new(CountingSink::default());
        publisher.subscribe(sink.clone());

        let snapshot = publisher.snapshot();
        assert_eq!(publisher.publish_final(&snapshot).await, 1);
        assert_eq!(sink.session_ends.load(Ordering::SeqCst), 1);
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 0);

        assert_eq!(publisher.publish().await, 1);
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_final() {
        let publisher = publisher(Duration::from_secs(60));
        publisher.start().unwrap();
        publisher.start().unwrap();
        publisher.stop().await;
        publisher.stop().await;
        assert!(publisher.start().is_err());
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let publisher = publisher(Duration::from_secs(1));
        let err = publisher.start().unwrap_err();
        assert!(matches!(err, KansatsuError::Internal { .. }));
    }
}

//! Agent lifecycle driven by file configuration

use kansatsu::publisher::ChannelSink;
use kansatsu::telemetry::{attrs, genai::SESSION_SPAN_NAME, InMemoryExporter};
use kansatsu::{InstrumentConfig, Kansatsu, KansatsuConfig};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::Builder;
use tokio_test::{assert_err, assert_ok};

fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn chat_response(model: &str) -> Value {
    json!({
        "model": model,
        "choices": [{"message": {"content": "Hold the stretch for thirty seconds."}}],
        "usage": {"prompt_tokens": 2000, "completion_tokens": 1000, "total_tokens": 3000}
    })
}

#[tokio::test]
async fn test_toml_config_drives_pricing_and_session_export() {
    let file = write_config(
        ".toml",
        r#"
[service]
name = "physio-assistant"
version = "2.1.0"

[publisher]
push_interval_ms = 60000

[prices."gpt-4o-mini"]
prompt_per_1k = 0.15
completion_per_1k = 0.6
"#,
    );
    let config = KansatsuConfig::from_file(file.path()).unwrap();
    let exporter = InMemoryExporter::new();
    let (sink, mut rx) = ChannelSink::new(4);
    let agent = Kansatsu::builder()
        .config(config)
        .exporter(Arc::new(exporter.clone()))
        .sink(Arc::new(sink))
        .build()
        .unwrap();
    assert_eq!(agent.service_name(), "physio-assistant");

    let chat = agent
        .wrap(
            |model: &'static str| Ok::<_, String>(chat_response(model)),
            "chat",
            InstrumentConfig::new().tracking_tokens(),
        )
        .unwrap();
    chat.call("gpt-4o-mini").unwrap();
    chat.call("unpriced-model").unwrap();
    assert_ok!(agent.record_interaction_time(1250.0));
    assert_ok!(agent.record_quality_feedback(4));
    assert_err!(agent.record_quality_feedback(6));

    let stats = agent.registry().function("chat").unwrap();
    assert_eq!(stats.total_tokens, 6000);
    // 2 * 0.15 + 1 * 0.6 for the priced model only
    assert!((stats.total_cost - 0.9).abs() < 1e-9);

    let final_snapshot = agent.shutdown().await.unwrap();
    assert_eq!(final_snapshot.service.name, "physio-assistant");
    assert_eq!(final_snapshot.quality.average_feedback, Some(4.0));
    assert_eq!(final_snapshot.interactions.len(), 1);
    assert_eq!(
        final_snapshot.interactions[0].quality_feedback_score,
        Some(4)
    );

    let delivered = rx.try_recv().unwrap();
    assert_eq!(delivered.sequence, final_snapshot.sequence);

    let sessions = exporter.spans_named(SESSION_SPAN_NAME);
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(
        session.attribute(attrs::SESSION_TOTAL_CALLS).and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        session.attribute(attrs::SESSION_ID).and_then(|v| v.as_str()),
        Some(agent.session_id())
    );
    assert_eq!(exporter.spans_named("chat").len(), 2);
    assert!(exporter.is_shut_down());
}

#[tokio::test]
async fn test_yaml_config_can_skip_shutdown_export() {
    let file = write_config(
        ".yaml",
        r#"
service:
  name: batch-evaluator
publisher:
  export_on_shutdown: false
  dashboard_url: "http://127.0.0.1:9/update"
  request_timeout_ms: 50
"#,
    );
    let config = KansatsuConfig::from_file(file.path()).unwrap();
    assert_eq!(config.publisher.request_timeout, Duration::from_millis(50));

    let exporter = InMemoryExporter::new();
    let agent = Kansatsu::builder()
        .config(config)
        .exporter(Arc::new(exporter.clone()))
        .build()
        .unwrap();
    // The dashboard URL adds an HTTP sink without starting the timer
    assert_eq!(agent.publisher().sink_count(), 1);
    assert!(!agent.publisher().is_running());

    let step = agent
        .wrap(|x: u32| x + 1, "step", InstrumentConfig::new())
        .unwrap();
    assert_eq!(step.call(1), 2);

    let snapshot = agent.shutdown().await.unwrap();
    assert_eq!(snapshot.totals.calls, 1);
    assert_eq!(agent.publisher().deliveries(), 0);
    assert_eq!(agent.publisher().failures(), 0);
    assert!(exporter.spans_named(SESSION_SPAN_NAME).is_empty());
    assert_eq!(exporter.spans_named("step").len(), 1);

    assert_err!(agent.start_publisher());
}

#[test]
fn test_invalid_file_config_is_rejected_at_build() {
    let file = write_config(
        ".json",
        r#"{"service": {"name": "bad-prices"}, "prices": {"gpt-4o": {"prompt_per_1k": -1.0, "completion_per_1k": 0.5}}}"#,
    );
    let config = KansatsuConfig::from_file(file.path()).unwrap();
    let err = Kansatsu::new(config).unwrap_err();
    assert!(err.is_user_error());

    let unsupported = write_config(".ini", "name = x");
    assert_err!(KansatsuConfig::from_file(unsupported.path()));
}

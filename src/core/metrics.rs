use std::sync::OnceLock;

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

fn describe() {
    describe_counter!("http_requests_total", "HTTP responses by status code");
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request latency by status code"
    );
    describe_counter!("test_attempts_started_total", "Attempts created by accessing a test");
    describe_counter!("test_attempts_finished_total", "Attempts finished by the student");
    describe_counter!("test_attempts_expired_total", "Attempts closed after the time limit");
    describe_counter!("answers_submitted_total", "Answers saved during an attempt");
    describe_counter!("answers_graded_total", "Open answers scored by a teacher");
    describe_counter!("score_cache_hits_total", "Score lookups served from cache");
    describe_counter!("score_cache_misses_total", "Score lookups recomputed from storage");
    describe_counter!("stats_cache_hits_total", "Statistics lookups served from cache");
    describe_counter!("stats_cache_misses_total", "Statistics lookups recomputed from storage");
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

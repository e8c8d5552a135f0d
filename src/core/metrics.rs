use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;
use crate::db::types::AttemptStatus;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

pub(crate) fn attempt_started(claimed: bool) {
    if claimed {
        metrics::counter!("attempts_claimed_total").increment(1);
    } else {
        metrics::counter!("attempts_started_total").increment(1);
    }
}

pub(crate) fn attempt_finalized(status: AttemptStatus) {
    metrics::counter!("attempts_finalized_total", "status" => status.as_str()).increment(1);
}

pub(crate) fn answer_submitted() {
    metrics::counter!("answers_submitted_total").increment(1);
}

pub(crate) fn realtime_published(scope: &'static str) {
    metrics::counter!("realtime_events_published_total", "scope" => scope).increment(1);
}

pub(crate) fn realtime_failed() {
    metrics::counter!("realtime_events_failed_total").increment(1);
}

use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::services::attempt_lifecycle::AttemptService;

/// Overdue attempts handled per page.
const SWEEP_PAGE_SIZE: i64 = 200;

/// Times out every attempt whose window has closed. Returns how many were closed.
pub(crate) async fn sweep_expired(service: &AttemptService) -> usize {
    sweep_in_pages(service, SWEEP_PAGE_SIZE).await
}

async fn sweep_in_pages(service: &AttemptService, page_size: i64) -> usize {
    let (mut closed, mut failed) = (0, 0);
    let mut after = None;

    loop {
        match service.expire_overdue(after, page_size).await {
            Ok(page) => {
                closed += page.closed;
                failed += page.failed;
                match page.next_after {
                    Some(cursor) => after = Some(cursor),
                    None => break,
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "Expiry sweep failed");
                break;
            }
        }
    }

    if closed > 0 || failed > 0 {
        tracing::info!(closed, failed, "Expiry sweep finished");
    }
    closed
}

pub(crate) async fn run_expiry_sweep(
    service: AttemptService,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(period_seconds = period.as_secs(), "Expiry sweep started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                sweep_expired(&service).await;
            }
        }
    }
    tracing::info!("Expiry sweep stopped");
}

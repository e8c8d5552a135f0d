use tokio::signal;
use tokio::sync::watch;

pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

/// Waits for the OS signal, then flips the watch channel so background loops exit.
pub(crate) async fn shutdown_and_notify(notify: watch::Sender<bool>) {
    shutdown_signal().await;
    if notify.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }
}

/// Resolves once the watch channel reports shutdown or its sender is gone.
pub(crate) async fn wait_for(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_for_returns_after_notification() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_for(rx));

        tx.send(true).expect("send");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter finished")
            .expect("join");
    }

    #[tokio::test]
    async fn wait_for_returns_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), wait_for(rx)).await.expect("finished");
    }
}

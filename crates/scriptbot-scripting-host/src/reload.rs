use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info};

/// A rehash of every script was requested from outside the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSignal {
    pub received_at: DateTime<Utc>,
}

impl ReloadSignal {
    pub fn now() -> Self {
        Self {
            received_at: Utc::now(),
        }
    }
}

/// Listen for SIGUSR2 and publish a [`ReloadSignal`] on the returned
/// channel each time it arrives. The value goes back to `None` shortly
/// after, so a receiver that polls with `borrow` sees one request per
/// signal.
///
/// Must be called from within a tokio runtime.
#[cfg(unix)]
pub fn setup_reload_signal() -> watch::Receiver<Option<ReloadSignal>> {
    use tokio::signal::unix::{signal, SignalKind};

    let (tx, rx) = watch::channel(None);

    let mut sigusr2 = match signal(SignalKind::user_defined2()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(target: "scripting", "Failed to register SIGUSR2 handler: {}", e);
            return rx;
        }
    };

    tokio::spawn(async move {
        while sigusr2.recv().await.is_some() {
            info!(target: "scripting", "Received SIGUSR2 - rehashing scripts");
            if tx.send(Some(ReloadSignal::now())).is_err() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            tx.send_replace(None);
        }
        debug!(target: "scripting", "SIGUSR2 listener finished");
    });

    rx
}

#[cfg(not(unix))]
pub fn setup_reload_signal() -> watch::Receiver<Option<ReloadSignal>> {
    let (tx, rx) = watch::channel(None);
    tracing::warn!(target: "scripting", "SIGUSR2 reload not supported on this platform");
    // a dropped sender would close the channel
    std::mem::forget(tx);
    rx
}

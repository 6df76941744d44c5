//! Supervised background loops (heartbeat sweep, alert sweep).
//!
//! Each loop runs independently of request handling; its failures are the
//! tick callback's to log, never propagated. `stop()` is the explicit
//! lifecycle exit; dropping a supervisor also tears the task down.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::info;

pub struct TaskSupervisor {
    name: &'static str,
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<()>,
}

impl TaskSupervisor {
    /// Spawn a loop that awaits `tick()` every `interval`.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());

        let handle = tokio::spawn(async move {
            info!(task = name, interval_secs = interval.as_secs(), "background task started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!(task = name, "background task shutting down");
                        break;
                    }
                    _ = sleep(interval) => {
                        tick().await;
                    }
                }
            }
        });

        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(());
        if (&mut self.handle).await.is_err() {
            tracing::warn!(task = self.name, "background task aborted before join");
        }
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        self.handle.abort();
    }
}

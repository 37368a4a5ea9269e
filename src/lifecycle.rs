use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A spawned background task plus the signal that asks it to stop.
pub struct ServiceHandle {
    name: String,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ServiceHandle {
    /// Spawn `task`, handing it a receiver that flips to `true` on `stop()`.
    pub fn spawn<F, Fut>(name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(task(shutdown_rx));
        Self {
            name: name.into(),
            shutdown_tx,
            handle,
        }
    }

    /// Signal the task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        match self.handle.await {
            Ok(()) => info!(service = %self.name, "Stopped"),
            Err(e) => error!(service = %self.name, error = %e, "Task ended abnormally"),
        }
    }
}

/// Resolves once the shutdown flag is raised or its sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

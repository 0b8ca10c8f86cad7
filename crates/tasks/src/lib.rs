//! Long-running task management: named critical tasks, cooperative shutdown
//! and first-failure propagation so an orchestrator can restart the node.

use std::future::Future;

use tokio::{
    runtime::Handle,
    sync::{mpsc, watch},
};
use tracing::*;

/// Read side of the shutdown signal, cloned into every spawned task.
#[derive(Clone)]
pub struct ShutdownGuard {
    rx: watch::Receiver<bool>,
}

impl ShutdownGuard {
    pub fn should_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been signalled.
    pub async fn wait_for_shutdown(&mut self) {
        // Already signalled or sender dropped, either way we are done.
        let _ = self.rx.wait_for(|v| *v).await;
    }
}

/// Spawns named critical tasks. A critical task that returns an error (or
/// panics) takes the whole node down; the manager reports the first failure.
#[derive(Clone)]
pub struct TaskExecutor {
    handle: Handle,
    shutdown_rx: watch::Receiver<bool>,
    failure_tx: mpsc::UnboundedSender<TaskFailure>,
}

#[derive(Debug)]
pub struct TaskFailure {
    pub name: String,
    pub error: String,
}

impl TaskExecutor {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn shutdown_guard(&self) -> ShutdownGuard {
        ShutdownGuard {
            rx: self.shutdown_rx.clone(),
        }
    }

    /// Spawn a task whose failure is fatal for the process.
    pub fn spawn_critical_async<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let failure_tx = self.failure_tx.clone();
        self.handle.spawn(async move {
            match fut.await {
                Ok(()) => {
                    warn!(%name, "critical task finished");
                }
                Err(e) => {
                    error!(%name, err = %e, "critical task failed");
                    let _ = failure_tx.send(TaskFailure {
                        name: name.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        });
    }
}

pub struct TaskManager {
    executor: TaskExecutor,
    shutdown_tx: watch::Sender<bool>,
    failure_rx: mpsc::UnboundedReceiver<TaskFailure>,
}

impl TaskManager {
    pub fn new(handle: Handle) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        Self {
            executor: TaskExecutor {
                handle,
                shutdown_rx,
                failure_tx,
            },
            shutdown_tx,
            failure_rx,
        }
    }

    pub fn executor(&self) -> TaskExecutor {
        self.executor.clone()
    }

    /// Blocks until ctrl-c or the first critical task failure, then signals
    /// shutdown to every guard. Returns the failure if there was one.
    pub async fn monitor(mut self) -> Option<TaskFailure> {
        let failure = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, shutting down");
                None
            }
            f = self.failure_rx.recv() => f,
        };
        let _ = self.shutdown_tx.send(true);
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failure_is_reported_and_triggers_shutdown() {
        let manager = TaskManager::new(Handle::current());
        let executor = manager.executor();
        let guard = executor.shutdown_guard();

        executor.spawn_critical_async("boom", async { anyhow::bail!("broken") });

        let failure = manager.monitor().await.expect("expected a failure");
        assert_eq!(failure.name, "boom");
        assert!(guard.should_shutdown());
    }
}

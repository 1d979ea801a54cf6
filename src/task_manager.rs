//! Tracks long-lived background tasks and awaits them on shutdown.
use futures::future::join_all;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Owns the join handles of named background tasks.
///
/// Tasks are expected to watch the shutdown receiver handed out by
/// [`shutdown_rx`](Self::shutdown_rx) and return once it fires;
/// [`shutdown`](Self::shutdown) then waits for all of them.
#[derive(Clone, Debug)]
pub struct TaskManager {
    handles: Arc<Mutex<Vec<(&'static str, JoinHandle<()>)>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskManager {
    pub fn new(shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            handles: Arc::new(Mutex::new(Vec::new())),
            shutdown_rx,
        }
    }

    /// Spawns `future` under `name`.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "Spawning task");
        let handle = tokio::spawn(future);
        self.lock().push((name, handle));
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for every tracked task, reporting the ones that panicked.
    pub async fn shutdown(self) {
        let handles: Vec<_> = self.lock().drain(..).collect();
        info!(tasks = handles.len(), "Waiting for background tasks");

        let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(handles).await;

        let mut panicked = 0;
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(()) => debug!(task = name, "Task finished"),
                Err(e) => {
                    error!(task = name, error = %e, "Task failed during shutdown");
                    panicked += 1;
                }
            }
        }
        if panicked == 0 {
            info!("All background tasks finished");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(&'static str, JoinHandle<()>)>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// Group of background loops sharing one shutdown signal.
/// - `request_shutdown` flips the watch channel; loops exit at their next check
/// - `shutdown_and_join` also waits for them
///
/// In-flight deliveries are not cancelled; a loop finishes its current job
/// before it looks at the signal again.
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerGroup {
    /// Group with no loops (queues driven by hand, e.g. in tests).
    pub fn idle() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            joins: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `n` loops. `make` gets the worker index and a shutdown receiver.
    pub fn spawn<F, Fut>(n: usize, make: F) -> Self
    where
        F: Fn(usize, watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            joins.push(tokio::spawn(make(worker_id, shutdown_rx.clone())));
        }

        Self {
            shutdown_tx,
            joins: Mutex::new(joins),
        }
    }

    pub fn request_shutdown(&self) {
        // send_replace also updates the value when every receiver is gone
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Shutdown and wait for all loops. Later calls return immediately.
    pub async fn shutdown_and_join(&self) {
        self.request_shutdown();
        let joins = std::mem::take(&mut *self.joins.lock().await);
        for join in joins {
            if let Err(err) = join.await {
                tracing::error!(error = %err, "queue worker task ended abnormally");
            }
        }
    }
}

/// Sleep for `period` unless shutdown is signalled first.
/// Returns `true` when the caller should stop.
pub async fn sleep_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, period: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return true;
    }
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
        _ = tokio::time::sleep(period) => false,
    }
}

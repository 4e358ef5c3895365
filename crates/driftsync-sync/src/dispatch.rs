//! Per-identity sequential dispatch.
//!
//! Events for one resource id run strictly in arrival order; events for
//! different ids run in parallel. Each active id has a queue drained by its
//! own task, which exits once the queue has been idle for a while.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type Queues = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>>;

pub struct KeyedDispatcher {
    queues: Queues,
    cancel: CancellationToken,
    idle_timeout: Duration,
}

impl KeyedDispatcher {
    /// Create a dispatcher whose workers stop when `cancel` fires.
    pub fn new(cancel: CancellationToken, idle_timeout: Duration) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            cancel,
            idle_timeout,
        }
    }

    /// Queue a job behind earlier jobs for the same key.
    pub fn dispatch<F>(&self, key: &str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut job: Job = Box::pin(job);
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(tx) = queues.get(key) {
            match tx.send(job) {
                Ok(()) => return,
                // Worker already gone; start a fresh one below.
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(job);
        queues.insert(key.to_string(), tx);
        drop(queues);

        tokio::spawn(worker(
            key.to_string(),
            rx,
            self.queues.clone(),
            self.cancel.clone(),
            self.idle_timeout,
        ));
    }

    /// Number of keys with a live worker.
    pub fn active(&self) -> usize {
        self.queues.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stop all workers. Queued jobs that have not started are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.queues.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

async fn worker(
    key: String,
    mut rx: mpsc::UnboundedReceiver<Job>,
    queues: Queues,
    cancel: CancellationToken,
    idle_timeout: Duration,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = tokio::time::timeout(idle_timeout, rx.recv()) => next,
        };

        let job = match next {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => {
                // Idle. Senders only enqueue under the map lock, so an empty
                // queue observed under it stays empty once the entry is gone.
                let mut map = queues.lock().unwrap_or_else(|e| e.into_inner());
                match rx.try_recv() {
                    Ok(job) => {
                        drop(map);
                        job
                    }
                    Err(_) => {
                        map.remove(&key);
                        tracing::trace!(resource_id = %key, "dispatch worker idle, exiting");
                        break;
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            break;
        }
        job.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn test_same_key_runs_in_order() {
        let dispatcher = KeyedDispatcher::new(CancellationToken::new(), Duration::from_secs(5));
        let (tx, mut rx) = unbounded_channel();

        for i in 0..20u64 {
            let tx = tx.clone();
            dispatcher.dispatch("a", async move {
                // Later jobs sleep less; order must still hold.
                tokio::time::sleep(Duration::from_millis(20 - i)).await;
                let _ = tx.send(i);
            });
        }

        let mut seen = Vec::new();
        for _ in 0..20 {
            seen.push(rx.recv().await.unwrap());
        }
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_different_keys_run_in_parallel() {
        let dispatcher = KeyedDispatcher::new(CancellationToken::new(), Duration::from_secs(5));
        let (tx, mut rx) = unbounded_channel();
        let gate = Arc::new(tokio::sync::Notify::new());

        // "a" blocks until "b" has run.
        let (gate_a, tx_a) = (gate.clone(), tx.clone());
        dispatcher.dispatch("a", async move {
            gate_a.notified().await;
            let _ = tx_a.send("a");
        });
        let (gate_b, tx_b) = (gate.clone(), tx.clone());
        dispatcher.dispatch("b", async move {
            let _ = tx_b.send("b");
            gate_b.notify_one();
        });

        assert_eq!(rx.recv().await.unwrap(), "b");
        assert_eq!(rx.recv().await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_idle_workers_exit_and_restart() {
        let dispatcher =
            KeyedDispatcher::new(CancellationToken::new(), Duration::from_millis(20));
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        dispatcher.dispatch("a", async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(dispatcher.active(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(dispatcher.active(), 0);

        let c = count.clone();
        dispatcher.dispatch("a", async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch() {
        let cancel = CancellationToken::new();
        let dispatcher = KeyedDispatcher::new(cancel.clone(), Duration::from_secs(5));
        let count = Arc::new(AtomicUsize::new(0));

        cancel.cancel();
        let c = count.clone();
        dispatcher.dispatch("a", async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.active(), 0);
    }
}

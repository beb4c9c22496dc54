//! Worker registry and least-loaded dispatcher.
//!
//! One worker per bot identity. The primary client is always index 0;
//! additional workers are started concurrently from the configured tokens,
//! and any that fail to start are logged and left out. Load counters are
//! plain atomics: `pick()` is a snapshot, not a transaction, which is all
//! a balancing heuristic needs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{error, info};

use crate::client::{PlatformApiClient, StorageClient};
use crate::config::Config;
use crate::metrics;
use crate::session::SessionMap;

pub struct Worker {
    pub index: usize,
    pub client: Arc<dyn StorageClient>,
    /// Cached media sessions, one per datacenter.
    pub sessions: SessionMap,
    load: AtomicUsize,
}

impl Worker {
    pub fn new(index: usize, client: Arc<dyn StorageClient>) -> Self {
        Self {
            index,
            client,
            sessions: SessionMap::new(),
            load: AtomicUsize::new(0),
        }
    }

    pub fn load(&self) -> usize {
        self.load.load(Ordering::SeqCst)
    }

    /// Account one in-flight stream. The guard decrements on drop, which
    /// covers normal completion, errors, and client disconnects alike.
    pub fn begin_stream(self: Arc<Self>) -> LoadGuard {
        self.load.fetch_add(1, Ordering::SeqCst);
        metrics::record_stream_started(self.index);
        LoadGuard { worker: self }
    }
}

/// RAII handle for one in-flight stream on one worker.
pub struct LoadGuard {
    worker: Arc<Worker>,
}

impl LoadGuard {
    pub fn worker_index(&self) -> usize {
        self.worker.index
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.worker.load.fetch_sub(1, Ordering::SeqCst);
        metrics::record_stream_finished();
    }
}

/// The worker fleet, fixed after startup.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
}

impl WorkerPool {
    pub fn from_clients(clients: Vec<Arc<dyn StorageClient>>) -> Self {
        Self {
            workers: clients
                .into_iter()
                .enumerate()
                .map(|(index, client)| Arc::new(Worker::new(index, client)))
                .collect(),
        }
    }

    /// Start the fleet: the already-started primary at index 0, then one
    /// client per worker token, all brought up concurrently.
    pub async fn start(config: &Config, primary: Arc<PlatformApiClient>) -> Self {
        let mut clients: Vec<Arc<dyn StorageClient>> = vec![primary];

        if config.worker_tokens.is_empty() {
            info!("no worker bots configured, streaming through the main bot only");
            return Self::from_clients(clients);
        }

        info!(count = config.worker_tokens.len(), "starting worker bots");
        let startups = config.worker_tokens.iter().enumerate().map(|(i, token)| {
            let client = Arc::new(PlatformApiClient::new(config, token.clone()));
            async move {
                match client.start().await {
                    Ok(me) => {
                        info!(worker = i + 1, username = %me.username, "worker bot started");
                        Some(client)
                    }
                    Err(err) => {
                        error!(worker = i + 1, %err, "worker bot failed to start, excluding");
                        None
                    }
                }
            }
        });

        for client in join_all(startups).await.into_iter().flatten() {
            clients.push(client as Arc<dyn StorageClient>);
        }

        info!(total = clients.len(), "worker pool ready");
        Self::from_clients(clients)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Worker>> {
        self.workers.get(index)
    }

    /// Least-loaded worker; lowest index wins ties. `None` when the pool
    /// is empty (the edge answers 503).
    pub fn pick(&self) -> Option<&Arc<Worker>> {
        self.workers.iter().min_by_key(|w| w.load())
    }

    /// Current in-flight count per worker, for the admin stats command.
    pub fn loads(&self) -> HashMap<usize, usize> {
        self.workers.iter().map(|w| (w.index, w.load())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;

    fn pool_of(n: usize) -> WorkerPool {
        WorkerPool::from_clients(
            (0..n)
                .map(|_| Arc::new(MockClient::new(1, 0)) as Arc<dyn StorageClient>)
                .collect(),
        )
    }

    #[test]
    fn empty_pool_picks_nothing() {
        assert!(pool_of(0).pick().is_none());
    }

    #[test]
    fn pick_prefers_lowest_index_on_ties() {
        let pool = pool_of(3);
        assert_eq!(pool.pick().unwrap().index, 0);
    }

    #[test]
    fn load_returns_to_baseline_after_guard_drop() {
        let pool = pool_of(2);
        let worker = pool.get(1).unwrap();
        assert_eq!(worker.load(), 0);
        {
            let _guard = Arc::clone(worker).begin_stream();
            assert_eq!(worker.load(), 1);
            let _second = Arc::clone(worker).begin_stream();
            assert_eq!(worker.load(), 2);
        }
        assert_eq!(worker.load(), 0);
    }

    #[test]
    fn serial_dispatch_is_fair() {
        // N identical streams across 3 equal workers: no worker should
        // ever hold more than ceil(N/3) in flight.
        let pool = pool_of(3);
        let n: usize = 8;
        let cap = n.div_ceil(3);
        let mut guards = Vec::new();
        for _ in 0..n {
            let worker = pool.pick().unwrap();
            guards.push(Arc::clone(worker).begin_stream());
            assert!(pool.loads().values().all(|&l| l <= cap));
        }
        let loads = pool.loads();
        assert_eq!(loads.values().sum::<usize>(), n);
        drop(guards);
        assert!(pool.loads().values().all(|&l| l == 0));
    }
}

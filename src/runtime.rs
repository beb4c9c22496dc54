//! Process-wide streaming state.
//!
//! Everything the HTTP handlers need lives in one `StreamingRuntime` value
//! built at startup and cloned into the filters; there are no module-level
//! globals. Per-worker `ByteStreamer`s are built lazily on first use and
//! then memoized, and their background sweepers hang off the runtime's
//! shutdown token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::streamer::ByteStreamer;
use crate::workers::{Worker, WorkerPool};

pub struct StreamingRuntime {
    config: Arc<Config>,
    pool: Arc<WorkerPool>,
    streamers: Mutex<HashMap<usize, Arc<ByteStreamer>>>,
    shutdown: CancellationToken,
}

impl StreamingRuntime {
    pub fn new(config: Arc<Config>, pool: Arc<WorkerPool>) -> Self {
        Self {
            config,
            pool,
            streamers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// The primary worker, when the pool has one.
    pub fn primary(&self) -> Option<&Arc<Worker>> {
        self.pool.get(0)
    }

    /// Streamer for a worker, built on first use.
    pub fn streamer(&self, worker: &Arc<Worker>) -> Arc<ByteStreamer> {
        let mut streamers = self.streamers.lock().unwrap();
        Arc::clone(streamers.entry(worker.index).or_insert_with(|| {
            Arc::new(ByteStreamer::new(
                Arc::clone(worker),
                self.shutdown.child_token(),
            ))
        }))
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every background task owned by the runtime.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

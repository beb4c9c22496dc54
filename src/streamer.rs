//! Byte-range streamer.
//!
//! Translates an HTTP byte range into a serial run of aligned chunk RPCs
//! and emits the trimmed payloads as a lazy stream. At most one RPC is in
//! flight per stream; backpressure comes for free from the HTTP writer.
//! The worker's load guard travels inside the stream state, so the counter
//! drops on every exit: completion, upstream error, or the client hanging
//! up mid-body.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{try_unfold, BoxStream};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::RpcError;
use crate::error::GatewayError;
use crate::fileid::{location_for, FileIdentity, FileLocation};
use crate::metrics;
use crate::properties::{PropertiesCache, SWEEP_INTERVAL};
use crate::range::StreamGeometry;
use crate::session::MediaSession;
use crate::workers::{LoadGuard, Worker};

/// Per-attempt deadline for one chunk RPC.
const CHUNK_DEADLINE: Duration = Duration::from_secs(15);
/// Attempts per chunk before giving up.
const CHUNK_ATTEMPTS: u32 = 3;
/// Linear backoff step between chunk attempts.
const CHUNK_BACKOFF: Duration = Duration::from_secs(1);

/// One worker's streaming front: its properties cache plus the sweep task
/// that clears it. Constructed lazily per worker and kept for the process
/// lifetime; the sweeper dies with the shutdown token or the streamer.
pub struct ByteStreamer {
    worker: Arc<Worker>,
    properties: Arc<PropertiesCache>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl ByteStreamer {
    pub fn new(worker: Arc<Worker>, shutdown: CancellationToken) -> Self {
        let properties = Arc::new(PropertiesCache::new());
        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&properties), shutdown));
        Self {
            worker,
            properties,
            sweeper,
        }
    }

    pub fn worker(&self) -> &Arc<Worker> {
        &self.worker
    }

    pub fn properties(&self) -> &Arc<PropertiesCache> {
        &self.properties
    }

    /// Lazily stream the chunks described by `geometry`. The guard must
    /// already account this stream on the worker it was taken from.
    pub fn stream(
        &self,
        file: Arc<FileIdentity>,
        geometry: StreamGeometry,
        guard: LoadGuard,
    ) -> BoxStream<'static, Result<Bytes, GatewayError>> {
        let state = StreamState {
            worker: Arc::clone(&self.worker),
            location: location_for(&file),
            dc_id: file.dc_id,
            session: None,
            geometry,
            part: 1,
            offset: geometry.offset,
            _guard: guard,
        };

        try_unfold(state, |mut st| async move {
            if st.part > st.geometry.parts {
                return Ok(None);
            }

            let session = match &st.session {
                Some(session) => Arc::clone(session),
                None => {
                    let session = st
                        .worker
                        .sessions
                        .obtain(&st.worker.client, st.dc_id)
                        .await?;
                    st.session = Some(Arc::clone(&session));
                    session
                }
            };

            let chunk = fetch_chunk(
                &session,
                &st.location,
                st.offset,
                st.geometry.chunk_size as u32,
            )
            .await?;
            if chunk.is_empty() {
                // Short read at end of file.
                debug!(part = st.part, "empty chunk, ending stream");
                return Ok(None);
            }

            let emitted = trim_part(chunk, st.part, &st.geometry);
            metrics::record_streamed_bytes(emitted.len() as u64);
            st.part += 1;
            st.offset += st.geometry.chunk_size;
            Ok(Some((emitted, st)))
        })
        .boxed()
    }
}

impl Drop for ByteStreamer {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

struct StreamState {
    worker: Arc<Worker>,
    location: FileLocation,
    dc_id: i32,
    session: Option<Arc<MediaSession>>,
    geometry: StreamGeometry,
    /// 1-based index of the next part to fetch.
    part: u64,
    offset: u64,
    _guard: LoadGuard,
}

async fn sweep_loop(properties: Arc<PropertiesCache>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    // The first tick fires immediately; skip it so the cache survives its
    // first half hour.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => properties.purge(),
        }
    }
}

/// One chunk with the deadline/retry policy: each attempt gets 15 s, a
/// timeout earns a linear backoff and another try, anything else is final.
async fn fetch_chunk(
    session: &MediaSession,
    location: &FileLocation,
    offset: u64,
    limit: u32,
) -> Result<Bytes, GatewayError> {
    for attempt in 1..=CHUNK_ATTEMPTS {
        match tokio::time::timeout(CHUNK_DEADLINE, session.get_file(location, offset, limit)).await
        {
            Ok(Ok(chunk)) => return Ok(chunk),
            Ok(Err(RpcError::Timeout)) | Err(_) => {
                if attempt < CHUNK_ATTEMPTS {
                    debug!(offset, attempt, "chunk fetch timed out, retrying");
                    tokio::time::sleep(CHUNK_BACKOFF * attempt).await;
                }
            }
            Ok(Err(err)) => return Err(err.into()),
        }
    }
    Err(GatewayError::UpstreamTimeout)
}

/// Apply the boundary cuts for one part. Cuts are clamped to the actual
/// chunk length so a short final chunk cannot panic the slice.
fn trim_part(chunk: Bytes, part: u64, geometry: &StreamGeometry) -> Bytes {
    let len = chunk.len();
    let first = geometry.first_cut.min(len);
    let last = geometry.last_cut.min(len);

    if geometry.parts == 1 {
        chunk.slice(first..last.max(first))
    } else if part == 1 {
        chunk.slice(first..)
    } else if part == geometry.parts {
        chunk.slice(..last)
    } else {
        chunk
    }
}

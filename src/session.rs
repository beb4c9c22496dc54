//! Per-worker media sessions, one per datacenter.
//!
//! A worker's home datacenter reuses its long-lived authorization. Any
//! other datacenter takes the export/import exchange: export an
//! authorization from the home session, import it on the fresh transport,
//! tolerating invalid-auth-bytes replies (retry immediately) and transport
//! errors (sleep, retry) for up to six attempts. The session map lock is
//! only ever held for the map read or insert, never across a round trip,
//! so a concurrent first request may build a duplicate; the loser is
//! discarded on insert.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::client::{MediaTransport, RpcError, StorageClient};
use crate::error::GatewayError;
use crate::fileid::FileLocation;

const AUTH_ATTEMPTS: u32 = 6;
const AUTH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// An authorized media-only connection to one datacenter. Lives for the
/// process lifetime once established.
pub struct MediaSession {
    pub dc_id: i32,
    transport: Box<dyn MediaTransport>,
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("dc_id", &self.dc_id)
            .finish()
    }
}

impl MediaSession {
    pub async fn get_file(
        &self,
        location: &FileLocation,
        offset: u64,
        limit: u32,
    ) -> Result<Bytes, RpcError> {
        self.transport.get_file(location, offset, limit).await
    }
}

/// Datacenter → session cache for one worker.
pub struct SessionMap {
    inner: Mutex<HashMap<i32, Arc<MediaSession>>>,
}

impl Default for SessionMap {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Session for `dc_id`, building one on first use.
    pub async fn obtain(
        &self,
        client: &Arc<dyn StorageClient>,
        dc_id: i32,
    ) -> Result<Arc<MediaSession>, GatewayError> {
        if let Some(session) = self.inner.lock().await.get(&dc_id) {
            debug!(dc = dc_id, "reusing cached media session");
            return Ok(Arc::clone(session));
        }

        let session = Arc::new(connect(client, dc_id).await?);

        let mut map = self.inner.lock().await;
        Ok(Arc::clone(map.entry(dc_id).or_insert(session)))
    }

    #[cfg(test)]
    pub async fn cached_dcs(&self) -> Vec<i32> {
        self.inner.lock().await.keys().copied().collect()
    }
}

async fn connect(
    client: &Arc<dyn StorageClient>,
    dc_id: i32,
) -> Result<MediaSession, GatewayError> {
    let transport = client
        .open_transport(dc_id)
        .await
        .map_err(|e| GatewayError::SessionFailure(e.to_string()))?;

    if dc_id == client.home_dc() {
        debug!(dc = dc_id, "opened media session on home datacenter");
        return Ok(MediaSession { dc_id, transport });
    }

    for attempt in 1..=AUTH_ATTEMPTS {
        let exported = client
            .export_authorization(dc_id)
            .await
            .map_err(|e| GatewayError::SessionFailure(e.to_string()))?;

        match transport
            .import_authorization(exported.id, &exported.bytes)
            .await
        {
            Ok(()) => {
                debug!(dc = dc_id, attempt, "media session authorized");
                return Ok(MediaSession { dc_id, transport });
            }
            Err(RpcError::AuthBytesInvalid) => {
                debug!(dc = dc_id, attempt, "authorization bytes rejected, retrying");
            }
            Err(err) if err.is_transient_transport() => {
                debug!(dc = dc_id, attempt, %err, "transport error during import, retrying");
                tokio::time::sleep(AUTH_RETRY_DELAY).await;
            }
            Err(err) => {
                return Err(GatewayError::SessionFailure(err.to_string()));
            }
        }
    }

    // The fresh transport is dropped here, which tears it down.
    warn!(dc = dc_id, "media session authorization exhausted retries");
    Err(GatewayError::SessionFailure(format!(
        "authorization exchange with datacenter {dc_id} failed after {AUTH_ATTEMPTS} attempts"
    )))
}

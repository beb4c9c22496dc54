//! File-properties cache.
//!
//! Decoding a message's media into a [`FileIdentity`] costs an upstream
//! message fetch, so each worker memoizes the result per
//! `(archive_id, message_id)`. The whole map is dropped every 30 minutes,
//! which bounds how stale a cached file reference can get without any
//! per-entry bookkeeping. The lock wraps only the map operations; two
//! concurrent misses may both fetch, and the second insert simply wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::client::StorageClient;
use crate::error::GatewayError;
use crate::fileid::FileIdentity;

/// Full-purge interval.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);

#[derive(Default)]
pub struct PropertiesCache {
    entries: Mutex<HashMap<(i64, i64), Arc<FileIdentity>>>,
}

impl PropertiesCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the file identity behind an archived message, memoized.
    pub async fn get(
        &self,
        client: &Arc<dyn StorageClient>,
        archive_id: i64,
        message_id: i64,
    ) -> Result<Arc<FileIdentity>, GatewayError> {
        if let Some(hit) = self.entries.lock().unwrap().get(&(archive_id, message_id)) {
            return Ok(Arc::clone(hit));
        }

        let identity = Arc::new(fetch(client, archive_id, message_id).await?);
        self.entries
            .lock()
            .unwrap()
            .insert((archive_id, message_id), Arc::clone(&identity));
        Ok(identity)
    }

    /// Drop every entry.
    pub fn purge(&self) {
        self.entries.lock().unwrap().clear();
        debug!("cleared file properties cache");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn fetch(
    client: &Arc<dyn StorageClient>,
    archive_id: i64,
    message_id: i64,
) -> Result<FileIdentity, GatewayError> {
    let message = client
        .get_message(archive_id, message_id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("message {message_id} not found")))?;

    let media = message
        .media()
        .ok_or_else(|| GatewayError::NotFound("no supported media in message".to_string()))?;

    FileIdentity::decode(media)
        .map_err(|e| GatewayError::NotFound(format!("undecodable file handle: {e}")))
}

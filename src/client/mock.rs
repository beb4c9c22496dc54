//! In-memory client and transport for tests.
//!
//! Chunk bytes are a deterministic function of the absolute offset so a
//! test can verify that trimmed stream output covers exactly the requested
//! byte range. Call counts and fetch offsets are recorded for assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;

use super::{
    ArchivedMessage, BotClient, ExportedAuthorization, MediaFile, MediaTransport, RpcError,
    StorageClient, Update,
};
use crate::fileid::FileLocation;

/// Deterministic content byte at an absolute file offset.
pub fn byte_at(offset: u64) -> u8 {
    (offset % 251) as u8
}

/// Expected body bytes for an inclusive range.
pub fn expected_bytes(start: u64, end: u64) -> Vec<u8> {
    (start..=end).map(byte_at).collect()
}

/// Build a packed file handle the real decoder accepts.
pub fn packed_handle(dc_id: i32) -> String {
    let json = serde_json::json!({
        "kind": "video",
        "media_id": 424_242u64,
        "access_hash": -9_000_i64,
        "file_reference": BASE64.encode(b"mock-ref"),
        "dc_id": dc_id,
    });
    BASE64.encode(json.to_string().as_bytes())
}

/// A media file whose handle points at `dc_id` and whose bytes follow
/// [`byte_at`].
pub fn media_file(dc_id: i32, file_size: u64, unique_id: &str) -> MediaFile {
    MediaFile {
        file_handle: packed_handle(dc_id),
        unique_id: unique_id.to_string(),
        file_name: Some("sample.mp4".to_string()),
        file_size,
        mime_type: Some("video/mp4".to_string()),
    }
}

/// A message whose video slot holds [`media_file`].
pub fn video_message(id: i64, chat_id: i64, dc_id: i32, size: u64, unique_id: &str) -> ArchivedMessage {
    ArchivedMessage {
        id,
        chat_id,
        video: Some(media_file(dc_id, size, unique_id)),
        ..Default::default()
    }
}

/// Shared recording of media-plane traffic.
#[derive(Default)]
pub struct MockStore {
    /// Total size of the single file this store serves.
    pub file_size: u64,
    /// Offsets of every `getFile` call, in order.
    pub fetch_offsets: Mutex<Vec<u64>>,
    /// Number of `getFile` calls to fail with a timeout before succeeding.
    pub timeouts_remaining: AtomicUsize,
}

impl MockStore {
    pub fn new(file_size: u64) -> Arc<Self> {
        Arc::new(Self {
            file_size,
            ..Default::default()
        })
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.fetch_offsets.lock().unwrap().clone()
    }
}

pub struct MockClient {
    home_dc: i32,
    messages: Mutex<HashMap<(i64, i64), ArchivedMessage>>,
    pub message_fetches: AtomicUsize,
    pub export_calls: AtomicUsize,
    pub store: Arc<MockStore>,
    /// Scripted outcomes for successive `importAuthorization` attempts;
    /// exhausted script means success.
    import_script: Arc<Mutex<VecDeque<RpcError>>>,
    pub import_attempts: Arc<AtomicUsize>,
    /// Batches served by successive `get_updates` calls.
    updates_script: Mutex<VecDeque<Vec<Update>>>,
    /// Messages sent through the bot surface, as `(chat_id, text)`.
    pub sent: Mutex<Vec<(i64, String)>>,
    /// Forwards as `(from_chat, message_id, to_chat)`.
    pub forwards: Mutex<Vec<(i64, i64, i64)>>,
    forward_counter: AtomicUsize,
}

impl MockClient {
    pub fn new(home_dc: i32, file_size: u64) -> Self {
        Self {
            home_dc,
            messages: Mutex::new(HashMap::new()),
            message_fetches: AtomicUsize::new(0),
            export_calls: AtomicUsize::new(0),
            store: MockStore::new(file_size),
            import_script: Arc::new(Mutex::new(VecDeque::new())),
            import_attempts: Arc::new(AtomicUsize::new(0)),
            updates_script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            forwards: Mutex::new(Vec::new()),
            forward_counter: AtomicUsize::new(0),
        }
    }

    /// Queue one batch of updates for the long-poll loop.
    pub fn push_updates(&self, batch: Vec<Update>) {
        self.updates_script.lock().unwrap().push_back(batch);
    }

    pub fn with_message(self, msg: ArchivedMessage) -> Self {
        self.messages
            .lock()
            .unwrap()
            .insert((msg.chat_id, msg.id), msg.clone());
        self
    }

    /// Queue failures for the next import attempts.
    pub fn script_import_failures(&self, failures: Vec<RpcError>) {
        *self.import_script.lock().unwrap() = failures.into();
    }
}

#[async_trait]
impl StorageClient for MockClient {
    fn home_dc(&self) -> i32 {
        self.home_dc
    }

    async fn get_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<ArchivedMessage>, RpcError> {
        self.message_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(&(chat_id, message_id))
            .cloned())
    }

    async fn export_authorization(&self, dc_id: i32) -> Result<ExportedAuthorization, RpcError> {
        self.export_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExportedAuthorization {
            id: i64::from(dc_id),
            bytes: vec![0xAB; 8],
        })
    }

    async fn open_transport(&self, dc_id: i32) -> Result<Box<dyn MediaTransport>, RpcError> {
        Ok(Box::new(MockTransport {
            store: self.store.clone(),
            authorized: AtomicBool::new(dc_id == self.home_dc),
            import_script: self.import_script.clone(),
            import_attempts: self.import_attempts.clone(),
        }))
    }
}

#[async_trait]
impl BotClient for MockClient {
    async fn get_updates(&self, _offset: i64) -> Result<Vec<Update>, RpcError> {
        Ok(self
            .updates_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        _reply_to: Option<i64>,
    ) -> Result<i64, RpcError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat_id, text.to_string()));
        Ok(sent.len() as i64)
    }

    async fn forward_message(
        &self,
        from_chat_id: i64,
        message_id: i64,
        to_chat_id: i64,
    ) -> Result<i64, RpcError> {
        self.forwards
            .lock()
            .unwrap()
            .push((from_chat_id, message_id, to_chat_id));
        // Archived copies get fresh IDs well away from the originals.
        Ok(1000 + self.forward_counter.fetch_add(1, Ordering::SeqCst) as i64)
    }
}

pub struct MockTransport {
    store: Arc<MockStore>,
    authorized: AtomicBool,
    import_script: Arc<Mutex<VecDeque<RpcError>>>,
    import_attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn import_authorization(&self, _id: i64, _bytes: &[u8]) -> Result<(), RpcError> {
        self.import_attempts.fetch_add(1, Ordering::SeqCst);
        let scripted = self.import_script.lock().unwrap().pop_front();
        match scripted {
            Some(err) => Err(err),
            None => {
                self.authorized.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn get_file(
        &self,
        _location: &FileLocation,
        offset: u64,
        limit: u32,
    ) -> Result<Bytes, RpcError> {
        if !self.authorized.load(Ordering::SeqCst) {
            return Err(RpcError::Api {
                code: 401,
                message: "SESSION_UNAUTHORIZED".to_string(),
            });
        }
        if self
            .store
            .timeouts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RpcError::Timeout);
        }

        self.store.fetch_offsets.lock().unwrap().push(offset);
        if offset >= self.store.file_size {
            return Ok(Bytes::new());
        }
        let end = (offset + u64::from(limit)).min(self.store.file_size);
        Ok(Bytes::from(expected_bytes(offset, end - 1)))
    }
}

//! Platform client seam.
//!
//! The streaming plane only ever talks to the chat platform through the
//! [`StorageClient`] and [`MediaTransport`] traits, so every piece of the
//! data plane can be exercised against in-memory fakes. The production
//! implementation is [`api::PlatformApiClient`], a JSON-over-HTTPS RPC
//! client.

pub mod api;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use bytes::Bytes;

use crate::fileid::FileLocation;

pub use api::PlatformApiClient;

/// Upstream RPC failures, classified for the retry loops.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The target datacenter rejected the exported authorization bytes.
    #[error("authorization bytes rejected by datacenter")]
    AuthBytesInvalid,
    /// Connection-level failure (refused, reset, DNS, TLS).
    #[error("transport error: {0}")]
    Transport(String),
    /// The request did not complete within its deadline.
    #[error("upstream request timed out")]
    Timeout,
    /// Upstream answered with a non-success HTTP status.
    #[error("upstream returned status {0}")]
    Status(u16),
    /// The platform reported an application-level error.
    #[error("platform error {code}: {message}")]
    Api { code: i64, message: String },
    /// The reply body did not have the expected shape.
    #[error("malformed upstream reply: {0}")]
    Malformed(String),
}

impl RpcError {
    /// Whether the session-setup loop should sleep before retrying.
    pub fn is_transient_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

/// The bot identity reported by the platform at startup.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: i64,
    pub username: String,
    /// Home datacenter of this identity's long-lived authorization.
    pub dc_id: i32,
}

/// One media slot of an archived message.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MediaFile {
    /// Packed platform descriptor; see [`crate::fileid::FileIdentity::decode`].
    pub file_handle: String,
    /// Stable identifier; its first 6 characters are the integrity prefix.
    pub unique_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// A message fetched from the archive channel. Exactly the slots the
/// gateway serves; anything else counts as "no supported media".
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ArchivedMessage {
    pub id: i64,
    pub chat_id: i64,
    #[serde(default)]
    pub video: Option<MediaFile>,
    #[serde(default)]
    pub document: Option<MediaFile>,
    #[serde(default)]
    pub audio: Option<MediaFile>,
    #[serde(default)]
    pub voice: Option<MediaFile>,
}

impl ArchivedMessage {
    /// First populated media slot, in serving priority order.
    pub fn media(&self) -> Option<&MediaFile> {
        self.video
            .as_ref()
            .or(self.document.as_ref())
            .or(self.audio.as_ref())
            .or(self.voice.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.media().is_none()
    }
}

/// Authorization blob exported from a worker's home datacenter for import
/// into a foreign one.
#[derive(Debug, Clone)]
pub struct ExportedAuthorization {
    pub id: i64,
    pub bytes: Vec<u8>,
}

/// One update from the bot long-poll loop.
#[derive(Debug, Clone)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

/// An incoming chat message, as far as the command handlers care.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: Option<i64>,
    pub text: Option<String>,
    pub media: Option<MediaFile>,
}

/// Bot-side surface used by the command handlers. Only the primary client
/// ever drives this; workers are pure data plane.
#[async_trait]
pub trait BotClient: Send + Sync {
    /// Long-poll for updates past `offset`.
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, RpcError>;

    /// Send a text message; returns the new message ID.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, RpcError>;

    /// Forward a message into another chat; returns the new message ID.
    async fn forward_message(
        &self,
        from_chat_id: i64,
        message_id: i64,
        to_chat_id: i64,
    ) -> Result<i64, RpcError>;
}

/// An authenticated client for one bot identity.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Home datacenter of this client's long-lived authorization.
    fn home_dc(&self) -> i32;

    /// Fetch one message from a chat. `Ok(None)` means the message does
    /// not exist; deleted messages come back present but empty.
    async fn get_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<ArchivedMessage>, RpcError>;

    /// Export this client's authorization for use in another datacenter.
    async fn export_authorization(&self, dc_id: i32) -> Result<ExportedAuthorization, RpcError>;

    /// Open a media-only transport to a datacenter. For the home DC the
    /// transport is born authorized; for any other DC the caller must
    /// complete the import exchange before fetching.
    async fn open_transport(&self, dc_id: i32) -> Result<Box<dyn MediaTransport>, RpcError>;
}

/// A media-only connection to one datacenter.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Install an exported authorization on this transport.
    async fn import_authorization(&self, id: i64, bytes: &[u8]) -> Result<(), RpcError>;

    /// Fetch one aligned chunk. An empty payload signals end of file.
    async fn get_file(
        &self,
        location: &FileLocation,
        offset: u64,
        limit: u32,
    ) -> Result<Bytes, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(name: &str) -> MediaFile {
        MediaFile {
            file_handle: String::new(),
            unique_id: name.to_string(),
            file_name: None,
            file_size: 0,
            mime_type: None,
        }
    }

    #[test]
    fn media_slot_priority() {
        let mut msg = ArchivedMessage {
            id: 1,
            chat_id: 2,
            video: None,
            document: Some(slot("doc")),
            audio: Some(slot("aud")),
            voice: None,
        };
        assert_eq!(msg.media().unwrap().unique_id, "doc");

        msg.video = Some(slot("vid"));
        assert_eq!(msg.media().unwrap().unique_id, "vid");

        msg.video = None;
        msg.document = None;
        assert_eq!(msg.media().unwrap().unique_id, "aud");
    }

    #[test]
    fn empty_message_has_no_media() {
        let msg = ArchivedMessage {
            id: 1,
            chat_id: 2,
            ..Default::default()
        };
        assert!(msg.is_empty());
    }
}

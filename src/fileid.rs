//! Decoded file identity and upstream location selection.
//!
//! The platform hands out a packed, base64-encoded descriptor for every
//! media object. Decoding it yields the stable coordinates a chunk RPC
//! needs: media ID, access hash, file reference, home datacenter, and the
//! variant-specific photo fields. `FileIdentity` bundles that descriptor
//! with the display attributes (name, size, MIME, unique ID) taken from
//! the surrounding message.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

use crate::client::MediaFile;

/// Channel IDs are offset into the `-100...` range by the platform.
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// Media variant, which determines the RPC location shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Document,
    Video,
    Audio,
    Voice,
    Photo,
    ChatPhoto,
}

/// Photo-family coordinates, present only for `Photo`/`ChatPhoto`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhotoCoords {
    #[serde(default)]
    pub volume_id: i64,
    #[serde(default)]
    pub local_id: i32,
    /// Owning chat for chat photos; sign and access hash select the peer.
    #[serde(default)]
    pub chat_id: i64,
    #[serde(default)]
    pub chat_access_hash: i64,
    #[serde(default)]
    pub big: bool,
}

/// Wire layout of the packed descriptor, after base64 removal.
#[derive(Debug, Deserialize)]
struct PackedHandle {
    kind: FileKind,
    media_id: u64,
    access_hash: i64,
    /// Base64 within base64: the file reference is raw bytes.
    #[serde(default)]
    file_reference: String,
    dc_id: i32,
    #[serde(default)]
    thumb_size: String,
    #[serde(default)]
    photo: Option<PhotoCoords>,
}

/// Everything a streamer needs to fetch one archived file.
#[derive(Debug, Clone)]
pub struct FileIdentity {
    pub kind: FileKind,
    pub media_id: u64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    pub dc_id: i32,
    pub thumb_size: String,
    pub photo: Option<PhotoCoords>,

    pub file_size: u64,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub unique_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("file handle is not valid base64")]
    Base64,
    #[error("file handle payload is malformed")]
    Layout,
}

impl FileIdentity {
    /// Decode a message's media slot into a full identity.
    pub fn decode(media: &MediaFile) -> Result<Self, HandleError> {
        let raw = BASE64
            .decode(media.file_handle.as_bytes())
            .map_err(|_| HandleError::Base64)?;
        let packed: PackedHandle =
            serde_json::from_slice(&raw).map_err(|_| HandleError::Layout)?;
        let file_reference = BASE64
            .decode(packed.file_reference.as_bytes())
            .map_err(|_| HandleError::Layout)?;

        Ok(Self {
            kind: packed.kind,
            media_id: packed.media_id,
            access_hash: packed.access_hash,
            file_reference,
            dc_id: packed.dc_id,
            thumb_size: packed.thumb_size,
            photo: packed.photo,
            file_size: media.file_size,
            file_name: media.file_name.clone(),
            mime_type: media.mime_type.clone(),
            unique_id: media.unique_id.clone(),
        })
    }

    /// First 6 characters of the stable unique ID, used as the cheap
    /// lookup-vs-stream consistency check.
    pub fn integrity_prefix(&self) -> &str {
        integrity_prefix(&self.unique_id)
    }
}

/// Integrity prefix of any unique ID. Unique IDs are ASCII; short ones are
/// used whole.
pub fn integrity_prefix(unique_id: &str) -> &str {
    unique_id.get(..6).unwrap_or(unique_id)
}

/// Peer addressing for chat-photo locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPeer {
    User { user_id: i64, access_hash: i64 },
    Chat { chat_id: i64 },
    Channel { channel_id: i64, access_hash: i64 },
}

/// Upstream location descriptor, one variant per RPC shape.
#[derive(Debug, Clone, PartialEq)]
pub enum FileLocation {
    Document {
        id: u64,
        access_hash: i64,
        file_reference: Vec<u8>,
        thumb_size: String,
    },
    Photo {
        id: u64,
        access_hash: i64,
        file_reference: Vec<u8>,
        thumb_size: String,
    },
    PeerPhoto {
        peer: InputPeer,
        volume_id: i64,
        local_id: i32,
        big: bool,
    },
}

/// Build the RPC location for a file. Document-family kinds share one
/// shape; photos carry a thumbnail size; chat photos address the owning
/// peer, chosen by the sign and access hash of the chat ID.
pub fn location_for(file: &FileIdentity) -> FileLocation {
    match file.kind {
        FileKind::ChatPhoto => {
            let coords = file.photo.clone().unwrap_or_default();
            let peer = if coords.chat_id > 0 {
                InputPeer::User {
                    user_id: coords.chat_id,
                    access_hash: coords.chat_access_hash,
                }
            } else if coords.chat_access_hash == 0 {
                InputPeer::Chat {
                    chat_id: -coords.chat_id,
                }
            } else {
                InputPeer::Channel {
                    channel_id: channel_id_from_chat(coords.chat_id),
                    access_hash: coords.chat_access_hash,
                }
            };
            FileLocation::PeerPhoto {
                peer,
                volume_id: coords.volume_id,
                local_id: coords.local_id,
                big: coords.big,
            }
        }
        FileKind::Photo => FileLocation::Photo {
            id: file.media_id,
            access_hash: file.access_hash,
            file_reference: file.file_reference.clone(),
            thumb_size: file.thumb_size.clone(),
        },
        _ => FileLocation::Document {
            id: file.media_id,
            access_hash: file.access_hash,
            file_reference: file.file_reference.clone(),
            thumb_size: file.thumb_size.clone(),
        },
    }
}

/// Strip the `-100` marker from a channel-form chat ID.
fn channel_id_from_chat(chat_id: i64) -> i64 {
    -chat_id - CHANNEL_ID_OFFSET
}

//! JSON-over-HTTPS implementation of the platform client.
//!
//! Bot-side calls go to `{api_base}/bot{token}/{method}` and come back in
//! the platform's `{ok, result}` envelope. Media-plane calls go to the
//! per-datacenter endpoints and carry a session credential: the bot's own
//! long-lived authorization for the home DC, or a session token installed
//! by `importAuthorization` for any other DC.

use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::{
    ArchivedMessage, BotClient, BotIdentity, ExportedAuthorization, IncomingMessage, MediaFile,
    MediaTransport, RpcError, StorageClient, Update,
};
use crate::config::Config;
use crate::fileid::{FileLocation, InputPeer};

/// Long-poll timeout passed to `getUpdates`, seconds.
const POLL_TIMEOUT_SECS: u64 = 25;

pub struct PlatformApiClient {
    http: reqwest::Client,
    api_base: String,
    media_base: String,
    token: String,
    api_id: i32,
    api_hash: String,
    /// Learned from `getMe` at startup; 0 until then.
    home_dc: AtomicI32,
}

impl PlatformApiClient {
    pub fn new(config: &Config, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.clone(),
            media_base: config.media_base.clone(),
            token,
            api_id: config.api_id,
            api_hash: config.api_hash.clone(),
            home_dc: AtomicI32::new(0),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Authenticate and learn this identity's home datacenter.
    pub async fn start(&self) -> Result<BotIdentity, RpcError> {
        let result = self
            .invoke(
                "getMe",
                json!({ "api_id": self.api_id, "api_hash": self.api_hash }),
            )
            .await?;

        let identity = BotIdentity {
            id: result["id"]
                .as_i64()
                .ok_or_else(|| RpcError::Malformed("getMe reply lacks id".into()))?,
            username: result["username"].as_str().unwrap_or_default().to_string(),
            dc_id: result["dc_id"].as_i64().unwrap_or(1) as i32,
        };
        self.home_dc.store(identity.dc_id, Ordering::Relaxed);
        Ok(identity)
    }

    async fn invoke(&self, method: &str, payload: Value) -> Result<Value, RpcError> {
        let resp = self
            .http
            .post(self.api_url(method))
            .json(&payload)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(RpcError::Status(status.as_u16()));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        envelope_result(body)
    }
}

#[async_trait]
impl BotClient for PlatformApiClient {
    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, RpcError> {
        let result = self
            .invoke(
                "getUpdates",
                json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"],
                }),
            )
            .await?;

        let Some(items) = result.as_array() else {
            return Ok(Vec::new());
        };

        let mut updates = Vec::with_capacity(items.len());
        for item in items {
            let Some(update_id) = item["update_id"].as_i64() else {
                continue;
            };
            updates.push(Update {
                update_id,
                message: item.get("message").and_then(parse_incoming),
            });
        }
        Ok(updates)
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<i64, RpcError> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(reply_to) = reply_to {
            payload["reply_to_message_id"] = json!(reply_to);
        }
        let result = self.invoke("sendMessage", payload).await?;
        result["message_id"]
            .as_i64()
            .ok_or_else(|| RpcError::Malformed("sendMessage reply lacks message_id".into()))
    }

    async fn forward_message(
        &self,
        from_chat_id: i64,
        message_id: i64,
        to_chat_id: i64,
    ) -> Result<i64, RpcError> {
        let result = self
            .invoke(
                "forwardMessage",
                json!({
                    "from_chat_id": from_chat_id,
                    "message_id": message_id,
                    "chat_id": to_chat_id,
                }),
            )
            .await?;
        result["message_id"]
            .as_i64()
            .ok_or_else(|| RpcError::Malformed("forwardMessage reply lacks message_id".into()))
    }
}

#[async_trait]
impl StorageClient for PlatformApiClient {
    fn home_dc(&self) -> i32 {
        self.home_dc.load(Ordering::Relaxed)
    }

    async fn get_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<ArchivedMessage>, RpcError> {
        let result = self
            .invoke(
                "getMessage",
                json!({ "chat_id": chat_id, "message_id": message_id }),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .map_err(|e| RpcError::Malformed(e.to_string()))
    }

    async fn export_authorization(&self, dc_id: i32) -> Result<ExportedAuthorization, RpcError> {
        let result = self
            .invoke("exportAuthorization", json!({ "dc_id": dc_id }))
            .await?;
        let id = result["id"]
            .as_i64()
            .ok_or_else(|| RpcError::Malformed("export reply lacks id".into()))?;
        let bytes = result["bytes"]
            .as_str()
            .and_then(|b| BASE64.decode(b).ok())
            .ok_or_else(|| RpcError::Malformed("export reply lacks bytes".into()))?;
        Ok(ExportedAuthorization { id, bytes })
    }

    async fn open_transport(&self, dc_id: i32) -> Result<Box<dyn MediaTransport>, RpcError> {
        // The home DC reuses the bot's long-lived authorization; foreign
        // DCs start unauthorized until the import exchange completes.
        let credential = if dc_id == self.home_dc() {
            Some(self.token.clone())
        } else {
            None
        };
        Ok(Box::new(HttpMediaTransport {
            http: self.http.clone(),
            endpoint: self.media_base.replace("{dc}", &dc_id.to_string()),
            credential: Mutex::new(credential),
        }))
    }
}

/// Media-only connection to a single datacenter.
struct HttpMediaTransport {
    http: reqwest::Client,
    endpoint: String,
    credential: Mutex<Option<String>>,
}

impl HttpMediaTransport {
    async fn call(&self, method: &str, payload: Value) -> Result<Value, RpcError> {
        let credential = self.credential.lock().await.clone();
        let mut req = self
            .http
            .post(format!("{}/{}", self.endpoint, method))
            .json(&payload);
        if let Some(credential) = credential {
            req = req.bearer_auth(credential);
        }

        let resp = req.send().await.map_err(classify_reqwest)?;
        let status = resp.status();
        if status.is_server_error() {
            return Err(RpcError::Status(status.as_u16()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        envelope_result(body)
    }
}

#[async_trait]
impl MediaTransport for HttpMediaTransport {
    async fn import_authorization(&self, id: i64, bytes: &[u8]) -> Result<(), RpcError> {
        let result = self
            .call(
                "importAuthorization",
                json!({ "id": id, "bytes": BASE64.encode(bytes) }),
            )
            .await?;
        let session = result["session_token"]
            .as_str()
            .ok_or_else(|| RpcError::Malformed("import reply lacks session_token".into()))?;
        *self.credential.lock().await = Some(session.to_string());
        Ok(())
    }

    async fn get_file(
        &self,
        location: &FileLocation,
        offset: u64,
        limit: u32,
    ) -> Result<Bytes, RpcError> {
        let result = self
            .call(
                "getFile",
                json!({
                    "location": location_json(location),
                    "offset": offset,
                    "limit": limit,
                }),
            )
            .await?;
        let data = result["data"].as_str().unwrap_or_default();
        if data.is_empty() {
            return Ok(Bytes::new());
        }
        BASE64
            .decode(data)
            .map(Bytes::from)
            .map_err(|_| RpcError::Malformed("chunk payload is not valid base64".into()))
    }
}

/// Unwrap the platform's `{ok, result}` envelope.
fn envelope_result(body: Value) -> Result<Value, RpcError> {
    if body["ok"].as_bool() == Some(true) {
        return Ok(body.get("result").cloned().unwrap_or(Value::Null));
    }
    let code = body["error_code"].as_i64().unwrap_or(0);
    let message = body["description"].as_str().unwrap_or("unknown").to_string();
    if message == "AUTH_BYTES_INVALID" {
        return Err(RpcError::AuthBytesInvalid);
    }
    Err(RpcError::Api { code, message })
}

fn classify_reqwest(err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout
    } else if err.is_connect() || err.is_request() {
        RpcError::Transport(err.to_string())
    } else {
        RpcError::Malformed(err.to_string())
    }
}

fn parse_incoming(msg: &Value) -> Option<IncomingMessage> {
    let slot = |name: &str| -> Option<MediaFile> {
        msg.get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    };
    // Same priority order the streaming side uses.
    let media = slot("video")
        .or_else(|| slot("document"))
        .or_else(|| slot("audio"))
        .or_else(|| slot("voice"));

    Some(IncomingMessage {
        id: msg["message_id"].as_i64()?,
        chat_id: msg["chat"]["id"].as_i64()?,
        sender_id: msg["from"]["id"].as_i64(),
        text: msg["text"].as_str().map(str::to_string),
        media,
    })
}

fn location_json(location: &FileLocation) -> Value {
    match location {
        FileLocation::Document {
            id,
            access_hash,
            file_reference,
            thumb_size,
        } => json!({
            "_": "inputDocumentFileLocation",
            "id": id,
            "access_hash": access_hash,
            "file_reference": BASE64.encode(file_reference),
            "thumb_size": thumb_size,
        }),
        FileLocation::Photo {
            id,
            access_hash,
            file_reference,
            thumb_size,
        } => json!({
            "_": "inputPhotoFileLocation",
            "id": id,
            "access_hash": access_hash,
            "file_reference": BASE64.encode(file_reference),
            "thumb_size": thumb_size,
        }),
        FileLocation::PeerPhoto {
            peer,
            volume_id,
            local_id,
            big,
        } => json!({
            "_": "inputPeerPhotoFileLocation",
            "peer": peer_json(peer),
            "volume_id": volume_id,
            "local_id": local_id,
            "big": big,
        }),
    }
}

fn peer_json(peer: &InputPeer) -> Value {
    match peer {
        InputPeer::User {
            user_id,
            access_hash,
        } => json!({ "_": "inputPeerUser", "user_id": user_id, "access_hash": access_hash }),
        InputPeer::Chat { chat_id } => json!({ "_": "inputPeerChat", "chat_id": chat_id }),
        InputPeer::Channel {
            channel_id,
            access_hash,
        } => json!({
            "_": "inputPeerChannel",
            "channel_id": channel_id,
            "access_hash": access_hash,
        }),
    }
}

//! Link token codec.
//!
//! A download link carries an opaque, URL-safe token that round-trips the
//! archive coordinates of a stored file. Encoding is compact JSON →
//! DEFLATE at maximum ratio → base-62 over the big-endian integer value of
//! the compressed bytes. There is no MAC; the token is a capability, and
//! the edge layer's unique-ID prefix check is the only integrity guard.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

const BASE62_ALPHABET: &[u8; 62] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Archive coordinates carried by a link token.
///
/// `chat_id` is stored without the platform's fixed `-100` channel prefix;
/// the HTTP edge restores it on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub msg_id: i64,
    pub chat_id: String,
}

/// Decode failures, all of which the edge reports as a bad token.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("character {0:?} is not in the token alphabet")]
    BadCharacter(char),
    #[error("compressed payload is truncated or corrupt")]
    Deflate(#[source] std::io::Error),
    #[error("token payload is not a JSON object")]
    Json,
    #[error("token payload lacks a message ID")]
    MissingMsgId,
}

/// Encode archive coordinates into a URL-safe token.
pub fn encode(target: &LinkTarget) -> String {
    // serde_json cannot fail on this struct and writing to a Vec cannot
    // fail, so the whole pipeline is infallible.
    let json = serde_json::to_vec(target).unwrap_or_default();
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    let compressed = encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .unwrap_or_default();
    base62_encode(&compressed)
}

/// Decode a token back into archive coordinates.
pub fn decode(token: &str) -> Result<LinkTarget, CodecError> {
    let compressed = base62_decode(token)?;
    let mut json = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(CodecError::Deflate)?;

    let value: serde_json::Value = serde_json::from_slice(&json).map_err(|_| CodecError::Json)?;
    let obj = value.as_object().ok_or(CodecError::Json)?;

    let msg_id = obj
        .get("msg_id")
        .and_then(serde_json::Value::as_i64)
        .ok_or(CodecError::MissingMsgId)?;
    // Tolerate both string and numeric chat IDs; older links used numbers.
    let chat_id = match obj.get("chat_id") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    Ok(LinkTarget { msg_id, chat_id })
}

/// Base-62 encode bytes interpreted as an unsigned big-endian integer.
/// Leading zero bytes do not survive the integer interpretation; DEFLATE
/// output never starts with one.
fn base62_encode(data: &[u8]) -> String {
    let mut num: Vec<u8> = data.iter().copied().skip_while(|&b| b == 0).collect();
    let mut digits = Vec::new();

    while !num.is_empty() {
        let mut rem: u32 = 0;
        let mut quotient = Vec::with_capacity(num.len());
        for &b in &num {
            let acc = rem * 256 + u32::from(b);
            quotient.push((acc / 62) as u8);
            rem = acc % 62;
        }
        digits.push(BASE62_ALPHABET[rem as usize]);
        let leading = quotient.iter().take_while(|&&b| b == 0).count();
        quotient.drain(..leading);
        num = quotient;
    }

    if digits.is_empty() {
        return "0".to_string();
    }
    digits.reverse();
    // Alphabet bytes are ASCII.
    String::from_utf8(digits).unwrap_or_default()
}

/// Reverse of [`base62_encode`].
fn base62_decode(token: &str) -> Result<Vec<u8>, CodecError> {
    let mut num: Vec<u8> = Vec::new();
    for ch in token.chars() {
        let digit = BASE62_ALPHABET
            .iter()
            .position(|&a| a == ch as u8)
            .filter(|_| ch.is_ascii())
            .ok_or(CodecError::BadCharacter(ch))? as u32;

        let mut carry = digit;
        for b in num.iter_mut().rev() {
            let acc = u32::from(*b) * 62 + carry;
            *b = (acc & 0xff) as u8;
            carry = acc >> 8;
        }
        while carry > 0 {
            num.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    Ok(num)
}

//! Error taxonomy for the download path.
//!
//! Every failure the HTTP edge can surface maps onto one variant here, and
//! every variant maps onto exactly one status code. Mid-stream failures are
//! a separate case: once headers are flushed the status cannot change, so
//! the streamer simply stops emitting and the client observes a short read.

use warp::http::StatusCode;

use crate::client::RpcError;
use crate::codec::CodecError;

/// Failures on the `/dl` path, ordered roughly by where they occur.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The link token failed to decode or lacked a message ID.
    #[error("invalid link token: {0}")]
    BadToken(#[from] CodecError),

    /// Message absent, empty, or without supported media.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Cached unique-ID prefix disagrees with the live message.
    #[error("file integrity check failed")]
    IntegrityMismatch,

    /// `Range` header present but syntactically unusable.
    #[error("invalid range header: {0}")]
    InvalidRange(String),

    /// Well-formed range outside `[0, size-1]`.
    #[error("requested range not satisfiable for size {size}")]
    RangeUnsatisfiable { size: u64 },

    /// The dispatcher has no live workers.
    #[error("no worker clients available")]
    NoWorkers,

    /// A chunk RPC timed out after all retries.
    #[error("upstream chunk fetch timed out")]
    UpstreamTimeout,

    /// The cross-datacenter authorization exchange exhausted its retries.
    #[error("media session setup failed: {0}")]
    SessionFailure(String),

    /// Any other upstream RPC failure.
    #[error("upstream error: {0}")]
    Rpc(#[from] RpcError),
}

impl GatewayError {
    /// Status code this error is reported as, when it occurs before the
    /// response headers are flushed.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadToken(_) | Self::InvalidRange(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::IntegrityMismatch => StatusCode::FORBIDDEN,
            Self::RangeUnsatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::NoWorkers => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::SessionFailure(_) | Self::Rpc(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

//! HTTP edge.
//!
//! Three routes: a JSON status blob at `/`, Prometheus text at `/metrics`,
//! and the download surface at `GET|HEAD /dl/{token}/{name}`. The download
//! handler walks the full pipeline — token decode, existence and integrity
//! checks through the primary client, least-loaded dispatch, range
//! negotiation — and attaches the chunk streamer as the response body.
//! Full-file responses deliberately omit `Content-Length`: an upstream
//! failure mid-body then surfaces to the client as a short read instead of
//! a protocol violation.

use std::sync::Arc;

use hyper::Body;
use serde_json::json;
use tracing::{debug, warn};
use warp::http::header::{
    ACCEPT_RANGES, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, CACHE_CONTROL,
    CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
};
use warp::http::{Response, StatusCode};
use warp::Filter;

use crate::codec::{self, LinkTarget};
use crate::error::GatewayError;
use crate::fileid::{integrity_prefix, FileIdentity};
use crate::metrics;
use crate::range::{parse_range, StreamGeometry};
use crate::runtime::StreamingRuntime;

const EXPOSED_HEADERS: &str = "Content-Length, Content-Range, Accept-Ranges";

/// The full route tree.
pub fn routes(
    rt: Arc<StreamingRuntime>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let status = warp::path::end().and(warp::get()).map(|| {
        warp::reply::json(&json!({
            "status": "online",
            "bot": "streamgate",
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": { "download": "/dl/{token}/{name}" },
        }))
    });

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            Response::builder()
                .header(CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Body::from(metrics::render()))
                .unwrap_or_else(|_| plain_status(StatusCode::OK))
        });

    let with_runtime = warp::any().map(move || Arc::clone(&rt));
    let is_head = warp::get()
        .map(|| false)
        .or(warp::head().map(|| true))
        .unify();

    let download = warp::path("dl")
        .and(warp::path::param::<String>())
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(is_head)
        .and(warp::header::optional::<String>("range"))
        .and(with_runtime)
        .and_then(download_handler);

    status.or(metrics_route).or(download)
}

async fn download_handler(
    token: String,
    _name: String,
    head_only: bool,
    range_header: Option<String>,
    rt: Arc<StreamingRuntime>,
) -> Result<Response<Body>, warp::Rejection> {
    let response = match serve_download(&rt, &token, head_only, range_header.as_deref()).await {
        Ok(response) => response,
        Err(err) => {
            debug!(%err, token, "download request rejected");
            error_response(&err)
        }
    };
    metrics::record_download_response(response.status().as_u16());
    Ok::<_, warp::Rejection>(response)
}

async fn serve_download(
    rt: &Arc<StreamingRuntime>,
    token: &str,
    head_only: bool,
    range_header: Option<&str>,
) -> Result<Response<Body>, GatewayError> {
    // 1. Token → archive coordinates, restoring the channel prefix.
    let target = codec::decode(token)?;
    let message_id = target.msg_id;
    let archive_id = archive_id_from(&target)
        .ok_or_else(|| GatewayError::NotFound("unusable archive reference".to_string()))?;

    // 2. Existence and liveness check through the primary client. The
    // unique-ID prefix recorded here is compared against the worker-side
    // cache below.
    let primary = rt.primary().ok_or(GatewayError::NoWorkers)?;
    let live_message = primary
        .client
        .get_message(archive_id, message_id)
        .await
        .map_err(|e| GatewayError::NotFound(e.to_string()))?
        .ok_or_else(|| GatewayError::NotFound(format!("message {message_id} not found")))?;
    let live_prefix = live_message
        .media()
        .map(|m| integrity_prefix(&m.unique_id).to_string())
        .ok_or_else(|| GatewayError::NotFound("no supported media in message".to_string()))?;

    // 3. Dispatch to the least-loaded worker.
    let worker = Arc::clone(rt.pool().pick().ok_or(GatewayError::NoWorkers)?);
    let guard = (!head_only).then(|| Arc::clone(&worker).begin_stream());

    // 4. Resolve and verify the file identity on that worker.
    let streamer = rt.streamer(&worker);
    let file = streamer
        .properties()
        .get(&worker.client, archive_id, message_id)
        .await?;
    if file.integrity_prefix() != live_prefix {
        warn!(message_id, "cached unique ID disagrees with live message");
        return Err(GatewayError::IntegrityMismatch);
    }

    // 5. Range negotiation and fetch plan.
    let (range, partial) = parse_range(range_header, file.file_size)?;
    let geometry = StreamGeometry::for_range(range);
    let (file_name, mime_type) = resolve_name_and_mime(&file);

    debug!(
        worker = worker.index,
        message_id,
        start = range.start,
        end = range.end,
        parts = geometry.parts,
        "serving download"
    );

    let mut builder = Response::builder()
        .status(if partial {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        })
        .header(CONTENT_TYPE, mime_type)
        .header(
            CONTENT_DISPOSITION,
            format!("inline; filename=\"{file_name}\""),
        )
        .header(ACCEPT_RANGES, "bytes")
        .header(CACHE_CONTROL, "public, max-age=3600, immutable")
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(ACCESS_CONTROL_EXPOSE_HEADERS, EXPOSED_HEADERS);

    if partial {
        builder = builder
            .header(
                CONTENT_RANGE,
                format!("bytes {}-{}/{}", range.start, range.end, file.file_size),
            )
            .header(CONTENT_LENGTH, geometry.length);
    }

    let body = match guard {
        Some(guard) => Body::wrap_stream(streamer.stream(file, geometry, guard)),
        None => Body::empty(),
    };

    builder.body(body).map_err(|e| {
        GatewayError::NotFound(format!("response assembly failed: {e}"))
    })
}

/// Restore the fixed channel prefix when the stored chat ID lacks it.
fn archive_id_from(target: &LinkTarget) -> Option<i64> {
    let raw = target.chat_id.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with('-') {
        raw.parse().ok()
    } else {
        format!("-100{raw}").parse().ok()
    }
}

/// Filename and MIME for the response, in the original resolution order:
/// stored name, else a random hex stem; stored MIME, else a guess from the
/// name, else octet-stream; unnamed files borrow the MIME subtype as their
/// extension.
fn resolve_name_and_mime(file: &FileIdentity) -> (String, String) {
    let stored_name = file
        .file_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());

    let mime_type = file
        .mime_type
        .clone()
        .or_else(|| {
            stored_name.and_then(|name| {
                mime_guess::from_path(name)
                    .first()
                    .map(|m| m.essence_str().to_string())
            })
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let file_name = match stored_name {
        Some(name) => header_safe(name),
        None => {
            let subtype = mime_type.split('/').nth(1).unwrap_or("unknown");
            format!("{:04x}.{subtype}", rand::random::<u16>())
        }
    };

    (file_name, mime_type)
}

/// Keep the filename representable inside a quoted header value.
fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c == '"' || c.is_control() || !c.is_ascii() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

fn error_response(err: &GatewayError) -> Response<Body> {
    let status = err.status();
    let mut builder = Response::builder().status(status);

    // 416 answers with the unsatisfied size and nothing else.
    if let GatewayError::RangeUnsatisfiable { size } = err {
        return builder
            .header(CONTENT_RANGE, format!("bytes */{size}"))
            .body(Body::empty())
            .unwrap_or_else(|_| plain_status(status));
    }

    builder = builder.header(CONTENT_TYPE, "application/json");
    let detail = json!({ "detail": err.to_string() }).to_string();
    builder
        .body(Body::from(detail))
        .unwrap_or_else(|_| plain_status(status))
}

fn plain_status(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

//! Bot-side command handlers.
//!
//! Only the primary client drives this loop: it long-polls for updates,
//! answers `/start`, archives uploaded media into the dump channel and
//! replies with the download link, and serves the owner-only `/stats` and
//! `/log` commands. Errors from the platform are logged and the loop
//! keeps going.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{BotClient, IncomingMessage};
use crate::codec::{self, LinkTarget};
use crate::config::Config;
use crate::logging;
use crate::workers::WorkerPool;

/// Pause after a failed poll before trying again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Keep-alive self-ping cadence.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20 * 60);

/// Longest filename stem emitted into links.
const FILENAME_STEM_MAX: usize = 60;

/// How much of the log file `/log` replies with; chat messages cap out
/// around 4 KiB.
const LOG_TAIL_BYTES: u64 = 3500;

const WELCOME_TEXT: &str = "Send me a document, video, audio or voice file and I will reply \
with a direct download link. Links never expire and support seeking in video players.";

/// Long-poll loop over bot updates, until shutdown.
pub async fn run_update_loop(
    client: Arc<dyn BotClient>,
    config: Arc<Config>,
    pool: Arc<WorkerPool>,
    shutdown: CancellationToken,
) {
    let mut offset = 0i64;
    loop {
        let polled = tokio::select! {
            _ = shutdown.cancelled() => break,
            polled = client.get_updates(offset) => polled,
        };

        let updates = match polled {
            Ok(updates) => updates,
            Err(err) => {
                warn!(%err, "update poll failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(POLL_RETRY_DELAY) => continue,
                }
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            if let Some(message) = update.message {
                handle_message(&client, &config, &pool, message).await;
            }
        }
    }
    debug!("update loop stopped");
}

pub(crate) async fn handle_message(
    client: &Arc<dyn BotClient>,
    config: &Arc<Config>,
    pool: &Arc<WorkerPool>,
    message: IncomingMessage,
) {
    if let Some(text) = message.text.as_deref() {
        let command = text.split_whitespace().next().unwrap_or_default();
        match command {
            "/start" => {
                reply(client, &message, WELCOME_TEXT).await;
                return;
            }
            "/stats" => {
                if is_owner(config, &message) {
                    reply(client, &message, &stats_text(pool)).await;
                }
                return;
            }
            "/log" => {
                if is_owner(config, &message) {
                    reply(client, &message, &log_text()).await;
                }
                return;
            }
            _ => {}
        }
    }

    if message.media.is_some() {
        handle_upload(client, config, message).await;
    }
}

/// Archive an uploaded file and reply with its download link.
async fn handle_upload(
    client: &Arc<dyn BotClient>,
    config: &Arc<Config>,
    message: IncomingMessage,
) {
    let Some(media) = message.media.clone() else {
        return;
    };

    let archived_id = match client
        .forward_message(message.chat_id, message.id, config.archive_channel)
        .await
    {
        Ok(id) => id,
        Err(err) => {
            warn!(%err, "failed to copy file into the archive channel");
            reply(
                client,
                &message,
                "Could not copy the file to storage, please try again.",
            )
            .await;
            return;
        }
    };

    let file_name = media
        .file_name
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or("file");
    let url = download_url(config, archived_id, file_name);

    let text = format!(
        "File: {file_name}\nSize: {}\n\nDownload link:\n{url}",
        readable_size(media.file_size),
    );
    reply(client, &message, &text).await;
    info!(
        file = file_name,
        size = media.file_size,
        archived_id,
        "generated download link"
    );
}

/// Build the public download URL for an archived message.
pub fn download_url(config: &Config, archived_id: i64, file_name: &str) -> String {
    // Stored without the -100 channel marker; the edge restores it.
    let channel = config.archive_channel.to_string();
    let chat_id = channel
        .strip_prefix("-100")
        .unwrap_or(&channel)
        .to_string();

    let token = codec::encode(&LinkTarget {
        msg_id: archived_id,
        chat_id,
    });
    format!(
        "{}/dl/{token}/{}",
        config.base_url,
        sanitize_filename(file_name)
    )
}

async fn reply(client: &Arc<dyn BotClient>, message: &IncomingMessage, text: &str) {
    if let Err(err) = client
        .send_message(message.chat_id, text, Some(message.id))
        .await
    {
        warn!(%err, chat = message.chat_id, "failed to send reply");
    }
}

fn is_owner(config: &Config, message: &IncomingMessage) -> bool {
    config.owner_id != 0 && message.sender_id == Some(config.owner_id)
}

/// Reply body for `/log`: the tail of the configured log file.
fn log_text() -> String {
    let Some(path) = logging::log_file_path() else {
        return "No log file configured; logs go to stdout. \
Set STREAMGATE_LOG_FILE to enable /log."
            .to_string();
    };
    match read_log_tail(&path) {
        Ok(tail) if tail.trim().is_empty() => "Log file is empty.".to_string(),
        Ok(tail) => tail,
        Err(err) => format!("Could not read log file {}: {err}", path.display()),
    }
}

/// Last [`LOG_TAIL_BYTES`] of a file, without loading the rest.
fn read_log_tail(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(LOG_TAIL_BYTES)))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn stats_text(pool: &Arc<WorkerPool>) -> String {
    let mut loads: Vec<(usize, usize)> = pool.loads().into_iter().collect();
    loads.sort_unstable();

    let mut text = format!("Worker bots: {}\n\nLoad distribution:\n", pool.len());
    for (index, load) in loads {
        text.push_str(&format!("- worker {index}: {load} active streams\n"));
    }
    text
}

/// Make a filename URL- and header-friendly: keep `[A-Za-z0-9._-]`,
/// collapse runs of underscores, cap the stem length, keep the extension.
pub fn sanitize_filename(filename: &str) -> String {
    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (filename, None),
    };

    let mut cleaned = String::with_capacity(stem.len());
    for c in stem.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
            c
        } else {
            '_'
        };
        if c == '_' && cleaned.ends_with('_') {
            continue;
        }
        cleaned.push(c);
    }
    let mut stem: String = cleaned.trim_matches('_').chars().take(FILENAME_STEM_MAX).collect();
    if stem.is_empty() {
        stem.push_str("file");
    }

    match extension {
        Some(ext) => {
            let ext: String = ext.chars().filter(char::is_ascii_alphanumeric).collect();
            if ext.is_empty() {
                stem
            } else {
                format!("{stem}.{ext}")
            }
        }
        None => stem,
    }
}

/// Human-readable byte size for chat replies.
pub fn readable_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes == 0 {
        return "0B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.2}{}", UNITS[unit])
    }
}

/// Periodically fetch the status page so free-tier hosts keep the process
/// warm. Runs only when a public base URL is configured.
pub async fn keep_alive(base_url: String, shutdown: CancellationToken) {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default();
    let url = format!("{base_url}/");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(KEEP_ALIVE_INTERVAL) => {}
        }
        match http.get(&url).send().await {
            Ok(resp) => debug!(status = resp.status().as_u16(), "keep-alive ping"),
            Err(err) => warn!(%err, "keep-alive ping failed"),
        }
    }
}

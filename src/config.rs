//! Environment-driven configuration.
//!
//! Everything the gateway needs comes from environment variables; there is
//! no config file and no persisted state. Worker tokens come either from
//! the comma-separated `WORKER_BOTS` or, when that is unset, from the
//! enumerated `MULTI_TOKEN1`, `MULTI_TOKEN2`, ... variables.

use anyhow::{Context, Result};

/// Default HTTP bind port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default platform RPC endpoint.
const DEFAULT_API_BASE: &str = "https://api.gridgram.org";

/// Default per-datacenter media endpoint template. `{dc}` is replaced with
/// the datacenter number.
const DEFAULT_MEDIA_BASE: &str = "https://dc{dc}.media.gridgram.org";

#[derive(Debug, Clone)]
pub struct Config {
    /// Platform API credentials.
    pub api_id: i32,
    pub api_hash: String,
    /// Primary bot identity; also worker index 0.
    pub main_bot_token: String,
    /// Additional worker bot tokens, in index order (1..N).
    pub worker_tokens: Vec<String>,
    /// Archive channel the bot copies uploads into.
    pub archive_channel: i64,
    /// Public base URL used in emitted links. Empty disables link emission
    /// and the keep-alive ping.
    pub base_url: String,
    /// HTTP bind port.
    pub port: u16,
    /// Chat user allowed to run admin commands.
    pub owner_id: i64,
    /// Platform RPC endpoint override.
    pub api_base: String,
    /// Per-datacenter media endpoint template, with a `{dc}` placeholder.
    pub media_base: String,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let api_id = require("API_ID")?
            .parse::<i32>()
            .context("API_ID must be an integer")?;
        let api_hash = require("API_HASH")?;
        let main_bot_token = require("MAIN_BOT_TOKEN")?;
        let archive_channel = require("DUMP_CHANNEL")?
            .parse::<i64>()
            .context("DUMP_CHANNEL must be a channel ID")?;

        let port = match std::env::var("PORT") {
            Ok(v) => v.parse::<u16>().context("PORT must be a port number")?,
            Err(_) => DEFAULT_PORT,
        };

        let owner_id = match std::env::var("OWNER_ID") {
            Ok(v) => v.parse::<i64>().context("OWNER_ID must be a user ID")?,
            Err(_) => 0,
        };

        Ok(Self {
            api_id,
            api_hash,
            main_bot_token,
            worker_tokens: worker_tokens_from_env(),
            archive_channel,
            base_url: std::env::var("BASE_URL")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            port,
            owner_id,
            api_base: std::env::var("API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            media_base: std::env::var("MEDIA_BASE")
                .unwrap_or_else(|_| DEFAULT_MEDIA_BASE.to_string()),
        })
    }

    /// Media endpoint for one datacenter.
    pub fn media_endpoint(&self, dc_id: i32) -> String {
        self.media_base.replace("{dc}", &dc_id.to_string())
    }
}

fn require(name: &str) -> Result<String> {
    let value = std::env::var(name).with_context(|| format!("{name} is not set"))?;
    if value.trim().is_empty() {
        anyhow::bail!("{name} is empty");
    }
    Ok(value)
}

/// Worker tokens: `WORKER_BOTS` comma list first, `MULTI_TOKEN{n}` scan as
/// the fallback. The scan sorts by variable name so token order is stable.
fn worker_tokens_from_env() -> Vec<String> {
    let from_list: Vec<String> = std::env::var("WORKER_BOTS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if !from_list.is_empty() {
        return from_list;
    }

    let mut enumerated: Vec<(String, String)> = std::env::vars()
        .filter(|(k, _)| k.starts_with("MULTI_TOKEN"))
        .collect();
    enumerated.sort_by(|a, b| a.0.cmp(&b.0));
    enumerated
        .into_iter()
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            api_id: 1,
            api_hash: "h".into(),
            main_bot_token: "t".into(),
            worker_tokens: vec![],
            archive_channel: -1001234567890,
            base_url: String::new(),
            port: DEFAULT_PORT,
            owner_id: 0,
            api_base: DEFAULT_API_BASE.into(),
            media_base: DEFAULT_MEDIA_BASE.into(),
        }
    }

    #[test]
    fn media_endpoint_substitutes_dc() {
        assert_eq!(
            sample().media_endpoint(4),
            "https://dc4.media.gridgram.org"
        );
    }

    #[test]
    fn worker_bots_list_takes_precedence() {
        // Env manipulation is process-global; keep it inside a single test.
        unsafe {
            std::env::set_var("WORKER_BOTS", "tok1, tok2,,tok3");
            std::env::set_var("MULTI_TOKEN1", "ignored");
        }
        let tokens = worker_tokens_from_env();
        unsafe {
            std::env::remove_var("WORKER_BOTS");
            std::env::remove_var("MULTI_TOKEN1");
        }
        assert_eq!(tokens, vec!["tok1", "tok2", "tok3"]);
    }
}

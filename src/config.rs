//! Configuration loading from `.env` files.

use std::{env, path::Path, time::Duration};

use anyhow::{Context, Result};

use crate::live::StreamInfo;
use crate::relay::{ConnectOptions, DEFAULT_TIMEOUT};
use crate::subscription::QUERY_TIMEOUT;

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Operator secret (`nsec1...` or hex). Empty or placeholder disables publishing.
    pub nostr_nsec: String,
    /// Relays to publish to and query.
    pub relays: Vec<String>,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
    /// Per-relay budget for connect, write and acknowledgement.
    pub publish_timeout: Duration,
    /// Timeout for bounded queries.
    pub query_timeout: Duration,
    /// Stream metadata used by announce and update.
    pub stream: StreamInfo,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    ///
    /// A missing file is not an error; the process environment is used as is.
    /// Values containing spaces must be quoted, e.g. `STREAM_TITLE="Night shift"`.
    pub fn from_env(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path).context("reading env file")?;
        }
        let nostr_nsec = env::var("NOSTR_NSEC").unwrap_or_default().trim().to_string();
        let relays = csv_strings(env::var("NOSTR_RELAYS").unwrap_or_default());
        let tor_socks = non_empty("TOR_SOCKS");
        let publish_timeout = secs("PUBLISH_TIMEOUT_SECS", DEFAULT_TIMEOUT)?;
        let query_timeout = secs("QUERY_TIMEOUT_SECS", QUERY_TIMEOUT)?;
        let stream = StreamInfo {
            title: non_empty("STREAM_TITLE").unwrap_or_else(|| "Live stream".into()),
            summary: env::var("STREAM_SUMMARY").unwrap_or_default(),
            streaming_url: env::var("STREAM_URL").unwrap_or_default(),
            image: non_empty("STREAM_IMAGE"),
            recording_url: non_empty("STREAM_RECORDING_URL"),
            topics: csv_strings(env::var("STREAM_TAGS").unwrap_or_default()),
        };
        Ok(Self {
            nostr_nsec,
            relays,
            tor_socks,
            publish_timeout,
            query_timeout,
            stream,
        })
    }

    /// Connection options for publishing.
    pub fn publish_options(&self) -> ConnectOptions {
        ConnectOptions {
            timeout: self.publish_timeout,
            proxy: self.tor_socks.clone(),
        }
    }
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn secs(var: &str, default: Duration) -> Result<Duration> {
    match non_empty(var) {
        Some(v) => {
            let n: u64 = v.parse().with_context(|| format!("{var} must be a number of seconds"))?;
            Ok(Duration::from_secs(n))
        }
        None => Ok(default),
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}

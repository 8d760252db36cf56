//! Live chat (kind 1311) bound to one stream session.

use std::fmt;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::event::{Event, EventBuilder, Tag, KIND_LIVE_ACTIVITY, KIND_LIVE_CHAT};
use crate::filter::Filter;
use crate::subscription::{SubscribeOptions, Subscription, SubscriptionHandle};

/// Address of a live activity: `30311:<author hex>:<d>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamRef {
    pub author: String,
    pub d: String,
}

impl StreamRef {
    pub fn new(author: impl Into<String>, d: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            d: d.into(),
        }
    }

    /// Parse a `30311:<author>:<d>` coordinate.
    pub fn parse(coordinate: &str) -> Result<Self> {
        let mut parts = coordinate.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(author), Some(d))
                if kind == KIND_LIVE_ACTIVITY.to_string() && !author.is_empty() =>
            {
                Ok(Self::new(author, d))
            }
            _ => Err(Error::Encoding(format!(
                "not a live activity coordinate: {coordinate}"
            ))),
        }
    }

    pub fn coordinate(&self) -> String {
        format!("{KIND_LIVE_ACTIVITY}:{}:{}", self.author, self.d)
    }

    /// Whether `ev` is a chat message for this stream.
    pub fn matches(&self, ev: &Event) -> bool {
        ev.kind == KIND_LIVE_CHAT && ev.has_tag("a", &self.coordinate())
    }
}

impl fmt::Display for StreamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.coordinate())
    }
}

/// Filter selecting chat messages for `stream`.
pub fn chat_filter(stream: &StreamRef, since: Option<u64>) -> Filter {
    let filter = Filter::new()
        .kind(KIND_LIVE_CHAT)
        .tag("a", stream.coordinate());
    match since {
        Some(ts) => filter.since(ts),
        None => filter,
    }
}

/// Chat message for `stream`, optionally replying to another message.
pub fn message(stream: &StreamRef, content: &str, reply_to: Option<&str>) -> EventBuilder {
    let mut builder = EventBuilder::new(KIND_LIVE_CHAT)
        .tag(Tag::new("a", [stream.coordinate()]))
        .content(content);
    if let Some(id) = reply_to {
        builder = builder.tag(Tag::new("e", [id]));
    }
    builder
}

/// A received chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub author: String,
    pub created_at: u64,
    pub content: String,
    pub reply_to: Option<String>,
}

impl From<Event> for ChatMessage {
    fn from(ev: Event) -> Self {
        let reply_to = ev.tag_value("e").map(str::to_string);
        Self {
            id: ev.id,
            author: ev.pubkey,
            created_at: ev.created_at,
            content: ev.content,
            reply_to,
        }
    }
}

/// Long-lived chat subscription for one stream.
///
/// Stays open until closed; switching streams goes through
/// [`retarget`](Self::retarget), which hands back a new feed.
pub struct ChatFeed {
    stream: StreamRef,
    sub: Subscription,
}

impl ChatFeed {
    pub fn open(client: &Client, stream: StreamRef, since: Option<u64>) -> Self {
        let sub = client.subscribe(
            vec![chat_filter(&stream, since)],
            &[],
            SubscribeOptions::live(),
        );
        Self { stream, sub }
    }

    pub fn stream(&self) -> &StreamRef {
        &self.stream
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.sub.handle()
    }

    /// Next message for this stream, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<ChatMessage> {
        while let Some(ev) = self.sub.next().await {
            if self.stream.matches(&ev) {
                return Some(ev.into());
            }
        }
        None
    }

    pub fn close(&self) {
        self.sub.close();
    }

    /// Close this feed and open one for `stream`.
    pub fn retarget(self, client: &Client, stream: StreamRef, since: Option<u64>) -> Self {
        self.close();
        Self::open(client, stream, since)
    }
}

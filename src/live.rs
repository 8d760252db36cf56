//! NIP-53 live activity events and the stream lifecycle driver.
//!
//! The video pipeline reports state changes as [`StreamSignal`] messages;
//! [`Lifecycle`] turns each one into an announce, update or end event and
//! publishes it.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::chat::StreamRef;
use crate::client::{Client, Published};
use crate::error::Result;
use crate::event::{Event, EventBuilder, Tag, KIND_DELETION, KIND_LIVE_ACTIVITY};

pub const STATUS_LIVE: &str = "live";
pub const STATUS_ENDED: &str = "ended";

/// Operator-supplied metadata describing the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub title: String,
    pub summary: String,
    /// Public media URL (e.g. an HLS playlist).
    pub streaming_url: String,
    pub image: Option<String>,
    /// Set when recording is enabled.
    pub recording_url: Option<String>,
    /// Topic tags, emitted as `t` tags.
    pub topics: Vec<String>,
}

/// Announce a new session with `status=live`.
pub fn announce(d: &str, info: &StreamInfo, starts: u64) -> EventBuilder {
    activity(d, info, starts, STATUS_LIVE, None)
}

/// Replace the session's activity event with a new status.
pub fn update(d: &str, info: &StreamInfo, starts: u64, status: &str, ends: Option<u64>) -> EventBuilder {
    activity(d, info, starts, status, ends)
}

/// Mark the session ended at `ends`.
pub fn end(d: &str, info: &StreamInfo, starts: u64, ends: u64) -> EventBuilder {
    activity(d, info, starts, STATUS_ENDED, Some(ends))
}

fn activity(
    d: &str,
    info: &StreamInfo,
    starts: u64,
    status: &str,
    ends: Option<u64>,
) -> EventBuilder {
    let mut tags = vec![
        Tag::new("d", [d]),
        Tag::new("title", [info.title.as_str()]),
        Tag::new("summary", [info.summary.as_str()]),
        Tag::new("streaming", [info.streaming_url.as_str()]),
        Tag::new("starts", [starts.to_string()]),
        Tag::new("status", [status]),
    ];
    if let Some(ends) = ends {
        tags.push(Tag::new("ends", [ends.to_string()]));
    }
    if let Some(image) = &info.image {
        tags.push(Tag::new("image", [image.as_str()]));
    }
    if let Some(recording) = &info.recording_url {
        tags.push(Tag::new("recording", [recording.as_str()]));
    }
    tags.extend(info.topics.iter().map(|t| Tag::new("t", [t.as_str()])));
    EventBuilder::new(KIND_LIVE_ACTIVITY).tags(tags)
}

/// NIP-09 deletion request for `target_id` of kind `target_kind`.
///
/// `coordinate` additionally targets every version of a replaceable event.
pub fn deletion(
    target_id: &str,
    target_kind: u32,
    reason: &str,
    coordinate: Option<&str>,
) -> EventBuilder {
    let mut builder = EventBuilder::new(KIND_DELETION)
        .tag(Tag::new("e", [target_id]))
        .tag(Tag::new("k", [target_kind.to_string()]))
        .content(reason);
    if let Some(a) = coordinate {
        builder = builder.tag(Tag::new("a", [a]));
    }
    builder
}

/// Keep only the newest version of each live activity, newest first.
///
/// Versions are keyed by `(pubkey, d)`; on equal timestamps the lower id wins.
pub fn latest_activities(events: Vec<Event>) -> Vec<Event> {
    let mut latest: HashMap<(String, String), Event> = HashMap::new();
    for ev in events.into_iter().filter(|e| e.kind == KIND_LIVE_ACTIVITY) {
        let key = (ev.pubkey.clone(), ev.tag_value("d").unwrap_or_default().to_string());
        match latest.get(&key) {
            Some(cur)
                if cur.created_at > ev.created_at
                    || (cur.created_at == ev.created_at && cur.id <= ev.id) => {}
            _ => {
                latest.insert(key, ev);
            }
        }
    }
    let mut out: Vec<Event> = latest.into_values().collect();
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    out
}

/// State change reported by the video pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    /// Output started at the given Unix time.
    Started { at: u64 },
    /// Status changed without ending the session.
    Updated { status: String },
    /// Relay connectivity came back; re-publish the current state.
    Reconnected,
    /// Output stopped at the given Unix time.
    Stopped { at: u64 },
}

/// One broadcast session, identified by its `d` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    pub d: String,
    pub starts: u64,
    pub status: String,
    /// Id of the most recent activity event that was signed.
    pub last_event_id: Option<String>,
}

impl LiveSession {
    /// New session whose `d` tag is the start timestamp.
    pub fn new(starts: u64) -> Self {
        Self {
            d: starts.to_string(),
            starts,
            status: STATUS_LIVE.into(),
            last_event_id: None,
        }
    }

    /// Chat reference for this session under `author`.
    pub fn stream_ref(&self, author: &str) -> StreamRef {
        StreamRef::new(author, &self.d)
    }
}

/// Publishes activity events as [`StreamSignal`]s arrive.
pub struct Lifecycle {
    client: Client,
    info: StreamInfo,
    session: Option<LiveSession>,
}

impl Lifecycle {
    pub fn new(client: Client, info: StreamInfo) -> Self {
        Self {
            client,
            info,
            session: None,
        }
    }

    /// Current session, if the stream is up.
    pub fn session(&self) -> Option<&LiveSession> {
        self.session.as_ref()
    }

    /// Consume signals until every sender is dropped.
    ///
    /// Publish failures are logged and never stop the loop.
    pub async fn run(mut self, mut signals: mpsc::Receiver<StreamSignal>) -> Self {
        while let Some(signal) = signals.recv().await {
            if let Err(e) = self.handle(signal).await {
                warn!(error = %e, "status broadcast failed");
            }
        }
        self
    }

    /// Apply one signal. Returns the publish result, or `None` when the
    /// signal did not apply to the current state.
    pub async fn handle(&mut self, signal: StreamSignal) -> Result<Option<Published>> {
        match signal {
            StreamSignal::Started { at } => {
                if let Some(old) = self.session.take() {
                    warn!(d = %old.d, "stream started again without stopping; ending previous session");
                    let builder = end(&old.d, &self.info, old.starts, at);
                    if let Err(e) = self.publish(&old, builder).await {
                        warn!(d = %old.d, error = %e, "could not end previous session");
                    }
                }
                let mut session = LiveSession::new(at);
                if let Some(pk) = self.client.public_key() {
                    info!(d = %session.d, chat = %session.stream_ref(&pk).coordinate(), "session started");
                }
                let builder = announce(&session.d, &self.info, at);
                let result = self.publish(&session, builder).await;
                if let Ok(published) = &result {
                    session.last_event_id = published.event.as_ref().map(|e| e.id.clone());
                }
                self.session = Some(session);
                result.map(Some)
            }
            StreamSignal::Updated { status } => {
                let Some(mut session) = self.session.take() else {
                    warn!(%status, "status update without an active session");
                    return Ok(None);
                };
                session.status = status;
                let result = self.republish(&mut session).await;
                self.session = Some(session);
                result.map(Some)
            }
            StreamSignal::Reconnected => {
                let Some(mut session) = self.session.take() else {
                    return Ok(None);
                };
                let result = self.republish(&mut session).await;
                self.session = Some(session);
                result.map(Some)
            }
            StreamSignal::Stopped { at } => {
                let Some(session) = self.session.take() else {
                    warn!("stream stopped without an active session");
                    return Ok(None);
                };
                let builder = end(&session.d, &self.info, session.starts, at);
                self.publish(&session, builder).await.map(Some)
            }
        }
    }

    async fn republish(&self, session: &mut LiveSession) -> Result<Published> {
        let builder = update(&session.d, &self.info, session.starts, &session.status, None);
        let published = self.publish(session, builder).await?;
        if let Some(ev) = &published.event {
            session.last_event_id = Some(ev.id.clone());
        }
        Ok(published)
    }

    async fn publish(&self, session: &LiveSession, builder: EventBuilder) -> Result<Published> {
        let published = self.client.publish(builder).await?;
        let accepted = published.accepted().len();
        if published.event.is_some() && accepted == 0 {
            warn!(d = %session.d, "status broadcast degraded: no relay accepted");
        } else {
            info!(d = %session.d, accepted, "status broadcast");
        }
        Ok(published)
    }
}

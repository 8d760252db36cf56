//! Filtered, deduplicated read subscriptions across several relays.
//!
//! One task per relay sends `REQ` and forwards frames into a shared channel.
//! The consumer side ([`Subscription::next`]) re-validates every event,
//! drops duplicates, and ends on whichever comes first: an explicit close,
//! every relay finishing, or the timeout.

use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::filter::Filter;
use crate::message::{ClientMessage, RelayMessage};
use crate::relay::{ConnectOptions, RelayConnection};

const CHANNEL_CAPACITY: usize = 1024;

/// Timeout used by short interactive queries.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// How a subscription decides it is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Overall limit measured from when the subscription opens. `None` keeps
    /// it open until closed or until every relay has gone away.
    pub timeout: Option<Duration>,
    /// Treat `EOSE` as the end of that relay's stream.
    pub close_on_eose: bool,
}

impl SubscribeOptions {
    /// Stored events only, bounded by `timeout`.
    pub fn bounded(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            close_on_eose: true,
        }
    }

    /// Stored events followed by live ones until explicitly closed.
    pub fn live() -> Self {
        Self {
            timeout: None,
            close_on_eose: false,
        }
    }
}

/// Why a subscription stopped yielding events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// [`SubscriptionHandle::close`] was called.
    Closed,
    /// Every relay ended its stream.
    Done,
    /// The timeout elapsed first.
    TimedOut,
}

/// Cloneable handle that can close a subscription from any task.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    closed: Arc<watch::Sender<bool>>,
}

impl SubscriptionHandle {
    /// Idempotent; safe after the subscription already ended.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

enum PeerEvent {
    Event { relay: String, event: Box<Event> },
    Eose { relay: String },
    Ended { relay: String, error: Option<Error> },
}

/// Live view over one `REQ` sent to several relays.
pub struct Subscription {
    id: String,
    filters: Arc<Vec<Filter>>,
    rx: mpsc::Receiver<PeerEvent>,
    handle: SubscriptionHandle,
    closed_rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
    close_on_eose: bool,
    seen: HashSet<String>,
    pending: HashSet<String>,
    eose: HashSet<String>,
    errors: Vec<Error>,
    termination: Option<Termination>,
}

impl Subscription {
    /// Open the subscription on every relay in `relays`.
    pub fn open(
        relays: &[String],
        filters: Vec<Filter>,
        connect: &ConnectOptions,
        opts: SubscribeOptions,
    ) -> Self {
        let id = hex::encode(rand::random::<[u8; 8]>());
        let filters = Arc::new(filters);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (closed, closed_rx) = watch::channel(false);
        let closed = Arc::new(closed);

        let unique: HashSet<String> = relays.iter().cloned().collect();
        for relay in &unique {
            let peer = PeerTask {
                relay: relay.clone(),
                sub_id: id.clone(),
                filters: filters.clone(),
                connect: connect.clone(),
                tx: tx.clone(),
                closed: closed.subscribe(),
            };
            tokio::spawn(peer.run());
        }
        debug!(sub = %id, relays = unique.len(), "subscription opened");

        Self {
            id,
            filters,
            rx,
            handle: SubscriptionHandle { closed },
            closed_rx,
            deadline: opts.timeout.map(|t| Instant::now() + t),
            close_on_eose: opts.close_on_eose,
            seen: HashSet::new(),
            pending: unique,
            eose: HashSet::new(),
            errors: Vec::new(),
            termination: None,
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn close(&self) {
        self.handle.close();
    }

    /// Set once [`next`](Self::next) has returned `None`.
    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    /// Failures of individual relays seen so far.
    pub fn peer_errors(&self) -> &[Error] {
        &self.errors
    }

    /// Relays that have sent `EOSE`.
    pub fn eose_relays(&self) -> &HashSet<String> {
        &self.eose
    }

    /// Next new, valid event, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<Event> {
        if self.termination.is_some() {
            return None;
        }
        loop {
            let closed = *self.closed_rx.borrow();
            if closed {
                return self.finish(Termination::Closed);
            }
            if self.pending.is_empty() {
                return self.finish(Termination::Done);
            }
            let deadline = self.deadline;
            let expired = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = self.closed_rx.changed() => continue,
                _ = expired => return self.finish(Termination::TimedOut),
                msg = self.rx.recv() => match msg {
                    None => return self.finish(Termination::Done),
                    Some(PeerEvent::Event { relay, event }) => {
                        if let Some(ev) = self.admit(&relay, *event) {
                            return Some(ev);
                        }
                    }
                    Some(PeerEvent::Eose { relay }) => {
                        debug!(sub = %self.id, relay = %relay, "end of stored events");
                        if self.close_on_eose {
                            self.pending.remove(&relay);
                        }
                        self.eose.insert(relay);
                    }
                    Some(PeerEvent::Ended { relay, error }) => {
                        self.pending.remove(&relay);
                        if let Some(e) = error {
                            warn!(sub = %self.id, error = %e, "relay stream ended");
                            self.errors.push(e);
                        }
                    }
                },
            }
        }
    }

    /// Drain the subscription until it terminates.
    pub async fn collect(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(ev) = self.next().await {
            events.push(ev);
        }
        events
    }

    /// Verify, re-check against the filters, and deduplicate.
    ///
    /// Relays may ignore tag constraints, so the filters are applied again here.
    fn admit(&mut self, relay: &str, ev: Event) -> Option<Event> {
        if self.seen.contains(&ev.id) {
            return None;
        }
        if let Err(e) = ev.verify() {
            debug!(relay, error = %e, "dropping unverifiable event");
            return None;
        }
        if !self.filters.iter().any(|f| f.matches(&ev)) {
            debug!(relay, id = %ev.id, "dropping event outside the filter");
            return None;
        }
        self.seen.insert(ev.id.clone());
        Some(ev)
    }

    fn finish(&mut self, reason: Termination) -> Option<Event> {
        debug!(sub = %self.id, ?reason, "subscription finished");
        self.termination = Some(reason);
        self.handle.close();
        None
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.close();
    }
}

struct PeerTask {
    relay: String,
    sub_id: String,
    filters: Arc<Vec<Filter>>,
    connect: ConnectOptions,
    tx: mpsc::Sender<PeerEvent>,
    closed: watch::Receiver<bool>,
}

impl PeerTask {
    async fn run(mut self) {
        let error = self.stream().await.err();
        let _ = self
            .tx
            .send(PeerEvent::Ended {
                relay: self.relay.clone(),
                error,
            })
            .await;
    }

    async fn stream(&mut self) -> Result<()> {
        let mut conn = tokio::select! {
            conn = RelayConnection::connect(&self.relay, &self.connect) => conn?,
            _ = self.closed.changed() => return Ok(()),
        };
        let req = ClientMessage::Req {
            subscription_id: &self.sub_id,
            filters: &self.filters,
        };
        let result = match conn.send(&req).await {
            Ok(()) => self.pump(&mut conn).await,
            Err(e) => Err(e),
        };
        if self.is_closed() {
            let _ = conn.send(&ClientMessage::Close(&self.sub_id)).await;
        }
        conn.close().await;
        result
    }

    async fn pump(&mut self, conn: &mut RelayConnection) -> Result<()> {
        loop {
            let frame = tokio::select! {
                _ = self.closed.changed() => return Ok(()),
                frame = conn.recv() => frame,
            };
            let item = match frame {
                Ok(Some(RelayMessage::Event {
                    subscription_id,
                    event,
                })) if subscription_id == self.sub_id => PeerEvent::Event {
                    relay: self.relay.clone(),
                    event,
                },
                Ok(Some(RelayMessage::Eose { subscription_id })) if subscription_id == self.sub_id => {
                    PeerEvent::Eose {
                        relay: self.relay.clone(),
                    }
                }
                Ok(Some(RelayMessage::Closed {
                    subscription_id,
                    message,
                })) if subscription_id == self.sub_id => {
                    return Err(Error::peer(
                        &self.relay,
                        format!("subscription closed by relay: {message}"),
                    ));
                }
                Ok(Some(RelayMessage::Notice { message })) => {
                    debug!(relay = %self.relay, notice = %message, "notice");
                    continue;
                }
                Ok(Some(_)) => continue,
                Ok(None) => return Err(Error::peer(&self.relay, "connection closed")),
                Err(e @ Error::Protocol { .. }) => {
                    debug!(error = %e, "dropping malformed frame");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !self.forward(item).await {
                return Ok(());
            }
        }
    }

    /// Hand one item to the consumer; `false` once the subscription is closed.
    async fn forward(&mut self, item: PeerEvent) -> bool {
        tokio::select! {
            sent = self.tx.send(item) => sent.is_ok(),
            _ = self.closed.changed() => false,
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

//! Entry point tying key material, the broadcaster and subscriptions together.

use std::time::Duration;

use tracing::{info, warn};

use crate::broadcast::{accepted_relays, broadcast, PublishOutcome};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::event::{Event, EventBuilder};
use crate::filter::Filter;
use crate::keys::{is_placeholder, Keys};
use crate::relay::ConnectOptions;
use crate::subscription::{SubscribeOptions, Subscription, QUERY_TIMEOUT};

/// Signs and publishes events for one operator, and queries the configured relays.
///
/// When no usable secret is configured the client runs disabled: publishing
/// returns an empty outcome set without touching the network. Reads work
/// either way.
#[derive(Debug, Clone)]
pub struct Client {
    keys: Option<Keys>,
    relays: Vec<String>,
    publish: ConnectOptions,
    query_timeout: Duration,
}

/// Outcome of [`Client::publish`].
#[derive(Debug, Clone)]
pub struct Published {
    /// The signed event, `None` when the client is disabled.
    pub event: Option<Event>,
    /// One entry per relay attempted.
    pub outcomes: Vec<PublishOutcome>,
}

impl Published {
    /// Relays that accepted the event.
    pub fn accepted(&self) -> Vec<String> {
        accepted_relays(&self.outcomes)
    }

    /// Fail with [`Error::NoRelayAccepted`] unless at least one relay accepted.
    pub fn require_accepted(self) -> Result<Self> {
        if self.outcomes.iter().any(|o| o.accepted) {
            Ok(self)
        } else {
            Err(Error::NoRelayAccepted)
        }
    }
}

impl Client {
    /// Build a client from a secret (`nsec1...`, hex, or empty) and relay set.
    ///
    /// A placeholder secret yields a disabled client; a malformed one is an error.
    pub fn new(
        secret: &str,
        relays: Vec<String>,
        publish: ConnectOptions,
        query_timeout: Duration,
    ) -> Result<Self> {
        let keys = if is_placeholder(secret) {
            warn!("no signing key configured; publishing is disabled");
            None
        } else {
            Some(Keys::parse(secret)?)
        };
        Ok(Self {
            keys,
            relays,
            publish,
            query_timeout,
        })
    }

    pub fn from_settings(cfg: &Settings) -> Result<Self> {
        Self::new(
            &cfg.nostr_nsec,
            cfg.relays.clone(),
            cfg.publish_options(),
            cfg.query_timeout,
        )
    }

    /// Client with a known key pair, mostly for embedding and tests.
    pub fn with_keys(keys: Keys, relays: Vec<String>, publish: ConnectOptions) -> Self {
        Self {
            keys: Some(keys),
            relays,
            publish,
            query_timeout: QUERY_TIMEOUT,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.keys.is_some()
    }

    /// Operator public key as hex, when enabled.
    pub fn public_key(&self) -> Option<String> {
        self.keys.as_ref().map(Keys::public_key_hex)
    }

    /// Operator public key as `npub1...`, when enabled.
    pub fn npub(&self) -> Option<String> {
        self.keys.as_ref().map(Keys::to_npub)
    }

    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    /// Sign without publishing.
    pub fn sign(&self, builder: EventBuilder) -> Result<Event> {
        match &self.keys {
            Some(keys) => keys.sign(builder),
            None => Err(Error::Configuration(
                "publishing disabled: no signing key configured".into(),
            )),
        }
    }

    /// Send an already signed event to every configured relay.
    pub async fn broadcast(&self, event: &Event) -> Vec<PublishOutcome> {
        if !self.is_enabled() {
            info!(id = %event.id, "publishing disabled; skipping broadcast");
            return vec![];
        }
        broadcast(&self.relays, event, &self.publish).await
    }

    /// Sign `builder` and broadcast the result.
    pub async fn publish(&self, builder: EventBuilder) -> Result<Published> {
        if !self.is_enabled() {
            info!(kind = builder.kind(), "publishing disabled; event not sent");
            return Ok(Published {
                event: None,
                outcomes: vec![],
            });
        }
        let event = self.sign(builder)?;
        let outcomes = self.broadcast(&event).await;
        if !outcomes.iter().any(|o| o.accepted) {
            warn!(id = %event.id, kind = event.kind, "no relay accepted the event");
        }
        Ok(Published {
            event: Some(event),
            outcomes,
        })
    }

    /// Open a subscription. Empty `relays` means every configured relay.
    pub fn subscribe(
        &self,
        filters: Vec<Filter>,
        relays: &[String],
        opts: SubscribeOptions,
    ) -> Subscription {
        let targets = if relays.is_empty() {
            &self.relays[..]
        } else {
            relays
        };
        Subscription::open(targets, filters, &self.query_options(), opts)
    }

    /// Stored events matching `filters`, deduplicated and newest first.
    ///
    /// Ends once every relay sent `EOSE` or `timeout` (default: the query
    /// timeout) elapsed.
    pub async fn fetch(
        &self,
        filters: Vec<Filter>,
        relays: &[String],
        timeout: Option<Duration>,
    ) -> Vec<Event> {
        let opts = SubscribeOptions::bounded(timeout.unwrap_or(self.query_timeout));
        let mut events = self.subscribe(filters, relays, opts).collect().await;
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        events
    }

    /// First event with the given id from any configured relay.
    pub async fn fetch_event(&self, id: &str) -> Option<Event> {
        let filter = Filter::new().id(id).limit(1);
        let mut sub = self.subscribe(
            vec![filter],
            &[],
            SubscribeOptions::bounded(self.query_timeout),
        );
        let found = sub.next().await;
        sub.close();
        found
    }

    fn query_options(&self) -> ConnectOptions {
        ConnectOptions {
            timeout: self.query_timeout,
            proxy: self.publish.proxy.clone(),
        }
    }
}

//! Concurrent publish of one signed event to every configured relay.

use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::message::{ClientMessage, RelayMessage};
use crate::relay::{ConnectOptions, RelayConnection};

/// Result of one publish attempt against one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Relay URL.
    pub relay: String,
    /// `true` only for `["OK", <id>, true, ...]`.
    pub accepted: bool,
    /// Relay message, or the local failure when no acknowledgement arrived.
    pub message: Option<String>,
}

/// URLs of the relays that accepted.
pub fn accepted_relays(outcomes: &[PublishOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .filter(|o| o.accepted)
        .map(|o| o.relay.clone())
        .collect()
}

/// Publish `event` to all `relays` concurrently, one task per relay.
///
/// Returns one outcome per relay, in the order given. Failures against one
/// relay never affect the others and are never returned as errors; each relay
/// is bounded by `opts.timeout` for connect, write, and acknowledgement.
pub async fn broadcast(
    relays: &[String],
    event: &Event,
    opts: &ConnectOptions,
) -> Vec<PublishOutcome> {
    if relays.is_empty() {
        warn!(id = %event.id, "no relays configured; event not published");
        return vec![];
    }
    let handles: Vec<_> = relays
        .iter()
        .map(|relay| {
            let relay = relay.clone();
            let event = event.clone();
            let opts = opts.clone();
            tokio::spawn(async move { publish_to(relay, event, opts).await })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(relays.len());
    for (relay, handle) in relays.iter().zip(handles) {
        let outcome = handle.await.unwrap_or_else(|e| PublishOutcome {
            relay: relay.clone(),
            accepted: false,
            message: Some(format!("publish task failed: {e}")),
        });
        outcomes.push(outcome);
    }
    let accepted = outcomes.iter().filter(|o| o.accepted).count();
    info!(
        id = %event.id,
        kind = event.kind,
        accepted,
        total = outcomes.len(),
        "broadcast finished"
    );
    outcomes
}

async fn publish_to(relay: String, event: Event, opts: ConnectOptions) -> PublishOutcome {
    match send_event(&relay, &event, &opts).await {
        Ok((accepted, message)) => {
            debug!(relay = %relay, accepted, message = %message, "acknowledged");
            PublishOutcome {
                relay,
                accepted,
                message: (!message.is_empty()).then_some(message),
            }
        }
        Err(e) => {
            debug!(relay = %relay, error = %e, "publish failed");
            PublishOutcome {
                relay,
                accepted: false,
                message: Some(e.to_string()),
            }
        }
    }
}

async fn send_event(relay: &str, event: &Event, opts: &ConnectOptions) -> Result<(bool, String)> {
    let mut conn = RelayConnection::connect(relay, opts).await?;
    let result = match conn.send(&ClientMessage::Event(event)).await {
        Ok(()) => await_ack(&mut conn, &event.id, opts.timeout).await,
        Err(e) => Err(e),
    };
    conn.close().await;
    result
}

/// Wait for the `OK` frame answering `event_id`.
///
/// `NOTICE` and other well-formed frames are skipped; a malformed frame ends
/// the wait as a non-acceptance.
async fn await_ack(
    conn: &mut RelayConnection,
    event_id: &str,
    budget: Duration,
) -> Result<(bool, String)> {
    let deadline = Instant::now() + budget;
    loop {
        let frame = timeout(deadline.saturating_duration_since(Instant::now()), conn.recv())
            .await
            .map_err(|_| Error::peer(conn.url(), "no acknowledgement before timeout"))??;
        match frame {
            Some(RelayMessage::Ok {
                event_id: acked,
                accepted,
                message,
            }) => {
                if acked != event_id {
                    return Ok((false, format!("acknowledged a different event: {acked}")));
                }
                return Ok((accepted, message));
            }
            Some(RelayMessage::Notice { message }) => {
                debug!(relay = %conn.url(), notice = %message, "notice while publishing");
            }
            Some(_) => {}
            None => {
                return Err(Error::peer(
                    conn.url(),
                    "connection closed before acknowledgement",
                ))
            }
        }
    }
}

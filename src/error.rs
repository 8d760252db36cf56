//! Error types for the protocol engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by key handling, signing, and relay communication.
///
/// Peer and protocol failures are scoped to a single relay. Multi-relay
/// operations absorb them into per-relay outcomes instead of returning them.
#[derive(Debug, Error)]
pub enum Error {
    /// Key material is missing or still set to a placeholder.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed secret encoding, hex field, or canonical serialization.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The signature operation itself failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Connect, write, read, or timeout failure against one relay.
    #[error("relay {relay}: {reason}")]
    Peer {
        /// Relay URL the failure belongs to.
        relay: String,
        /// Human readable cause.
        reason: String,
    },

    /// An event failed id or signature verification.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// A relay sent a frame that does not have the expected shape.
    #[error("protocol error from {relay}: {reason}")]
    Protocol {
        /// Relay URL the frame came from.
        relay: String,
        /// What was wrong with the frame.
        reason: String,
    },

    /// No relay accepted a publish that required at least one acceptance.
    #[error("no relays accepted the event")]
    NoRelayAccepted,
}

impl Error {
    pub(crate) fn peer(relay: &str, reason: impl ToString) -> Self {
        Self::Peer {
            relay: relay.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn protocol(relay: &str, reason: impl ToString) -> Self {
        Self::Protocol {
            relay: relay.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Encoding(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Self::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_error_names_relay() {
        let err = Error::peer("wss://relay.example", "connection refused");
        assert_eq!(
            err.to_string(),
            "relay wss://relay.example: connection refused"
        );
    }

    #[test]
    fn protocol_error_display() {
        let err = Error::protocol("ws://r", "not an array");
        assert_eq!(err.to_string(), "protocol error from ws://r: not an array");
    }

    #[test]
    fn no_relay_accepted_display() {
        assert_eq!(
            Error::NoRelayAccepted.to_string(),
            "no relays accepted the event"
        );
    }

    #[test]
    fn json_errors_map_to_encoding() {
        let err: Error = serde_json::from_str::<u32>("x").unwrap_err().into();
        assert!(matches!(err, Error::Encoding(_)));
    }
}

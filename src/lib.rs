//! Nostr protocol engine for a personal live-video node.
//!
//! Builds and signs NIP-01 events, broadcasts them to a set of relays, and
//! runs deduplicated read subscriptions such as the NIP-53 live chat feed.

pub mod broadcast;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod keys;
pub mod live;
pub mod message;
pub mod relay;
pub mod subscription;

#[cfg(test)]
mod testutil;

pub use client::{Client, Published};
pub use error::{Error, Result};
pub use event::{Event, EventBuilder, Tag};
pub use keys::Keys;

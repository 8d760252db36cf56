//! Nostr event model and canonical identity.

use std::time::{SystemTime, UNIX_EPOCH};

use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Deletion request (NIP-09).
pub const KIND_DELETION: u32 = 5;
/// Live chat message attached to a live activity (NIP-53).
pub const KIND_LIVE_CHAT: u32 = 1311;
/// Parameterized replaceable live activity (NIP-53).
pub const KIND_LIVE_ACTIVITY: u32 = 30311;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. The ones this node produces and reads:
///
/// - `d` – unique identifier for replaceable events
/// - `a` – coordinate of a replaceable event (`kind:pubkey:d`)
/// - `e` – links to another event ID
/// - `k` – kind of a referenced event
/// - `t` – free-form topic or hashtag
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from its name and positional values.
    pub fn new<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields = vec![name.to_string()];
        fields.extend(values.into_iter().map(Into::into));
        Tag(fields)
    }

    /// Tag name, e.g. `d` or `title`.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// First positional value.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// Signed Nostr event as it travels on the wire.
///
/// ```json
/// {
///   "id": "aa11...",
///   "pubkey": "1b84...",
///   "created_at": 1700000000,
///   "kind": 30311,
///   "tags": [["d", "1700000000"], ["status", "live"]],
///   "content": "",
///   "sig": "deadbeef..."
/// }
/// ```
///
/// Values of this type are produced by [`crate::keys::Keys::sign`] or decoded
/// from relays; the latter should be checked with [`Event::verify`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex, x-only).
    pub pubkey: String,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Kind number, e.g. `1311` or `30311`.
    pub kind: u32,
    /// Ordered tag rows.
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// Value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name() == Some(name))
            .and_then(Tag::value)
    }

    /// Whether any tag named `name` carries `value` as its first value.
    pub fn has_tag(&self, name: &str, value: &str) -> bool {
        self.tags
            .iter()
            .any(|t| t.name() == Some(name) && t.value() == Some(value))
    }

    /// Recompute the event hash from its fields.
    pub fn compute_id(&self) -> Result<[u8; 32]> {
        event_hash(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)
    }

    /// Verify the event ID and Schnorr signature.
    pub fn verify(&self) -> Result<()> {
        let hash = self.compute_id()?;
        if hex::encode(hash) != self.id {
            return Err(Error::InvalidEvent(format!("id mismatch for {}", self.id)));
        }
        let sig = Signature::from_slice(&hex::decode(&self.sig)?)
            .map_err(|e| Error::InvalidEvent(e.to_string()))?;
        let pk = XOnlyPublicKey::from_slice(&hex::decode(&self.pubkey)?)
            .map_err(|e| Error::InvalidEvent(e.to_string()))?;
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest(hash);
        secp.verify_schnorr(&sig, &msg, &pk)
            .map_err(|e| Error::InvalidEvent(e.to_string()))
    }
}

/// Canonical serialization `[0, pubkey, created_at, kind, tags, content]`.
///
/// Serialized from a tuple rather than [`Event`] so field order is fixed.
/// `serde_json` emits no whitespace and leaves `<`, `>` and `&` unescaped.
pub fn canonical_bytes(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&(0u8, pubkey, created_at, kind, tags, content))?)
}

/// SHA-256 of the canonical serialization.
pub fn event_hash(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32]> {
    let data = canonical_bytes(pubkey, created_at, kind, tags, content)?;
    Ok(Sha256::digest(&data).into())
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Unsigned event under construction.
///
/// There is no author or id yet; both are bound when the builder is passed to
/// [`crate::keys::Keys::sign`], so an unsigned event can never be broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBuilder {
    pub(crate) kind: u32,
    pub(crate) created_at: u64,
    pub(crate) tags: Vec<Tag>,
    pub(crate) content: String,
}

impl EventBuilder {
    /// Start an event of `kind` stamped with the current time.
    pub fn new(kind: u32) -> Self {
        Self {
            kind,
            created_at: unix_now(),
            tags: Vec::new(),
            content: String::new(),
        }
    }

    /// Override the creation timestamp.
    pub fn created_at(mut self, ts: u64) -> Self {
        self.created_at = ts;
        self
    }

    /// Set the content.
    pub fn content<S: Into<String>>(mut self, content: S) -> Self {
        self.content = content.into();
        self
    }

    /// Append a tag row.
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Append several tag rows, keeping their order.
    pub fn tags<I: IntoIterator<Item = Tag>>(mut self, tags: I) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn tag_list(&self) -> &[Tag] {
        &self.tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PK: &str = "1b84c5567b126440995d3ed5aaba0565d71e1834604819ff9c17f5e9d5dd078f";

    #[test]
    fn canonical_bytes_match_reference() {
        let tags = vec![Tag::new(
            "a",
            [format!("30311:{PK}:123456"), String::new(), "root".into()],
        )];
        let bytes = canonical_bytes(
            PK,
            1700000000,
            KIND_LIVE_CHAT,
            &tags,
            "hello <world> & \"friends\"\n",
        )
        .unwrap();
        let expected = format!(
            "[0,\"{PK}\",1700000000,1311,[[\"a\",\"30311:{PK}:123456\",\"\",\"root\"]],\"hello <world> & \\\"friends\\\"\\n\"]"
        );
        assert_eq!(String::from_utf8(bytes).unwrap(), expected);
    }

    #[test]
    fn event_hash_matches_reference() {
        let tags = vec![Tag::new(
            "a",
            [format!("30311:{PK}:123456"), String::new(), "root".into()],
        )];
        let hash = event_hash(
            PK,
            1700000000,
            KIND_LIVE_CHAT,
            &tags,
            "hello <world> & \"friends\"\n",
        )
        .unwrap();
        assert_eq!(
            hex::encode(hash),
            "260b465a752cadb8873616e8a1593406755172d6d9059c2f931068964fed9411"
        );
    }

    #[test]
    fn event_hash_empty_body() {
        let hash = event_hash(&"00".repeat(32), 1, 1, &[], "").unwrap();
        assert_eq!(
            hex::encode(hash),
            "07b8887fbb7916456d02c4ad592a1e46766848a2bfafd19177e09a5466fdaecd"
        );
    }

    #[test]
    fn event_hash_keeps_non_ascii_verbatim() {
        let tags = vec![Tag::new("t", ["café"])];
        let bytes = canonical_bytes(PK, 1700000000, 1, &tags, "ünïcode ✓").unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("\"ünïcode ✓\""));
        let hash = event_hash(PK, 1700000000, 1, &tags, "ünïcode ✓").unwrap();
        assert_eq!(
            hex::encode(hash),
            "5dbd91a497d9aaa6ef3817ccf9cf994fadfe8b4cd4eeeca67eb90fcdf6cd6302"
        );
    }

    #[test]
    fn event_hash_is_deterministic() {
        let tags = vec![Tag::new("d", ["x"]), Tag::new("t", ["a", "b"])];
        let a = event_hash(PK, 5, KIND_LIVE_ACTIVITY, &tags, "c").unwrap();
        let b = event_hash(PK, 5, KIND_LIVE_ACTIVITY, &tags, "c").unwrap();
        assert_eq!(a, b);
        let reordered = vec![Tag::new("t", ["a", "b"]), Tag::new("d", ["x"])];
        let c = event_hash(PK, 5, KIND_LIVE_ACTIVITY, &reordered, "c").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn tag_lookup_takes_first_match() {
        let ev = Event {
            id: String::new(),
            pubkey: PK.into(),
            created_at: 1,
            kind: KIND_LIVE_ACTIVITY,
            tags: vec![
                Tag::new("t", ["music"]),
                Tag::new("status", ["live"]),
                Tag::new("status", ["ended"]),
            ],
            content: String::new(),
            sig: String::new(),
        };
        assert_eq!(ev.tag_value("status"), Some("live"));
        assert_eq!(ev.tag_value("title"), None);
        assert!(ev.has_tag("t", "music"));
        assert!(!ev.has_tag("t", "art"));
    }

    #[test]
    fn event_json_uses_wire_field_names() {
        let ev = Event {
            id: "aa".into(),
            pubkey: "bb".into(),
            created_at: 7,
            kind: 1311,
            tags: vec![Tag::new("a", ["x"])],
            content: "hi".into(),
            sig: "cc".into(),
        };
        let val = serde_json::to_value(&ev).unwrap();
        assert_eq!(val["tags"], serde_json::json!([["a", "x"]]));
        assert_eq!(val["created_at"], 7);
        let back: Event = serde_json::from_value(val).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn verify_rejects_garbage() {
        let ev = Event {
            id: "00".repeat(32),
            pubkey: PK.into(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: "00".repeat(64),
        };
        assert!(matches!(ev.verify(), Err(Error::InvalidEvent(_))));
    }

    #[test]
    fn builder_keeps_tag_order() {
        let b = EventBuilder::new(KIND_LIVE_ACTIVITY)
            .created_at(42)
            .tag(Tag::new("d", ["1"]))
            .tags([Tag::new("title", ["T"]), Tag::new("status", ["live"])])
            .content("x");
        assert_eq!(b.created_at, 42);
        assert_eq!(b.kind(), KIND_LIVE_ACTIVITY);
        let names: Vec<_> = b.tag_list().iter().filter_map(Tag::name).collect();
        assert_eq!(names, vec!["d", "title", "status"]);
    }
}

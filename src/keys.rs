//! Operator key material and event signing.

use std::fmt;

use bech32::primitives::decode::CheckedHrpstring;
use bech32::{Bech32, Hrp};
use secp256k1::{All, Keypair, Message, Secp256k1, XOnlyPublicKey};

use crate::error::{Error, Result};
use crate::event::{event_hash, Event, EventBuilder};

const NSEC_HRP: Hrp = Hrp::parse_unchecked("nsec");
const NPUB_HRP: Hrp = Hrp::parse_unchecked("npub");

/// Values shipped in sample configuration files that mean "not configured".
const PLACEHOLDER_SECRETS: &[&str] = &[
    "nsec1...",
    "nsec1xxx",
    "nsec1placeholder",
    "your-nsec-here",
    "your_nsec_here",
    "<nsec>",
    "changeme",
];

/// Whether `secret` is empty or one of the well-known placeholders.
pub fn is_placeholder(secret: &str) -> bool {
    let s = secret.trim();
    s.is_empty()
        || PLACEHOLDER_SECRETS
            .iter()
            .any(|p| s.eq_ignore_ascii_case(p))
}

/// Operator keypair. The secret never leaves this type.
#[derive(Clone)]
pub struct Keys {
    secp: Secp256k1<All>,
    keypair: Keypair,
    public: XOnlyPublicKey,
}

impl Keys {
    /// Parse a secret given as `nsec1...` or as 64 hex characters.
    pub fn parse(secret: &str) -> Result<Self> {
        let s = secret.trim();
        if is_placeholder(s) {
            return Err(Error::Configuration("secret key is not configured".into()));
        }
        if s.get(..5).map_or(false, |p| p.eq_ignore_ascii_case("nsec1")) {
            return Self::from_nsec(s);
        }
        if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            let mut bytes = [0u8; 32];
            hex::decode_to_slice(s, &mut bytes)?;
            return Self::from_secret_bytes(&bytes);
        }
        Err(Error::Encoding(
            "secret key must be an nsec1 string or 64 hex characters".into(),
        ))
    }

    /// Decode a bech32 `nsec` string. The checksum is always verified.
    pub fn from_nsec(nsec: &str) -> Result<Self> {
        let bytes = decode_nsec(nsec)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Build keys from raw secret bytes.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self> {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_seckey_slice(&secp, secret)
            .map_err(|e| Error::Encoding(format!("invalid secret key: {e}")))?;
        let (public, _) = keypair.x_only_public_key();
        Ok(Self {
            secp,
            keypair,
            public,
        })
    }

    /// Lowercase hex of the public key, as used in `pubkey` fields.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public.serialize())
    }

    /// Bech32 `npub` rendering of the public key.
    pub fn to_npub(&self) -> String {
        bech32::encode::<Bech32>(NPUB_HRP, &self.public.serialize()).unwrap_or_default()
    }

    /// Bind the author, compute the id, and attach a BIP-340 signature.
    ///
    /// No auxiliary randomness is mixed in, so the same builder and key always
    /// produce the same signature. The signature is checked before it is
    /// attached.
    pub fn sign(&self, builder: EventBuilder) -> Result<Event> {
        let pubkey = self.public_key_hex();
        let hash = event_hash(
            &pubkey,
            builder.created_at,
            builder.kind,
            &builder.tags,
            &builder.content,
        )?;
        let msg = Message::from_digest(hash);
        let sig = self.secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
        self.secp
            .verify_schnorr(&sig, &msg, &self.public)
            .map_err(|e| Error::Signing(e.to_string()))?;
        Ok(Event {
            id: hex::encode(hash),
            pubkey,
            created_at: builder.created_at,
            kind: builder.kind,
            tags: builder.tags,
            content: builder.content,
            sig: hex::encode(sig.as_ref()),
        })
    }
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keys")
            .field("public", &self.public_key_hex())
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Decode an `nsec` string into 32 secret bytes.
pub fn decode_nsec(nsec: &str) -> Result<[u8; 32]> {
    decode_32(nsec, NSEC_HRP)
}

/// Decode an `npub` string into lowercase hex.
pub fn npub_to_hex(npub: &str) -> Result<String> {
    decode_32(npub, NPUB_HRP).map(hex::encode)
}

/// Encode a hex public key as `npub`.
pub fn hex_to_npub(pubkey: &str) -> Result<String> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(pubkey, &mut bytes)?;
    bech32::encode::<Bech32>(NPUB_HRP, &bytes).map_err(|e| Error::Encoding(e.to_string()))
}

/// NIP-19 keys use the original bech32 checksum; bech32m strings are refused.
fn decode_32(s: &str, expected: Hrp) -> Result<[u8; 32]> {
    let checked = CheckedHrpstring::new::<Bech32>(s.trim())
        .map_err(|e| Error::Encoding(format!("invalid bech32: {e}")))?;
    let hrp = checked.hrp();
    if hrp != expected {
        return Err(Error::Encoding(format!(
            "expected {} prefix, got {}",
            expected.as_str(),
            hrp.as_str()
        )));
    }
    let data: Vec<u8> = checked.byte_iter().collect();
    if data.len() != 32 {
        return Err(Error::Encoding(format!(
            "decoded key is {} bytes, expected 32",
            data.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&data);
    Ok(out)
}

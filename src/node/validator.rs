//! Record validation for values stored in the DHT.
//!
//! Keys are namespaced: `/<namespace>/<rest>`. Each namespace has its own
//! [Validator]; keys in an unknown namespace are rejected.

use std::collections::HashMap;
use std::fmt::Debug;

use libp2p::{identity::PublicKey, PeerId};

use crate::{Error, Result};

/// Checks whether a value may be stored under a key.
pub trait Validator: Debug + Send + Sync {
    /// `rest` is the key with its `/<namespace>/` prefix stripped.
    fn validate(&self, rest: &[u8], value: &[u8]) -> Result<()>;
}

#[derive(Debug)]
/// Accepts every value.
pub struct BlankValidator;

impl Validator for BlankValidator {
    fn validate(&self, _rest: &[u8], _value: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
/// `/pk/<peer-id>` records must hold the protobuf encoded public key of
/// that peer.
pub struct PublicKeyValidator;

impl Validator for PublicKeyValidator {
    fn validate(&self, rest: &[u8], value: &[u8]) -> Result<()> {
        let peer_id = std::str::from_utf8(rest)
            .ok()
            .and_then(|rest| rest.parse::<PeerId>().ok())
            .ok_or_else(|| Error::validation("public key record key is not a peer id"))?;

        let public_key = PublicKey::try_decode_protobuf(value)
            .map_err(|error| Error::validation(format!("invalid public key: {error}")))?;

        if public_key.to_peer_id() != peer_id {
            return Err(Error::validation("public key does not match peer id"));
        }

        Ok(())
    }
}

#[derive(Debug)]
/// Dispatches to a [Validator] by key namespace.
pub struct NamespacedValidator {
    namespaces: HashMap<String, Box<dyn Validator>>,
}

impl Default for NamespacedValidator {
    /// `pk` → [PublicKeyValidator], `v` → [BlankValidator].
    fn default() -> Self {
        Self::new()
            .with_namespace("pk", PublicKeyValidator)
            .with_namespace("v", BlankValidator)
    }
}

impl NamespacedValidator {
    /// An empty validator, rejecting everything.
    pub fn new() -> Self {
        Self {
            namespaces: HashMap::new(),
        }
    }

    pub fn with_namespace(mut self, namespace: &str, validator: impl Validator + 'static) -> Self {
        self.namespaces
            .insert(namespace.to_string(), Box::new(validator));
        self
    }

    pub fn validate(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let (namespace, rest) = split_key(key)?;

        let validator = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| Error::validation(format!("invalid record keytype: {namespace}")))?;

        validator.validate(rest, value)
    }
}

/// Split `/<namespace>/<rest>`, both parts non-empty.
fn split_key(key: &[u8]) -> Result<(&str, &[u8])> {
    let invalid = || Error::validation("record key must have the form /<namespace>/<key>");

    let key = key.strip_prefix(b"/").ok_or_else(invalid)?;
    let slash = key.iter().position(|b| *b == b'/').ok_or_else(invalid)?;

    let (namespace, rest) = (&key[..slash], &key[slash + 1..]);
    if namespace.is_empty() || rest.is_empty() {
        return Err(invalid());
    }

    let namespace = std::str::from_utf8(namespace).map_err(|_| invalid())?;

    Ok((namespace, rest))
}

#[cfg(test)]
mod test {
    use libp2p::identity::Keypair;

    use super::*;

    #[test]
    fn blank_namespace_accepts_anything() {
        let validator = NamespacedValidator::default();

        assert!(validator.validate(b"/v/foo", b"bar").is_ok());
        assert!(validator.validate(b"/v/foo/bar", b"").is_ok());
    }

    #[test]
    fn unknown_or_missing_namespace() {
        let validator = NamespacedValidator::default();

        assert!(validator.validate(b"foo", b"bar").is_err());
        assert!(validator.validate(b"/foo", b"bar").is_err());
        assert!(validator.validate(b"//foo", b"bar").is_err());
        assert!(validator.validate(b"/v/", b"bar").is_err());

        let error = validator.validate(b"/ipns/foo", b"bar").unwrap_err();
        assert_eq!(error.to_string(), "invalid record keytype: ipns");
    }

    #[test]
    fn public_key_must_match_peer() {
        let validator = NamespacedValidator::default();

        let keypair = Keypair::generate_ed25519();
        let public_key = keypair.public();
        let key = format!("/pk/{}", public_key.to_peer_id());

        assert!(validator
            .validate(key.as_bytes(), &public_key.encode_protobuf())
            .is_ok());

        let other = Keypair::generate_ed25519().public();
        assert!(validator
            .validate(key.as_bytes(), &other.encode_protobuf())
            .is_err());
        assert!(validator.validate(key.as_bytes(), b"garbage").is_err());
    }
}

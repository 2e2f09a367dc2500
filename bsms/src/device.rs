//! Abstract interfaces of the device collaborators.
//!
//! The engine never talks to a screen, a card slot, an NFC antenna or
//! non-volatile storage directly: the firmware (or a host application, or
//! the test suite) hands it implementations of these traits.

use std::{error, fmt};

use bitcoin::{bip32, secp256k1};

/// What the user answered to a story prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Confirmed,
    Cancelled,
    /// One of the escape keys offered by the prompt.
    Key(char),
}

/// Text prompts with single-character choices, and bounded number entry.
/// Cancellation surfaces as [`Choice::Cancelled`] or `None` and must leave
/// persisted state untouched.
pub trait Prompts {
    fn story(&mut self, title: Option<&str>, msg: &str, escape: &str) -> Choice;
    fn enter_number(&mut self, msg: &str, max: u32) -> Option<u32>;
}

/// Progress display for the long operations (key derivation, per-signer
/// validation, artefact emission). Fractions are in [0.0, 1.0].
pub trait Progress {
    fn progress(&mut self, fraction: f32);
}

#[derive(Debug)]
pub struct SecretError(pub String);

impl fmt::Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl error::Error for SecretError {}

/// A derived node handed out by the secret store. The private key material
/// is erased on every exit path, including errors, by the drop handler.
pub struct SensitiveNode {
    xpriv: bip32::Xpriv,
}

impl SensitiveNode {
    pub fn new(xpriv: bip32::Xpriv) -> SensitiveNode {
        SensitiveNode { xpriv }
    }

    pub fn xpub<C: secp256k1::Signing>(&self, secp: &secp256k1::Secp256k1<C>) -> bip32::Xpub {
        bip32::Xpub::from_priv(secp, &self.xpriv)
    }

    pub fn private_key(&self) -> &secp256k1::SecretKey {
        &self.xpriv.private_key
    }
}

impl Drop for SensitiveNode {
    fn drop(&mut self) {
        self.xpriv.private_key.non_secure_erase();
    }
}

/// Scoped access to the device master secret.
pub trait SecretAccess {
    /// The master key fingerprint identifying this device in descriptors.
    fn master_fingerprint(&self) -> bip32::Fingerprint;

    /// Derive the node at an absolute path from the master.
    fn derive_path(&self, path: &bip32::DerivationPath) -> Result<SensitiveNode, SecretError>;
}

#[derive(Debug)]
pub struct SaveError(pub String);

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl error::Error for SaveError {}

/// The persistent settings store. `set` only stages a value; nothing hits
/// non-volatile storage until `save`.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&mut self, key: &str, value: serde_json::Value);
    fn save(&mut self) -> Result<(), SaveError>;
}

#[derive(Debug)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl error::Error for TransportError {}

/// The channel BSMS payloads travel on: a card slot, a virtual disk or a
/// contactless link presented as a flat namespace of named byte blobs.
pub trait Transport {
    /// Names available for auto-collection.
    fn list(&self) -> Result<Vec<String>, TransportError>;

    fn read(&self, name: &str) -> Result<Vec<u8>, TransportError>;

    /// Write a payload, returning the name it ended up under (the transport
    /// may deduplicate names).
    fn write(&mut self, name: &str, data: &[u8]) -> Result<String, TransportError>;

    /// Have the user pick a file, `None` on cancellation.
    fn pick(&mut self, prompt: &str, suffix: &str) -> Result<Option<String>, TransportError>;
}

#[derive(Debug)]
pub struct EnrolError(pub String);

impl fmt::Display for EnrolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl error::Error for EnrolError {}

/// Registration of the verified descriptor into the device wallet store.
/// `Ok` means the user approved the enrolment.
pub trait WalletEnrolment {
    fn enrol(&mut self, descriptor: &str, name: &str, session_index: usize)
        -> Result<(), EnrolError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Network;

    #[test]
    fn sensitive_node_wipes_on_drop() {
        let secp = secp256k1::Secp256k1::new();
        let xpriv = bip32::Xpriv::new_master(Network::Testnet, &[0xcd; 32]).unwrap();
        let expected = bip32::Xpub::from_priv(&secp, &xpriv);
        let node = SensitiveNode::new(xpriv);
        assert_eq!(node.xpub(&secp), expected);
        drop(node);
    }
}

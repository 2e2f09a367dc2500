//! BIP-129 Bitcoin Secure Multisig Setup (BSMS) protocol engine.
//!
//! Coordinates the creation of an N-of-M multisig wallet between one
//! Coordinator and N Signers. The engine is pure: all user interaction,
//! payload transport, secret material access and persistent storage go
//! through the traits of the [`device`] module, so it can be embedded in any
//! signing device firmware or host application.

pub mod coordinator;
pub mod descriptors;
pub mod device;
pub mod envelope;
pub mod flows;
pub mod message;
pub mod random;
pub mod settings;
pub mod signer;
pub mod token;
pub mod transport;

#[cfg(test)]
mod testutils;

pub use bitcoin;
pub use miniscript;

pub use crate::{
    descriptors::{keys::KeyError, AddressFormat, DescriptorError, MultisigDescriptor},
    settings::{CoordinatorSession, Session, SignerSession},
    token::{EncryptionType, Token},
};

use crate::{
    device::{EnrolError, SecretError, TransportError},
    transport::CollectError,
};

use std::{error, fmt};

use bitcoin::bip32;

/// BSMS caps the number of cosigners, like the multisig scripts it sets up.
pub const MAX_SIGNERS: usize = 15;

/// An error occurring during a BSMS round. Every error is fatal to the
/// current round: nothing is retried by the engine and no partial state is
/// persisted.
#[derive(Debug)]
pub enum BsmsError {
    /// Bad length, bad characters or bad prefix handling in a token.
    InvalidToken(String),
    Randomness(random::RandomnessError),
    /// The envelope did not open into an authentic "BSMS" payload.
    DecryptionFailed { token_prefix: String },
    /// First line of a payload is not exactly "BSMS 1.0".
    VersionMismatch { got: String },
    /// A payload that does not even have the right number of lines.
    Malformed(&'static str),
    /// Token carried inside a round-1 payload differs from the session's.
    TokenMismatch { expected: String, got: String },
    KeyFormat(KeyError),
    /// Recovered public key does not match the declared extended key.
    SignatureInvalid { signer: usize },
    /// Path restrictions line differs from the only allowed value.
    PathRestrictions { got: String },
    Descriptor(DescriptorError),
    /// No key with our master fingerprint in the descriptor.
    SelfMissing(bip32::Fingerprint),
    /// More than one key with our master fingerprint in the descriptor.
    DuplicateSelf {
        fingerprint: bip32::Fingerprint,
        count: usize,
    },
    /// The descriptor entry under our fingerprint is not the key we derive.
    KeyMismatch { derived: String, descriptor: String },
    /// The agreement step failed: our first address is not theirs.
    AddressMismatch { computed: String, claimed: String },
    /// Persistent settings save failed, even after rolling back.
    OutOfSpace,
    Bounds(String),
    /// Key description over 80 characters.
    InvalidDescription(usize),
    /// The persisted BSMS sub-map could not be decoded.
    Settings(String),
    Collection(CollectError),
    Secret(SecretError),
    Transport(TransportError),
    Enrolment(EnrolError),
    Bip32(bip32::Error),
}

impl fmt::Display for BsmsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidToken(s) => write!(
                f,
                "Invalid token: '{}'. Expected '00' or 64/128 bits (16 or 32 hex characters).",
                s
            ),
            Self::Randomness(e) => write!(f, "Error related to getting randomness: {}", e),
            Self::DecryptionFailed { token_prefix } => {
                write!(f, "Decryption with token {} failed.", token_prefix)
            }
            Self::VersionMismatch { got } => write!(
                f,
                "Incompatible BSMS version. Need '{}' got '{}'.",
                message::BSMS_VERSION,
                got
            ),
            Self::Malformed(what) => write!(f, "Malformed payload: {}.", what),
            Self::TokenMismatch { expected, got } => write!(
                f,
                "Token mismatch: saved {}, received from signer {}.",
                expected, got
            ),
            Self::KeyFormat(e) => write!(f, "{}", e),
            Self::SignatureInvalid { signer } => write!(
                f,
                "Recovered key from signature of signer {} does not equal key provided. Wrong signature?",
                signer + 1
            ),
            Self::PathRestrictions { got } => write!(
                f,
                "Only '{}' allowed as path restrictions. Got '{}'.",
                message::PATH_RESTRICTIONS,
                got
            ),
            Self::Descriptor(e) => write!(f, "{}", e),
            Self::SelfMissing(fg) => write!(f, "My key {} missing in descriptor.", fg),
            Self::DuplicateSelf { fingerprint, count } => {
                write!(f, "Multiple {} keys in descriptor ({}).", fingerprint, count)
            }
            Self::KeyMismatch { derived, descriptor } => write!(
                f,
                "Descriptor key substituted: derived {}, descriptor carries {}.",
                derived, descriptor
            ),
            Self::AddressMismatch { computed, claimed } => {
                write!(f, "Address mismatch! Calculated {}, got {}.", computed, claimed)
            }
            Self::OutOfSpace => write!(f, "Out of space in persistent settings."),
            Self::Bounds(s) => write!(f, "{}", s),
            Self::InvalidDescription(len) => write!(
                f,
                "Description of the key, {} char maximum (current: {} char).",
                message::MAX_DESCRIPTION_LEN,
                len
            ),
            Self::Settings(s) => write!(f, "Corrupted BSMS settings: {}.", s),
            Self::Collection(e) => write!(f, "{}", e),
            Self::Secret(e) => write!(f, "Secret access error: {}", e),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Enrolment(e) => write!(f, "Failed to import: {}", e),
            Self::Bip32(e) => write!(f, "BIP32 error: {}", e),
        }
    }
}

impl error::Error for BsmsError {}

impl From<DescriptorError> for BsmsError {
    fn from(e: DescriptorError) -> BsmsError {
        BsmsError::Descriptor(e)
    }
}

impl From<CollectError> for BsmsError {
    fn from(e: CollectError) -> BsmsError {
        BsmsError::Collection(e)
    }
}

impl From<TransportError> for BsmsError {
    fn from(e: TransportError) -> BsmsError {
        BsmsError::Transport(e)
    }
}

impl From<random::RandomnessError> for BsmsError {
    fn from(e: random::RandomnessError) -> BsmsError {
        BsmsError::Randomness(e)
    }
}

impl From<bip32::Error> for BsmsError {
    fn from(e: bip32::Error) -> BsmsError {
        BsmsError::Bip32(e)
    }
}

//! The Coordinator side of BSMS.
//!
//! Round 1 generates the setup tokens and records the session. Round 2
//! ingests all N signer contributions, verifies each one, and assembles the
//! descriptor template together with the joint first receive address.

use crate::{
    descriptors::{AddressFormat, MultisigDescriptor, SignerKey},
    envelope, message, random,
    settings::CoordinatorSession,
    token::{EncryptionType, Token},
    BsmsError, MAX_SIGNERS,
};

use bitcoin::{secp256k1, sign_message, Address, Network};

use std::str::FromStr;

/// Generate the session tokens and the session record for an M-of-N setup.
/// Nothing is persisted here: the caller saves the session once the tokens
/// were successfully emitted.
pub fn round1(
    threshold: usize,
    total: usize,
    addr_fmt: AddressFormat,
    encryption: EncryptionType,
    progress: &mut dyn FnMut(f32),
) -> Result<CoordinatorSession, BsmsError> {
    if total < 2 || total > MAX_SIGNERS {
        return Err(BsmsError::Bounds(format!(
            "Number of signers must be between 2 and {}.",
            MAX_SIGNERS
        )));
    }
    if threshold < 1 || threshold > total {
        return Err(BsmsError::Bounds(format!(
            "M cannot be bigger than N ({}) or smaller than 1.",
            total
        )));
    }

    let mut tokens = Vec::new();
    match encryption {
        EncryptionType::NoEncryption => {}
        EncryptionType::Standard => {
            // All signers share a single 64-bit token.
            let entropy = random::random_bytes()?;
            tokens.push(Token::from_str(&hex::encode(&entropy[..8]))?);
            progress(1.0);
        }
        EncryptionType::Extended => {
            // Each signer gets its own 128-bit token.
            for i in 0..total {
                let entropy = random::random_bytes()?;
                tokens.push(Token::from_str(&hex::encode(&entropy[..16]))?);
                progress(i as f32 / total as f32);
            }
        }
    }

    log::info!(
        "BSMS coordinator round 1: {}-of-{} {} session with {} token(s)",
        threshold,
        total,
        addr_fmt,
        tokens.len()
    );
    Ok(CoordinatorSession {
        threshold: threshold as u8,
        total: total as u8,
        addr_fmt,
        encryption,
        tokens,
    })
}

/// The assembled round-2 result: the descriptor, the agreement address and
/// the four-line payload text.
#[derive(Debug, Clone)]
pub struct Round2 {
    pub descriptor: MultisigDescriptor,
    pub address: Address,
    pub text: String,
}

/// Validate all N signer round-1 payloads and assemble the descriptor
/// template. Any failure aborts the whole round: no partial descriptor is
/// ever emitted.
pub fn round2(
    session: &CoordinatorSession,
    payloads: &[Vec<u8>],
    network: Network,
    progress: &mut dyn FnMut(f32),
) -> Result<Round2, BsmsError> {
    let total = session.total as usize;
    if payloads.len() != total {
        return Err(BsmsError::Bounds(format!(
            "No. of signer round 1 payloads ({}) does not equal number of signers (N={}).",
            payloads.len(),
            total
        )));
    }

    let secp = secp256k1::Secp256k1::new();
    let mut keys = Vec::with_capacity(total);
    for (i, raw) in payloads.iter().enumerate() {
        let token = session.token_for(i);
        let text = match token.encryption_key() {
            Some(enc_key) => envelope::decrypt(&enc_key, &token, raw)?,
            None => String::from_utf8(raw.clone())
                .map_err(|_| BsmsError::Malformed("round 1 payload is not valid UTF-8"))?,
        };

        let round1 = message::Round1::parse(&text)?;
        if round1.token != token.as_str() {
            return Err(BsmsError::TokenMismatch {
                expected: token.as_str().to_string(),
                got: round1.token,
            });
        }
        let key = SignerKey::from_expr(&round1.key_expr, network).map_err(BsmsError::KeyFormat)?;

        // The signature must recover to the very key being contributed.
        let digest = sign_message::signed_msg_hash(&round1.unsigned_body());
        let signature = sign_message::MessageSignature::from_slice(&round1.signature_bytes()?)
            .map_err(|_| BsmsError::SignatureInvalid { signer: i })?;
        let recovered = signature
            .recover_pubkey(&secp, digest)
            .map_err(|_| BsmsError::SignatureInvalid { signer: i })?;
        if recovered.inner != key.xpub.public_key {
            return Err(BsmsError::SignatureInvalid { signer: i });
        }

        log::debug!(
            "BSMS coordinator round 2: verified contribution {}/{} ({})",
            i + 1,
            total,
            key.fingerprint
        );
        keys.push(key);
        progress((i + 1) as f32 / total as f32 * 0.8);
    }

    let descriptor = MultisigDescriptor::new(session.threshold as usize, keys, session.addr_fmt)?;
    let address = descriptor.first_address(network)?;
    let text = message::round2_text(&descriptor.template(), &address.to_string());
    progress(1.0);

    log::info!(
        "BSMS coordinator round 2: descriptor assembled, agreement address {}",
        address
    );
    Ok(Round2 {
        descriptor,
        address,
        text,
    })
}

/// One emitted round-2 artefact: the payload under one token (or in the
/// clear for unencrypted setups).
#[derive(Debug, Clone)]
pub struct Artefact {
    pub token: Option<Token>,
    pub bytes: Vec<u8>,
}

/// Lazy producer of the round-2 artefacts, one per token. Encryption
/// happens on `next()` so at most one sealed payload is in memory at a
/// time.
pub struct Artefacts<'a> {
    round2: &'a Round2,
    session: &'a CoordinatorSession,
    next: usize,
}

impl Iterator for Artefacts<'_> {
    type Item = Artefact;

    fn next(&mut self) -> Option<Artefact> {
        let index = self.next;
        self.next += 1;
        match self.session.encryption {
            EncryptionType::NoEncryption => {
                if index > 0 {
                    return None;
                }
                Some(Artefact {
                    token: None,
                    bytes: self.round2.text.clone().into_bytes(),
                })
            }
            EncryptionType::Standard | EncryptionType::Extended => {
                let token = self.session.tokens.get(index)?.clone();
                let enc_key = token
                    .encryption_key()
                    .expect("session tokens are never the sentinel");
                let bytes = envelope::encrypt(&enc_key, &token, &self.round2.text);
                Some(Artefact {
                    token: Some(token),
                    bytes,
                })
            }
        }
    }
}

impl Round2 {
    /// The artefacts to emit: one for NO_ENCRYPTION and STANDARD, N (one
    /// per signer token) for EXTENDED.
    pub fn artefacts<'a>(&'a self, session: &'a CoordinatorSession) -> Artefacts<'a> {
        Artefacts {
            round2: self,
            session,
            next: 0,
        }
    }
}

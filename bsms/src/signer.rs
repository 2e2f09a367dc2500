//! The Signer side of BSMS.
//!
//! Round 1 derives a fresh account key, signs the key contribution with it
//! and seals the result under the setup token. Round 2 verifies the
//! coordinator's descriptor template, locates our own key inside it and
//! recomputes the first receive address: the all-or-nothing agreement step.

use crate::{
    descriptors::{MultisigDescriptor, SignerKey},
    device::SecretAccess,
    envelope, message,
    settings::SignerSession,
    token::Token,
    BsmsError,
};

use bitcoin::{
    bip32::{ChildNumber, DerivationPath},
    hashes::Hash,
    secp256k1,
    sign_message::{self, MessageSignature},
    Address, Network,
};

use base64::Engine;

/// What the user told us about the eventual script type. This only picks the
/// SLIP derivation path; the coordinator's descriptor has the final say,
/// which is why "unknown" is a valid answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptHint {
    Unknown,
    NativeSegwit,
    NestedSegwit,
}

/// The derivation path template for a script hint:
/// m/129'/{coin}'/{acct}' when unknown, m/48'/{coin}'/{acct}'/2' for native
/// segwit and m/48'/{coin}'/{acct}'/1' for nested.
pub fn derivation_path(
    hint: ScriptHint,
    network: Network,
    account: u32,
) -> Result<DerivationPath, BsmsError> {
    let coin = if let Network::Bitcoin = network { 0 } else { 1 };
    let hardened = |index| ChildNumber::from_hardened_idx(index).map_err(BsmsError::Bip32);
    let path = match hint {
        ScriptHint::Unknown => vec![hardened(129)?, hardened(coin)?, hardened(account)?],
        ScriptHint::NativeSegwit => vec![
            hardened(48)?,
            hardened(coin)?,
            hardened(account)?,
            hardened(2)?,
        ],
        ScriptHint::NestedSegwit => vec![
            hardened(48)?,
            hardened(coin)?,
            hardened(account)?,
            hardened(1)?,
        ],
    };
    Ok(path.into())
}

/// A successful round-1 emission: the payload to hand to the transport and
/// the session to persist once emission succeeded.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub session: SignerSession,
    pub payload: Vec<u8>,
    pub encrypted: bool,
}

/// Build and sign our key contribution. The payload comes back sealed
/// whenever the token is not the sentinel.
pub fn round1(
    secret: &dyn SecretAccess,
    network: Network,
    token: Token,
    hint: ScriptHint,
    account: u32,
    description: &str,
    progress: &mut dyn FnMut(f32),
) -> Result<Contribution, BsmsError> {
    let description_len = description.chars().count();
    if description_len > message::MAX_DESCRIPTION_LEN {
        return Err(BsmsError::InvalidDescription(description_len));
    }

    let secp = secp256k1::Secp256k1::new();
    let path = derivation_path(hint, network, account)?;
    progress(0.1);
    let node = secret.derive_path(&path).map_err(BsmsError::Secret)?;
    let key = SignerKey {
        fingerprint: secret.master_fingerprint(),
        derivation_path: path,
        xpub: node.xpub(&secp),
    };
    progress(0.25);

    let body = message::round1_body(token.as_str(), &key.to_string(), description);
    let digest = sign_message::signed_msg_hash(&body);
    let msg = secp256k1::Message::from_digest(digest.to_byte_array());
    progress(0.5);
    let signature = MessageSignature {
        signature: secp.sign_ecdsa_recoverable(&msg, node.private_key()),
        compressed: true,
    };
    let signature_b64 = base64::engine::general_purpose::STANDARD.encode(signature.serialize());
    let text = message::round1_signed(&body, &signature_b64);
    progress(0.75);

    let (payload, encrypted) = match token.encryption_key() {
        Some(enc_key) => (envelope::encrypt(&enc_key, &token, &text), true),
        None => (text.into_bytes(), false),
    };
    progress(1.0);

    log::info!(
        "BSMS signer round 1: contributed key {} under token {}",
        key.fingerprint,
        token.prefix()
    );
    Ok(Contribution {
        session: SignerSession { token },
        payload,
        encrypted,
    })
}

/// A verified descriptor template, ready to hand to the wallet enrolment
/// collaborator.
#[derive(Debug, Clone)]
pub struct Enrolment {
    pub descriptor: MultisigDescriptor,
    /// The single-branch receive descriptor enrolled as watch-only config.
    pub receive_descriptor: String,
    /// "bsms_" followed by the tail of the receive descriptor's checksum.
    pub name: String,
    /// The agreement address every participant computed identically.
    pub address: Address,
}

/// Verify a coordinator round-2 payload against our session and our seed.
pub fn round2(
    secret: &dyn SecretAccess,
    network: Network,
    token: &Token,
    payload: &[u8],
    progress: &mut dyn FnMut(f32),
) -> Result<Enrolment, BsmsError> {
    let text = match token.encryption_key() {
        Some(enc_key) => envelope::decrypt(&enc_key, token, payload)?,
        None => String::from_utf8(payload.to_vec())
            .map_err(|_| BsmsError::Malformed("round 2 payload is not valid UTF-8"))?,
    };
    progress(0.05);

    let round2 = message::Round2::parse(&text)?;
    let descriptor = MultisigDescriptor::from_template(&round2.template, network)?;
    progress(0.2);

    let my_fingerprint = secret.master_fingerprint();
    let mine: Vec<&SignerKey> = descriptor
        .keys()
        .iter()
        .filter(|k| k.fingerprint == my_fingerprint)
        .collect();
    let my_key = match mine.len() {
        0 => return Err(BsmsError::SelfMissing(my_fingerprint)),
        1 => mine[0],
        count => {
            return Err(BsmsError::DuplicateSelf {
                fingerprint: my_fingerprint,
                count,
            })
        }
    };
    progress(0.5);

    // Re-derive at the descriptor's path: a substituted key under our
    // fingerprint must not go unnoticed.
    let secp = secp256k1::Secp256k1::new();
    let node = secret
        .derive_path(&my_key.derivation_path)
        .map_err(BsmsError::Secret)?;
    let derived = node.xpub(&secp);
    if derived != my_key.xpub {
        return Err(BsmsError::KeyMismatch {
            derived: derived.to_string(),
            descriptor: my_key.xpub.to_string(),
        });
    }
    progress(0.55);

    let address = descriptor.first_address(network)?;
    progress(0.95);
    if address.to_string() != round2.address {
        return Err(BsmsError::AddressMismatch {
            computed: address.to_string(),
            claimed: round2.address,
        });
    }

    let receive_descriptor = descriptor.receive_descriptor()?;
    let name = format!(
        "bsms_{}",
        &receive_descriptor[receive_descriptor.len() - 4..]
    );
    progress(1.0);

    log::info!(
        "BSMS signer round 2: verified {}-of-{} descriptor, agreement address {}",
        descriptor.threshold(),
        descriptor.keys().len(),
        address
    );
    Ok(Enrolment {
        descriptor,
        receive_descriptor,
        name,
        address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::TestSecret;
    use std::str::FromStr;

    fn no_progress() -> impl FnMut(f32) {
        |_| ()
    }

    #[test]
    fn derivation_path_templates() {
        assert_eq!(
            derivation_path(ScriptHint::Unknown, Network::Bitcoin, 7).unwrap(),
            DerivationPath::from_str("129'/0'/7'").unwrap()
        );
        assert_eq!(
            derivation_path(ScriptHint::NativeSegwit, Network::Testnet, 0).unwrap(),
            DerivationPath::from_str("48'/1'/0'/2'").unwrap()
        );
        assert_eq!(
            derivation_path(ScriptHint::NestedSegwit, Network::Regtest, 3).unwrap(),
            DerivationPath::from_str("48'/1'/3'/1'").unwrap()
        );
    }

    #[test]
    fn round1_description_bounds() {
        let secret = TestSecret::new(0x01, Network::Testnet);
        let token = Token::none();
        // 80 characters is fine.
        round1(
            &secret,
            Network::Testnet,
            token.clone(),
            ScriptHint::NativeSegwit,
            0,
            &"a".repeat(80),
            &mut no_progress(),
        )
        .unwrap();
        // 81 is not.
        assert!(matches!(
            round1(
                &secret,
                Network::Testnet,
                token,
                ScriptHint::NativeSegwit,
                0,
                &"a".repeat(81),
                &mut no_progress(),
            ),
            Err(BsmsError::InvalidDescription(81))
        ));
    }

    #[test]
    fn round1_clear_payload_shape() {
        let secret = TestSecret::new(0x02, Network::Testnet);
        let contribution = round1(
            &secret,
            Network::Testnet,
            Token::none(),
            ScriptHint::Unknown,
            0,
            "unit test signer",
            &mut no_progress(),
        )
        .unwrap();
        assert!(!contribution.encrypted);
        let text = String::from_utf8(contribution.payload).unwrap();
        let parsed = message::Round1::parse(&text).unwrap();
        assert_eq!(parsed.token, "00");
        assert_eq!(parsed.description, "unit test signer");
        assert!(parsed.key_expr.contains("/129'/1'/0']tpub"));
    }

    #[test]
    fn round1_signature_recovers() {
        let secret = TestSecret::new(0x03, Network::Testnet);
        let contribution = round1(
            &secret,
            Network::Testnet,
            Token::none(),
            ScriptHint::NativeSegwit,
            0,
            "",
            &mut no_progress(),
        )
        .unwrap();
        let text = String::from_utf8(contribution.payload).unwrap();
        let parsed = message::Round1::parse(&text).unwrap();

        let secp = secp256k1::Secp256k1::new();
        let key = SignerKey::from_expr(&parsed.key_expr, Network::Testnet).unwrap();
        let digest = sign_message::signed_msg_hash(&parsed.unsigned_body());
        let signature = MessageSignature::from_slice(&parsed.signature_bytes().unwrap()).unwrap();
        let recovered = signature.recover_pubkey(&secp, digest).unwrap();
        assert_eq!(recovered.inner, key.xpub.public_key);
    }

    #[test]
    fn round1_encrypted_payload() {
        let secret = TestSecret::new(0x04, Network::Testnet);
        let token = Token::from_str("1f3a5c7e9b2d4f60").unwrap();
        let contribution = round1(
            &secret,
            Network::Testnet,
            token.clone(),
            ScriptHint::NativeSegwit,
            0,
            "enc",
            &mut no_progress(),
        )
        .unwrap();
        assert!(contribution.encrypted);
        let enc_key = token.encryption_key().unwrap();
        let text = envelope::decrypt(&enc_key, &token, &contribution.payload).unwrap();
        assert_eq!(
            message::Round1::parse(&text).unwrap().token,
            "1f3a5c7e9b2d4f60"
        );
    }
}

use bitcoin::{bip32, Network};

use std::{error, fmt, str::FromStr};

#[derive(Debug)]
pub enum KeyError {
    /// Malformed "[fingerprint/path]xpub" expression.
    Parsing,
    /// Extended key prefix wrong for the network, SLIP-132 variants included.
    Network { expected: &'static str, got: String },
    /// The extended key does not decode.
    Decoding(bip32::Error),
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Parsing => write!(f, "Error parsing key origin expression."),
            Self::Network { expected, got } => {
                write!(f, "Expected {}, got {}.", expected, got)
            }
            Self::Decoding(e) => write!(f, "Error decoding extended key: {}.", e),
        }
    }
}

impl error::Error for KeyError {}

/// The extended key prefix we accept on this network. Descriptors forbid the
/// SLIP-132 script-type variants (ypub, zpub, ..).
pub fn expected_key_prefix(network: Network) -> &'static str {
    if let Network::Bitcoin = network {
        "xpub"
    } else {
        "tpub"
    }
}

/// Check the textual prefix of an extended key for this network.
pub fn check_key_prefix(key_str: &str, network: Network) -> Result<(), KeyError> {
    let expected = expected_key_prefix(network);
    if !key_str.starts_with(expected) {
        return Err(KeyError::Network {
            expected,
            got: key_str.chars().take(4).collect(),
        });
    }
    Ok(())
}

/// A signer's key contribution: master fingerprint, derivation path from the
/// master, and the extended public key at that path. Serialises to the
/// "[AABBCCDD/48'/0'/0'/2']xpub..." form carried in BSMS payloads and
/// descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerKey {
    pub fingerprint: bip32::Fingerprint,
    pub derivation_path: bip32::DerivationPath,
    pub xpub: bip32::Xpub,
}

impl SignerKey {
    /// Parse a key origin expression, enforcing the network's extended key
    /// prefix.
    pub fn from_expr(s: &str, network: Network) -> Result<SignerKey, KeyError> {
        if !s.is_ascii() || !s.starts_with('[') {
            return Err(KeyError::Parsing);
        }
        let mut parts = s[1..].splitn(2, ']');
        let origin = parts.next().ok_or(KeyError::Parsing)?;
        let key_str = parts.next().ok_or(KeyError::Parsing)?;

        if origin.len() < 8 {
            return Err(KeyError::Parsing);
        }
        let fingerprint =
            bip32::Fingerprint::from_str(&origin[..8]).map_err(|_| KeyError::Parsing)?;
        let derivation_path = if origin.len() == 8 {
            bip32::DerivationPath::master()
        } else {
            if !origin[8..].starts_with('/') {
                return Err(KeyError::Parsing);
            }
            origin[9..]
                .split('/')
                .map(bip32::ChildNumber::from_str)
                .collect::<Result<bip32::DerivationPath, _>>()
                .map_err(|_| KeyError::Parsing)?
        };

        check_key_prefix(key_str, network)?;
        let xpub = bip32::Xpub::from_str(key_str).map_err(KeyError::Decoding)?;

        Ok(SignerKey {
            fingerprint,
            derivation_path,
            xpub,
        })
    }
}

impl fmt::Display for SignerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for byte in self.fingerprint.as_bytes().iter() {
            write!(f, "{:02x}", byte)?;
        }
        for child in &self.derivation_path {
            write!(f, "/{}", child)?;
        }
        write!(f, "]{}", self.xpub)
    }
}

//! Setup tokens and the keys derived from them.
//!
//! A token is the out-of-band secret the Coordinator hands each Signer. It
//! authenticates round-1 contributions and, unless it is the "00" sentinel,
//! keys the envelope encryption of everything exchanged afterwards.

use crate::BsmsError;

use std::{convert::TryFrom, fmt, str};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

/// Sentinel token value for unencrypted BSMS.
pub const NO_ENCRYPTION_TOKEN: &str = "00";

// BIP-129 fixes the PBKDF2 parameters.
const KDF_PASSWORD: &[u8] = b"No SPOF";
const KDF_ROUNDS: u32 = 2048;

/// How the Coordinator chose to protect the setup payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionType {
    /// A single 64-bit token shared by all signers.
    #[serde(rename = "1")]
    Standard,
    /// One 128-bit token per signer.
    #[serde(rename = "2")]
    Extended,
    /// Sentinel token only, everything in the clear.
    #[serde(rename = "3")]
    NoEncryption,
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "STANDARD"),
            Self::Extended => write!(f, "EXTENDED"),
            Self::NoEncryption => write!(f, "NO_ENCRYPTION"),
        }
    }
}

/// A setup token in canonical form: hex, no "0x" prefix, lowercased. Either
/// the "00" sentinel or exactly 16 or 32 hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    /// The sentinel token of unencrypted setups.
    pub fn none() -> Token {
        Token(NO_ENCRYPTION_TOKEN.to_string())
    }

    pub fn is_sentinel(&self) -> bool {
        self.0 == NO_ENCRYPTION_TOKEN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first four characters, used in filenames and diagnostics.
    pub fn prefix(&self) -> &str {
        let end = self.0.len().min(4);
        &self.0[..end]
    }

    /// The raw entropy carried by the token.
    pub fn to_bytes(&self) -> Vec<u8> {
        hex::decode(&self.0).expect("tokens only hold validated hex")
    }

    /// Derive the symmetric encryption key for this token, or None for the
    /// sentinel. PBKDF2-HMAC-SHA512, password "No SPOF", salt the raw token
    /// bytes, 2048 rounds, first 32 bytes of output.
    pub fn encryption_key(&self) -> Option<EncryptionKey> {
        if self.is_sentinel() {
            return None;
        }
        let salt = self.to_bytes();
        let mut key = Zeroizing::new([0u8; 32]);
        pbkdf2::pbkdf2_hmac::<Sha512>(KDF_PASSWORD, &salt, KDF_ROUNDS, key.as_mut_slice());
        Some(EncryptionKey(key))
    }
}

impl str::FromStr for Token {
    type Err = BsmsError;

    fn from_str(s: &str) -> Result<Token, Self::Err> {
        // Normalise before validating: strip the "0x" prefix, lowercase.
        let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        let canonical = s.to_lowercase();
        if canonical == NO_ENCRYPTION_TOKEN {
            return Ok(Token(canonical));
        }
        if !matches!(canonical.len(), 16 | 32)
            || !canonical.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(BsmsError::InvalidToken(s.to_string()));
        }
        Ok(Token(canonical))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Token {
    type Error = BsmsError;

    fn try_from(s: String) -> Result<Token, Self::Error> {
        str::FromStr::from_str(&s)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> String {
        token.0
    }
}

/// The 32 bytes of PBKDF2 output for a non-sentinel token. The first half
/// keys the AES-128-CTR envelope body, a SHA-256 of the whole keys the MAC.
/// Wiped on drop.
pub struct EncryptionKey(Zeroizing<[u8; 32]>);

impl EncryptionKey {
    /// The AES-128 key: first 16 bytes of the PBKDF2 output.
    pub fn aes_key(&self) -> &[u8] {
        &self.0[..16]
    }

    /// K_mac = SHA-256(K_enc).
    pub fn mac_key(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(Sha256::digest(&self.0[..]).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn token_validation() {
        // Sentinel.
        assert_eq!(Token::from_str("00").unwrap(), Token::none());
        // 64 and 128 bit tokens, either case, optional 0x prefix.
        for ok in [
            "1f3a5c7e9b2d4f60",
            "1F3A5C7E9B2D4F60",
            "0x1f3a5c7e9b2d4f60",
            "0X1f3a5c7e9b2d4f60",
            "00112233445566778899aabbccddeeff",
        ] {
            Token::from_str(ok).unwrap();
        }
        // Canonical form drops the prefix and the case.
        assert_eq!(
            Token::from_str("0X1F3A5C7E9B2D4F60").unwrap().as_str(),
            "1f3a5c7e9b2d4f60"
        );
        for bad in [
            "",
            "0",
            "1f3a5c7e9b2d4f6",              // 15 chars
            "1f3a5c7e9b2d4f601",            // 17 chars
            "zf3a5c7e9b2d4f60",             // not hex
            "00112233445566778899aabbccddee", // 30 chars
            "00112233445566778899aabbccddeeff00", // 34 chars
        ] {
            assert!(matches!(
                Token::from_str(bad),
                Err(BsmsError::InvalidToken(_))
            ));
        }
    }

    #[test]
    fn token_prefix() {
        assert_eq!(Token::from_str("1f3a5c7e9b2d4f60").unwrap().prefix(), "1f3a");
        assert_eq!(Token::none().prefix(), "00");
    }

    #[test]
    fn key_derivation_determinism() {
        let token = Token::from_str("1f3a5c7e9b2d4f60").unwrap();
        let k1 = token.encryption_key().unwrap();
        let k2 = token.encryption_key().unwrap();
        assert_eq!(&k1.0[..], &k2.0[..]);
        // Distinct tokens yield distinct keys.
        let other = Token::from_str("2f3a5c7e9b2d4f60").unwrap();
        assert_ne!(&k1.0[..], &other.encryption_key().unwrap().0[..]);
        // The MAC key is the SHA-256 of the encryption key.
        let expected: [u8; 32] = Sha256::digest(&k1.0[..]).into();
        assert_eq!(&k1.mac_key()[..], &expected[..]);
        // Sentinel derives nothing.
        assert!(Token::none().encryption_key().is_none());
    }

    #[test]
    fn serde_roundtrip() {
        let token = Token::from_str("00112233445566778899aabbccddeeff").unwrap();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"00112233445566778899aabbccddeeff\"");
        assert_eq!(serde_json::from_str::<Token>(&json).unwrap(), token);
        assert!(serde_json::from_str::<Token>("\"nothex\"").is_err());
    }
}

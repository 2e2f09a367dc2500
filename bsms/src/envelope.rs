//! The BSMS envelope: authenticated encryption with a deterministic IV.
//!
//! The envelope binds a ciphertext to the setup token. The MAC doubles as
//! the IV source, so equal (token, plaintext) pairs produce equal envelopes:
//!
//! ```text
//! mac = HMAC-SHA-256(SHA-256(K_enc), token_hex || plaintext)
//! out = mac || AES-128-CTR(K_enc[0..16], iv = mac[0..16], plaintext)
//! ```

use crate::{
    token::{EncryptionKey, Token},
    BsmsError,
};

use std::convert::TryInto;

use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;
type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

/// Every plaintext exchanged under an envelope starts with this, which is
/// what decryption checks first.
pub const PLAINTEXT_MARKER: &str = "BSMS";

const MAC_LEN: usize = 32;

fn auth_code(key: &EncryptionKey, token: &Token, plaintext: &str) -> [u8; MAC_LEN] {
    let mut mac = HmacSha256::new_from_slice(&key.mac_key()[..])
        .expect("HMAC-SHA-256 accepts any key length");
    mac.update(token.as_str().as_bytes());
    mac.update(plaintext.as_bytes());
    mac.finalize().into_bytes().into()
}

fn apply_ctr(key: &EncryptionKey, iv: &[u8], buf: &mut [u8]) {
    let aes_key: &[u8; 16] = key.aes_key().try_into().expect("16-byte AES key");
    let iv: &[u8; 16] = iv.try_into().expect("16-byte IV");
    let mut cipher = Aes128Ctr::new(aes_key.into(), iv.into());
    cipher.apply_keystream(buf);
}

/// Seal `plaintext` under `key`, binding it to `token`.
pub fn encrypt(key: &EncryptionKey, token: &Token, plaintext: &str) -> Vec<u8> {
    let mac = auth_code(key, token, plaintext);
    let mut out = Vec::with_capacity(MAC_LEN + plaintext.len());
    out.extend_from_slice(&mac);
    let mut body = plaintext.as_bytes().to_vec();
    apply_ctr(key, &mac[..16], &mut body);
    out.extend_from_slice(&body);
    out
}

/// Open an envelope. The recovered plaintext must be UTF-8, start with
/// "BSMS", and match the transmitted MAC when re-authenticated against the
/// token.
pub fn decrypt(key: &EncryptionKey, token: &Token, data: &[u8]) -> Result<String, BsmsError> {
    let failed = || BsmsError::DecryptionFailed {
        token_prefix: token.prefix().to_string(),
    };
    if data.len() < MAC_LEN {
        return Err(failed());
    }
    let (mac, ciphertext) = data.split_at(MAC_LEN);
    let mut body = ciphertext.to_vec();
    apply_ctr(key, &mac[..16], &mut body);
    let plaintext = String::from_utf8(body).map_err(|_| failed())?;
    if !plaintext.starts_with(PLAINTEXT_MARKER) {
        return Err(failed());
    }
    let mut check = HmacSha256::new_from_slice(&key.mac_key()[..])
        .expect("HMAC-SHA-256 accepts any key length");
    check.update(token.as_str().as_bytes());
    check.update(plaintext.as_bytes());
    check.verify_slice(mac).map_err(|_| failed())?;
    Ok(plaintext)
}

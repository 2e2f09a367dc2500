//! Filename conventions and auto-collection of BSMS payload files.
//!
//! Payloads travel as files over the abstract [`Transport`]: `.txt` in the
//! clear, `.dat` sealed, `.token` for the coordinator-emitted tokens. The
//! first four hex characters of a token tie EXTENDED files to their signer.

use crate::{
    device::{Transport, TransportError},
    envelope,
    settings::CoordinatorSession,
    token::{EncryptionType, Token},
};

use std::{error, fmt};

pub const TOKEN_SUFFIX: &str = ".token";
pub const CLEAR_SUFFIX: &str = ".txt";
pub const ENCRYPTED_SUFFIX: &str = ".dat";

const ROUND1_PATTERN: &str = "bsms_sr1";
const ROUND2_PATTERN: &str = "bsms_cr2";

#[derive(Debug)]
pub enum CollectError {
    Transport(TransportError),
    /// Wrong number of usable candidate files.
    Count { expected: usize, got: usize },
    /// Zero or several files matched a token prefix: manual selection is
    /// the only safe way out.
    Ambiguous {
        token_prefix: String,
        candidates: usize,
    },
    /// A candidate file does not carry a BSMS payload.
    NotBsms { file: String },
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Count { expected, got } => write!(
                f,
                "No. of signer round 1 files auto-collected ({}) does not equal number of signers (N={}).",
                got, expected
            ),
            Self::Ambiguous {
                token_prefix,
                candidates,
            } => write!(
                f,
                "Found {} files for token {}, need exactly one.",
                candidates, token_prefix
            ),
            Self::NotBsms { file } => write!(f, "Failure - {} is not a BSMS file?", file),
        }
    }
}

impl error::Error for CollectError {}

impl From<TransportError> for CollectError {
    fn from(e: TransportError) -> CollectError {
        CollectError::Transport(e)
    }
}

/// The suffix of payload files under this encryption type.
pub fn payload_suffix(encryption: EncryptionType) -> &'static str {
    match encryption {
        EncryptionType::NoEncryption => CLEAR_SUFFIX,
        EncryptionType::Standard | EncryptionType::Extended => ENCRYPTED_SUFFIX,
    }
}

/// `bsms_<tokprefix>.token`, one file per coordinator-emitted token.
pub fn token_filename(token: &Token) -> String {
    format!("bsms_{}{}", token.prefix(), TOKEN_SUFFIX)
}

/// The signer round-1 filename for this token: `bsms_sr1.txt` unencrypted,
/// `bsms_sr1.dat` for a shared token, `bsms_sr1_<tokprefix>.dat` for a
/// per-signer (extended) token.
pub fn round1_filename(token: &Token) -> String {
    if token.is_sentinel() {
        format!("{}{}", ROUND1_PATTERN, CLEAR_SUFFIX)
    } else if token.as_str().len() == 32 {
        format!("{}_{}{}", ROUND1_PATTERN, token.prefix(), ENCRYPTED_SUFFIX)
    } else {
        format!("{}{}", ROUND1_PATTERN, ENCRYPTED_SUFFIX)
    }
}

/// The coordinator round-2 filename: `bsms_cr2.txt` / `bsms_cr2.dat` /
/// `bsms_cr2_<tokprefix>.dat`.
pub fn round2_filename(encryption: EncryptionType, token: Option<&Token>) -> String {
    match encryption {
        EncryptionType::NoEncryption => format!("{}{}", ROUND2_PATTERN, CLEAR_SUFFIX),
        EncryptionType::Standard => format!("{}{}", ROUND2_PATTERN, ENCRYPTED_SUFFIX),
        EncryptionType::Extended => format!(
            "{}_{}{}",
            ROUND2_PATTERN,
            token.expect("extended artefacts carry their token").prefix(),
            ENCRYPTED_SUFFIX
        ),
    }
}

/// Auto-collect the N signer round-1 payloads for a coordinator session.
///
/// STANDARD: trial-decrypt every `bsms_sr1*.dat`, keep the authentic ones
/// and require exactly N survivors. EXTENDED: exactly one `bsms_sr1*.dat`
/// per token prefix. NO_ENCRYPTION: exactly N `bsms_sr1*.txt`, each
/// starting with "BSMS". Payloads come back raw, in token order; the
/// round-2 ingestion decrypts and validates them for real.
pub fn collect_round1(
    transport: &dyn Transport,
    session: &CoordinatorSession,
) -> Result<Vec<Vec<u8>>, CollectError> {
    let total = session.total as usize;
    let suffix = payload_suffix(session.encryption);
    let candidates: Vec<String> = transport
        .list()?
        .into_iter()
        .filter(|name| name.contains(ROUND1_PATTERN) && name.ends_with(suffix))
        .collect();

    match session.encryption {
        EncryptionType::Standard => {
            let token = session.token_for(0);
            let enc_key = token
                .encryption_key()
                .expect("standard sessions have a real token");
            let mut collected = Vec::new();
            for name in &candidates {
                let data = transport.read(name)?;
                // Files sealed under another wallet's token just get
                // skipped.
                if envelope::decrypt(&enc_key, &token, &data).is_ok() {
                    collected.push(data);
                }
            }
            if collected.len() != total {
                return Err(CollectError::Count {
                    expected: total,
                    got: collected.len(),
                });
            }
            Ok(collected)
        }
        EncryptionType::Extended => {
            let mut collected = Vec::with_capacity(total);
            for i in 0..total {
                let token = session.token_for(i);
                let matches: Vec<&String> = candidates
                    .iter()
                    .filter(|name| name.contains(token.prefix()))
                    .collect();
                if matches.len() != 1 {
                    return Err(CollectError::Ambiguous {
                        token_prefix: token.prefix().to_string(),
                        candidates: matches.len(),
                    });
                }
                collected.push(transport.read(matches[0])?);
            }
            Ok(collected)
        }
        EncryptionType::NoEncryption => {
            if candidates.len() != total {
                return Err(CollectError::Count {
                    expected: total,
                    got: candidates.len(),
                });
            }
            let mut collected = Vec::with_capacity(total);
            for name in &candidates {
                let data = transport.read(name)?;
                if !data.starts_with(envelope::PLAINTEXT_MARKER.as_bytes()) {
                    return Err(CollectError::NotBsms { file: name.clone() });
                }
                collected.push(data);
            }
            Ok(collected)
        }
    }
}

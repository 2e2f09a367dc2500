//! Text framing of the two BSMS payloads.
//!
//! Round 1 (signer to coordinator), four lines joined by a single '\n' with
//! a fifth base64 signature line appended after signing:
//!
//! ```text
//! BSMS 1.0
//! <token hex or "00">
//! <key origin and xpub>
//! <description, 80 chars max>
//! <base64 signature>
//! ```
//!
//! Round 2 (coordinator to signers), exactly four lines:
//!
//! ```text
//! BSMS 1.0
//! <descriptor template, wildcards collapsed to "/**">
//! /0/*,/1/*
//! <first receive address>
//! ```

use crate::BsmsError;

use base64::Engine;

pub const BSMS_VERSION: &str = "BSMS 1.0";

/// The only path restrictions BSMS allows: external then internal branch.
pub const PATH_RESTRICTIONS: &str = "/0/*,/1/*";

pub const MAX_DESCRIPTION_LEN: usize = 80;

/// The unsigned round-1 body, the exact bytes the signature commits to.
pub fn round1_body(token: &str, key_expr: &str, description: &str) -> String {
    format!("{}\n{}\n{}\n{}", BSMS_VERSION, token, key_expr, description)
}

pub fn round1_signed(body: &str, signature_b64: &str) -> String {
    format!("{}\n{}", body, signature_b64)
}

pub fn round2_text(template: &str, address: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        BSMS_VERSION, template, PATH_RESTRICTIONS, address
    )
}

/// A parsed signer round-1 payload. Fields are kept as transmitted so the
/// signed body can be recomputed byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round1 {
    pub token: String,
    pub key_expr: String,
    pub description: String,
    pub signature: String,
}

impl Round1 {
    pub fn parse(text: &str) -> Result<Round1, BsmsError> {
        let lines: Vec<&str> = text.trim().split('\n').collect();
        if lines.first().copied() != Some(BSMS_VERSION) {
            return Err(BsmsError::VersionMismatch {
                got: lines.first().copied().unwrap_or_default().to_string(),
            });
        }
        if lines.len() != 5 {
            return Err(BsmsError::Malformed("round 1 payload is not five lines"));
        }
        Ok(Round1 {
            token: lines[1].to_string(),
            key_expr: lines[2].to_string(),
            description: lines[3].to_string(),
            signature: lines[4].to_string(),
        })
    }

    /// The four lines the signature was computed over.
    pub fn unsigned_body(&self) -> String {
        round1_body(&self.token, &self.key_expr, &self.description)
    }

    pub fn signature_bytes(&self) -> Result<Vec<u8>, BsmsError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.signature)
            .map_err(|_| BsmsError::Malformed("round 1 signature line is not base64"))
    }
}

/// A parsed coordinator round-2 payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round2 {
    pub template: String,
    pub address: String,
}

impl Round2 {
    pub fn parse(text: &str) -> Result<Round2, BsmsError> {
        let lines: Vec<&str> = text.trim().split('\n').collect();
        if lines.first().copied() != Some(BSMS_VERSION) {
            return Err(BsmsError::VersionMismatch {
                got: lines.first().copied().unwrap_or_default().to_string(),
            });
        }
        if lines.len() != 4 {
            return Err(BsmsError::Malformed("round 2 payload is not four lines"));
        }
        if lines[2] != PATH_RESTRICTIONS {
            return Err(BsmsError::PathRestrictions {
                got: lines[2].to_string(),
            });
        }
        Ok(Round2 {
            template: lines[1].to_string(),
            address: lines[3].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round1_framing() {
        let body = round1_body("00", "[aabbccdd/48'/0'/0'/2']xpub6AAA", "my signer");
        assert_eq!(
            body,
            "BSMS 1.0\n00\n[aabbccdd/48'/0'/0'/2']xpub6AAA\nmy signer"
        );
        let signed = round1_signed(&body, "c2ln");
        let parsed = Round1::parse(&signed).unwrap();
        assert_eq!(parsed.token, "00");
        assert_eq!(parsed.key_expr, "[aabbccdd/48'/0'/0'/2']xpub6AAA");
        assert_eq!(parsed.description, "my signer");
        assert_eq!(parsed.signature, "c2ln");
        assert_eq!(parsed.unsigned_body(), body);
        assert_eq!(parsed.signature_bytes().unwrap(), b"sig");
    }

    #[test]
    fn round1_empty_description() {
        let signed = round1_signed(&round1_body("00", "[aabbccdd/0']xpub6AAA", ""), "c2ln");
        let parsed = Round1::parse(&signed).unwrap();
        assert_eq!(parsed.description, "");
    }

    #[test]
    fn round1_rejects() {
        assert!(matches!(
            Round1::parse("BSMS 2.0\n00\nkey\ndesc\nsig"),
            Err(BsmsError::VersionMismatch { .. })
        ));
        assert!(matches!(
            Round1::parse("BSMS 1.0\n00\nkey\ndesc"),
            Err(BsmsError::Malformed(_))
        ));
        assert!(matches!(
            Round1::parse("BSMS 1.0\n00\nkey\ndesc\nnot!base64")
                .unwrap()
                .signature_bytes(),
            Err(BsmsError::Malformed(_))
        ));
    }

    #[test]
    fn round2_framing() {
        let text = round2_text("wsh(sortedmulti(2,a,b))#00000000", "bc1qexample");
        let parsed = Round2::parse(&text).unwrap();
        assert_eq!(parsed.template, "wsh(sortedmulti(2,a,b))#00000000");
        assert_eq!(parsed.address, "bc1qexample");
    }

    #[test]
    fn round2_rejects() {
        assert!(matches!(
            Round2::parse("BSMS 1.1\ndesc\n/0/*,/1/*\naddr"),
            Err(BsmsError::VersionMismatch { .. })
        ));
        assert!(matches!(
            Round2::parse("BSMS 1.0\ndesc\n/0/*\naddr"),
            Err(BsmsError::PathRestrictions { .. })
        ));
        assert!(matches!(
            Round2::parse("BSMS 1.0\ndesc\n/0/*,/1/*"),
            Err(BsmsError::Malformed(_))
        ));
    }
}

//! Persisted BSMS sessions.
//!
//! Everything lives under the single `bsms` key of the device settings: an
//! object with an `s` array of signer session tokens and a `c` array of
//! coordinator session tuples. Unknown sub-keys are preserved across saves.
//! Writes are transactional: on a failed save the previous sub-map is
//! restored and the failure surfaces as [`BsmsError::OutOfSpace`].

use crate::{
    descriptors::AddressFormat,
    device::SettingsStore,
    token::{EncryptionType, Token},
    BsmsError,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The key of the BSMS sub-map in the device settings.
pub const SETTINGS_KEY: &str = "bsms";

/// A signer-side session: just the canonical token, created after a
/// successful round-1 emission and consumed by wallet enrolment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerSession {
    pub token: Token,
}

impl SignerSession {
    /// Detail view: the token in hex and decimal.
    pub fn detail(&self) -> String {
        let decimal = u128::from_str_radix(self.token.as_str(), 16)
            .expect("tokens only hold validated hex");
        format!(
            "Token HEX:\n{}\n\nToken decimal:\n{}",
            self.token, decimal
        )
    }
}

/// A coordinator-side session, persisted as the `(M, N, addr_fmt, et,
/// tokens)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "CoordinatorRecord", into = "CoordinatorRecord")]
pub struct CoordinatorSession {
    pub threshold: u8,
    pub total: u8,
    pub addr_fmt: AddressFormat,
    pub encryption: EncryptionType,
    pub tokens: Vec<Token>,
}

type CoordinatorRecord = (u8, u8, AddressFormat, EncryptionType, Vec<Token>);

impl From<CoordinatorRecord> for CoordinatorSession {
    fn from((threshold, total, addr_fmt, encryption, tokens): CoordinatorRecord) -> Self {
        CoordinatorSession {
            threshold,
            total,
            addr_fmt,
            encryption,
            tokens,
        }
    }
}

impl From<CoordinatorSession> for CoordinatorRecord {
    fn from(session: CoordinatorSession) -> Self {
        (
            session.threshold,
            session.total,
            session.addr_fmt,
            session.encryption,
            session.tokens,
        )
    }
}

impl CoordinatorSession {
    /// The token labelling signer `index`, per the session's encryption
    /// type. Out-of-shape sessions degrade to the sentinel.
    pub fn token_for(&self, index: usize) -> Token {
        match self.encryption {
            EncryptionType::Standard => self.tokens.first().cloned(),
            EncryptionType::Extended => self.tokens.get(index).cloned(),
            EncryptionType::NoEncryption => None,
        }
        .unwrap_or_else(Token::none)
    }

    pub fn is_encrypted(&self) -> bool {
        !matches!(self.encryption, EncryptionType::NoEncryption) && !self.tokens.is_empty()
    }

    /// The summary shown for confirmation at the end of round 1.
    pub fn summary(&self) -> String {
        let mut out = format!("{} of {}\n\n", self.threshold, self.total);
        out.push_str(&format!("Address format:\n{}\n\n", self.addr_fmt));
        out.push_str(&format!("Encryption type:\n{}\n\n", self.encryption));
        out.push_str(&token_summary(&self.tokens));
        if !self.tokens.is_empty() {
            out.push_str("\n\n");
        }
        out
    }
}

/// Numbered token list, as displayed and shared over text transports.
pub fn token_summary(tokens: &[Token]) -> String {
    tokens
        .iter()
        .enumerate()
        .map(|(i, token)| format!("{}. {}", i + 1, token))
        .collect::<Vec<String>>()
        .join("\n\n")
}

/// A stored session of either role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Signer(SignerSession),
    Coordinator(CoordinatorSession),
}

/// The whole `bsms` sub-map. Sub-keys we do not know about are carried
/// through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BsmsState {
    #[serde(rename = "s", default)]
    pub signers: Vec<Token>,
    #[serde(rename = "c", default)]
    pub coordinators: Vec<CoordinatorSession>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, Value>,
}

/// Read the current BSMS state out of the settings store.
pub fn state(store: &dyn SettingsStore) -> Result<BsmsState, BsmsError> {
    match store.get(SETTINGS_KEY) {
        Some(value) => {
            serde_json::from_value(value).map_err(|e| BsmsError::Settings(e.to_string()))
        }
        None => Ok(BsmsState::default()),
    }
}

pub fn signer_sessions(store: &dyn SettingsStore) -> Result<Vec<SignerSession>, BsmsError> {
    Ok(state(store)?
        .signers
        .into_iter()
        .map(|token| SignerSession { token })
        .collect())
}

pub fn coordinator_sessions(
    store: &dyn SettingsStore,
) -> Result<Vec<CoordinatorSession>, BsmsError> {
    Ok(state(store)?.coordinators)
}

/// All stored sessions, signers first, for menu display.
pub fn sessions(store: &dyn SettingsStore) -> Result<Vec<Session>, BsmsError> {
    let state = state(store)?;
    Ok(state
        .signers
        .into_iter()
        .map(|token| Session::Signer(SignerSession { token }))
        .chain(state.coordinators.into_iter().map(Session::Coordinator))
        .collect())
}

// Stage the new state and save. On failure, back out the change (no longer
// sure of the storage state), try to save the restored map, and report
// OutOfSpace regardless.
fn persist(
    store: &mut dyn SettingsStore,
    orig: Option<Value>,
    state: &BsmsState,
) -> Result<(), BsmsError> {
    let staged = serde_json::to_value(state).map_err(|e| BsmsError::Settings(e.to_string()))?;
    store.set(SETTINGS_KEY, staged);
    if store.save().is_ok() {
        return Ok(());
    }
    store.set(
        SETTINGS_KEY,
        orig.unwrap_or_else(|| Value::Object(Default::default())),
    );
    let _ = store.save();
    Err(BsmsError::OutOfSpace)
}

pub fn add_signer(store: &mut dyn SettingsStore, token: Token) -> Result<(), BsmsError> {
    let orig = store.get(SETTINGS_KEY);
    let mut state = state(store)?;
    state.signers.push(token);
    persist(store, orig, &state)
}

pub fn add_coordinator(
    store: &mut dyn SettingsStore,
    session: CoordinatorSession,
) -> Result<(), BsmsError> {
    let orig = store.get(SETTINGS_KEY);
    let mut state = state(store)?;
    state.coordinators.push(session);
    persist(store, orig, &state)
}

/// Delete the signer session at `index`. Out-of-range indexes are a no-op.
pub fn remove_signer(store: &mut dyn SettingsStore, index: usize) -> Result<(), BsmsError> {
    let orig = store.get(SETTINGS_KEY);
    let mut state = state(store)?;
    if index >= state.signers.len() {
        return Ok(());
    }
    state.signers.remove(index);
    persist(store, orig, &state)
}

/// Delete the coordinator session at `index`. Out-of-range indexes are a
/// no-op.
pub fn remove_coordinator(store: &mut dyn SettingsStore, index: usize) -> Result<(), BsmsError> {
    let orig = store.get(SETTINGS_KEY);
    let mut state = state(store)?;
    if index >= state.coordinators.len() {
        return Ok(());
    }
    state.coordinators.remove(index);
    persist(store, orig, &state)
}
